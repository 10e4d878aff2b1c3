use serde::{Deserialize, Serialize};

use super::{rules::split_path, Evidence, IacDialect, RepositoryListing, RuleKind};

/// Where generated infrastructure and automation code should be placed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuggestedLayout {
    pub iac_dir: String,
    pub automation_dir: String,
    pub runbooks_dir: String,
}

impl SuggestedLayout {
    /// `"."` stands for the repository root
    fn rooted_at(iac_dir: String) -> Self {
        let automation_dir = if iac_dir == "." {
            "automation".to_string()
        } else {
            format!("{iac_dir}/automation")
        };
        let runbooks_dir = format!("{automation_dir}/runbooks");
        Self {
            iac_dir,
            automation_dir,
            runbooks_dir,
        }
    }
}

/// Suggest a layout for the decided dialect, preferring what the repository already uses
pub fn suggest(
    dialect: IacDialect,
    listing: &RepositoryListing,
    evidence: &[Evidence],
) -> SuggestedLayout {
    let dialect_dir = dialect.as_str();

    // An existing `terraform/` or `bicep/` directory
    for entry in &listing.entries {
        let original: Vec<&str> = entry.path.split('/').collect();
        let (directories, _) = split_path(&entry.path);
        if let Some(index) = directories.iter().position(|d| d == dialect_dir) {
            return SuggestedLayout::rooted_at(original[..=index].join("/"));
        }
    }

    // The directory holding the first dialect source file
    let first_source = evidence.iter().find(|e| {
        e.dialect == dialect && matches!(e.rule, RuleKind::Extension | RuleKind::EntryFile)
    });
    if let Some(source) = first_source {
        let parent = source.path.rsplit_once('/').map_or(".", |(parent, _)| parent);
        return SuggestedLayout::rooted_at(parent.to_string());
    }

    let has_infra_dir = listing
        .entries
        .iter()
        .any(|entry| split_path(&entry.path).0.first().map(String::as_str) == Some("infra"));
    if has_infra_dir {
        return SuggestedLayout::rooted_at(format!("infra/{dialect_dir}"));
    }

    SuggestedLayout::rooted_at(dialect_dir.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::rules::match_path;

    fn layout_for(dialect: IacDialect, paths: &[&str]) -> SuggestedLayout {
        let listing = RepositoryListing::from_paths(paths.iter().copied())
            .normalized()
            .unwrap();
        let evidence: Vec<Evidence> = listing
            .entries
            .iter()
            .flat_map(|e| match_path(&e.path))
            .collect();
        suggest(dialect, &listing, &evidence)
    }

    #[test]
    fn test_existing_dialect_directory_is_reused() {
        let layout = layout_for(IacDialect::Terraform, &["deploy/Terraform/main.tf", "README.md"]);
        assert_eq!(layout.iac_dir, "deploy/Terraform");
        assert_eq!(layout.automation_dir, "deploy/Terraform/automation");
        assert_eq!(layout.runbooks_dir, "deploy/Terraform/automation/runbooks");
    }

    #[test]
    fn test_source_directory_is_used_without_dialect_directory() {
        let layout = layout_for(IacDialect::Bicep, &["infra/main.bicep"]);
        assert_eq!(layout.iac_dir, "infra");
    }

    #[test]
    fn test_root_level_sources_stay_at_the_root() {
        let layout = layout_for(
            IacDialect::Terraform,
            &["main.tf", "variables.tf", "terraform.tfstate"],
        );
        assert_eq!(layout.iac_dir, ".");
        assert_eq!(layout.automation_dir, "automation");
        assert_eq!(layout.runbooks_dir, "automation/runbooks");
    }

    #[test]
    fn test_marker_only_listing_falls_back_to_infra_directory() {
        let layout = layout_for(IacDialect::Terraform, &[".terraform.lock.hcl", "infra/README.md"]);
        assert_eq!(layout.iac_dir, "infra/terraform");
    }

    #[test]
    fn test_marker_only_listing_falls_back_to_dialect_name() {
        let layout = layout_for(IacDialect::Bicep, &["bicepconfig.json"]);
        assert_eq!(layout.iac_dir, "bicep");
        assert_eq!(layout.automation_dir, "bicep/automation");
    }
}
