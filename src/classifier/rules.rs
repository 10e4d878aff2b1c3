use serde::{Deserialize, Serialize};

use super::{Evidence, IacDialect};

/// Kind of rule that produced a piece of evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Extension,
    EntryFile,
    MarkerFile,
    DialectDirectory,
    ConventionalDirectory,
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Suffix(&'static str),
    FileName(&'static str),
    Directory(&'static str),
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    dialect: IacDialect,
    kind: RuleKind,
    pattern: Pattern,
    weight: f64,
}

const fn rule(dialect: IacDialect, kind: RuleKind, pattern: Pattern, weight: f64) -> Rule {
    Rule {
        dialect,
        kind,
        pattern,
        weight,
    }
}

const RULES: &[Rule] = &[
    // Terraform
    rule(IacDialect::Terraform, RuleKind::Extension, Pattern::Suffix(".tf"), 1.0),
    rule(IacDialect::Terraform, RuleKind::Extension, Pattern::Suffix(".tf.json"), 1.0),
    rule(IacDialect::Terraform, RuleKind::Extension, Pattern::Suffix(".tfvars"), 0.5),
    rule(IacDialect::Terraform, RuleKind::Extension, Pattern::Suffix(".tfvars.json"), 0.5),
    rule(IacDialect::Terraform, RuleKind::EntryFile, Pattern::FileName("main.tf"), 1.5),
    rule(IacDialect::Terraform, RuleKind::MarkerFile, Pattern::Suffix(".tfstate"), 2.0),
    rule(IacDialect::Terraform, RuleKind::MarkerFile, Pattern::Suffix(".tfstate.backup"), 2.0),
    rule(
        IacDialect::Terraform,
        RuleKind::MarkerFile,
        Pattern::FileName(".terraform.lock.hcl"),
        2.0,
    ),
    rule(IacDialect::Terraform, RuleKind::DialectDirectory, Pattern::Directory("terraform"), 0.5),
    // Bicep
    rule(IacDialect::Bicep, RuleKind::Extension, Pattern::Suffix(".bicep"), 1.0),
    rule(IacDialect::Bicep, RuleKind::Extension, Pattern::Suffix(".bicepparam"), 0.5),
    rule(IacDialect::Bicep, RuleKind::EntryFile, Pattern::FileName("main.bicep"), 1.5),
    rule(IacDialect::Bicep, RuleKind::EntryFile, Pattern::FileName("azuredeploy.bicep"), 1.5),
    rule(IacDialect::Bicep, RuleKind::MarkerFile, Pattern::FileName("bicepconfig.json"), 1.0),
    rule(IacDialect::Bicep, RuleKind::DialectDirectory, Pattern::Directory("bicep"), 0.5),
];

/// Directory names that conventionally hold infrastructure code
pub const CONVENTIONAL_DIRECTORIES: &[&str] = &["infra", "iac", "infrastructure"];

const CONVENTIONAL_DIRECTORY_BONUS: f64 = 0.5;

impl Pattern {
    fn matches(&self, file_name: &str, directories: &[String]) -> bool {
        match self {
            Pattern::Suffix(suffix) => {
                file_name.len() > suffix.len() && file_name.ends_with(suffix)
            }
            Pattern::FileName(name) => file_name == *name,
            Pattern::Directory(dir) => directories.iter().any(|d| d == dir),
        }
    }

    fn describe(&self) -> String {
        match self {
            Pattern::Suffix(suffix) => format!("*{suffix}"),
            Pattern::FileName(name) => (*name).to_string(),
            Pattern::Directory(dir) => format!("{dir}/"),
        }
    }
}

/// Split a normalized path into lowercase directory segments and file name
pub(crate) fn split_path(path: &str) -> (Vec<String>, String) {
    let mut segments: Vec<String> = path.split('/').map(|s| s.to_ascii_lowercase()).collect();
    let file_name = segments.pop().unwrap_or_default();
    (segments, file_name)
}

/// Match one normalized path against the rule table.
///
/// Evidence comes back in rule-table order so that identical listings always
/// produce identical evidence sequences.
pub(crate) fn match_path(path: &str) -> Vec<Evidence> {
    let (directories, file_name) = split_path(path);
    let mut evidence: Vec<Evidence> = RULES
        .iter()
        .filter(|rule| rule.pattern.matches(&file_name, &directories))
        .map(|rule| Evidence {
            dialect: rule.dialect,
            rule: rule.kind,
            pattern: rule.pattern.describe(),
            path: path.to_string(),
            weight: rule.weight,
        })
        .collect();

    // The conventional-directory bonus only counts for files that already
    // matched a file rule of that dialect.
    if let Some(dir) = directories
        .iter()
        .find(|d| CONVENTIONAL_DIRECTORIES.contains(&d.as_str()))
    {
        for dialect in IacDialect::ALL {
            let has_file_match = evidence.iter().any(|e| {
                e.dialect == dialect && e.rule != RuleKind::DialectDirectory
            });
            if has_file_match {
                evidence.push(Evidence {
                    dialect,
                    rule: RuleKind::ConventionalDirectory,
                    pattern: format!("{dir}/"),
                    path: path.to_string(),
                    weight: CONVENTIONAL_DIRECTORY_BONUS,
                });
            }
        }
    }

    evidence
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(evidence: &[Evidence], dialect: IacDialect) -> f64 {
        evidence.iter().filter(|e| e.dialect == dialect).map(|e| e.weight).sum()
    }

    #[test]
    fn test_main_tf_gets_extension_and_entry_weight() {
        let evidence = match_path("main.tf");
        assert_eq!(evidence.len(), 2);
        assert_eq!(total(&evidence, IacDialect::Terraform), 2.5);
    }

    #[test]
    fn test_state_file_is_a_marker() {
        let evidence = match_path("terraform.tfstate");
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].rule, RuleKind::MarkerFile);
        assert_eq!(evidence[0].weight, 2.0);
    }

    #[test]
    fn test_tfvars_does_not_match_tf_suffix() {
        let evidence = match_path("env/prod.tfvars");
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].weight, 0.5);
    }

    #[test]
    fn test_conventional_directory_bonus_requires_file_match() {
        let bonus = match_path("infra/network.bicep");
        assert!(bonus.iter().any(|e| e.rule == RuleKind::ConventionalDirectory));
        assert_eq!(total(&bonus, IacDialect::Bicep), 1.5);

        let no_bonus = match_path("infra/README.md");
        assert!(no_bonus.is_empty());
    }

    #[test]
    fn test_dialect_directory_matches_any_file_inside() {
        let evidence = match_path("terraform/README.md");
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].rule, RuleKind::DialectDirectory);
        assert_eq!(evidence[0].pattern, "terraform/");
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let evidence = match_path("Infra/AzureDeploy.Bicep");
        assert_eq!(total(&evidence, IacDialect::Bicep), 3.0);
    }

    #[test]
    fn test_unrelated_files_do_not_match() {
        assert!(match_path("src/main.rs").is_empty());
        assert!(match_path("tf").is_empty());
        assert!(match_path(".tf").is_empty());
    }
}
