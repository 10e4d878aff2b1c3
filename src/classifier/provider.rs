use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::{rules::split_path, IacDialect, ListingEntry, RepositoryListing};

/// Cloud provider targeted by the detected infrastructure code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum CloudProvider {
    Known(String),
    Unknown,
}

impl CloudProvider {
    pub fn name(&self) -> Option<&str> {
        match self {
            CloudProvider::Known(name) => Some(name),
            CloudProvider::Unknown => None,
        }
    }
}

/// Patterns that capture a provider name in Terraform declarations, cached using OnceLock
static PROVIDER_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn provider_patterns() -> &'static Vec<Regex> {
    PROVIDER_PATTERNS.get_or_init(|| {
        let patterns = [
            r#"provider\s+"([A-Za-z0-9_-]+)""#,
            r#"source\s*=\s*"(?:[A-Za-z0-9_.-]+/)?[A-Za-z0-9_-]+/([A-Za-z0-9_-]+)""#,
        ];

        patterns
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

fn provider_family(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "azurerm" | "azuread" | "azapi" => Some("azure"),
        "aws" => Some("aws"),
        "google" | "google-beta" => Some("gcp"),
        _ => None,
    }
}

/// Declaration files first: `*provider*`, then `versions.tf`, then `main.tf`, then the rest
fn scan_priority(entry: &ListingEntry) -> u8 {
    let (_, file_name) = split_path(&entry.path);
    if file_name.contains("provider") {
        0
    } else if file_name == "versions.tf" {
        1
    } else if file_name == "main.tf" {
        2
    } else {
        3
    }
}

/// Best-effort cloud provider detection.
///
/// Bicep only targets Azure. For Terraform, snippets of `.tf` files are
/// searched for provider blocks and `required_providers` sources; finding
/// nothing recognizable yields `Unknown`.
pub fn detect(dialect: IacDialect, listing: &RepositoryListing) -> CloudProvider {
    if dialect == IacDialect::Bicep {
        return CloudProvider::Known("azure".to_string());
    }

    let mut sources: Vec<(&ListingEntry, &str)> = listing
        .entries
        .iter()
        .filter(|entry| {
            let (_, file_name) = split_path(&entry.path);
            file_name.ends_with(".tf") || file_name.ends_with(".tf.json")
        })
        .filter_map(|entry| entry.snippet.as_deref().map(|snippet| (entry, snippet)))
        .collect();
    sources.sort_by_key(|(entry, _)| (scan_priority(entry), entry.path.clone()));

    for (_, snippet) in sources {
        // Earliest declaration in the file wins across both patterns.
        let mut found: Vec<(usize, &str)> = provider_patterns()
            .iter()
            .flat_map(|pattern| pattern.captures_iter(snippet))
            .filter_map(|captures| captures.get(1))
            .filter_map(|m| provider_family(m.as_str()).map(|family| (m.start(), family)))
            .collect();
        found.sort();
        if let Some((_, family)) = found.first() {
            return CloudProvider::Known((*family).to_string());
        }
    }

    CloudProvider::Unknown
}
