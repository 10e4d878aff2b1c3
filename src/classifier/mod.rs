//! Confidence-scored infrastructure-as-code dialect classification.
//!
//! The classifier is a pure function of a repository listing: every path is
//! matched against a weighted rule table, the weights are summed per dialect,
//! and the normalized scores decide between a single dialect, `Ambiguous`,
//! or `None`.

pub mod cache;
pub mod layout;
pub mod provider;
pub mod rules;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use cache::CachedClassifier;
pub use layout::SuggestedLayout;
pub use provider::CloudProvider;
pub use rules::RuleKind;

/// Errors raised while classifying a listing
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierError {
    #[error("invalid listing path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid classifier settings: {0}")]
    InvalidSettings(String),
}

/// A concrete infrastructure-as-code dialect the classifier can detect
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IacDialect {
    Terraform,
    Bicep,
}

impl IacDialect {
    pub const ALL: [IacDialect; 2] = [IacDialect::Terraform, IacDialect::Bicep];

    pub fn as_str(&self) -> &'static str {
        match self {
            IacDialect::Terraform => "terraform",
            IacDialect::Bicep => "bicep",
        }
    }
}

impl fmt::Display for IacDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Terraform,
    Bicep,
    Ambiguous,
    None,
}

impl Dialect {
    /// The concrete dialect, if the decision named one
    pub fn detected(&self) -> Option<IacDialect> {
        match self {
            Dialect::Terraform => Some(IacDialect::Terraform),
            Dialect::Bicep => Some(IacDialect::Bicep),
            Dialect::Ambiguous | Dialect::None => None,
        }
    }
}

impl From<IacDialect> for Dialect {
    fn from(dialect: IacDialect) -> Self {
        match dialect {
            IacDialect::Terraform => Dialect::Terraform,
            IacDialect::Bicep => Dialect::Bicep,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Terraform => f.write_str("terraform"),
            Dialect::Bicep => f.write_str("bicep"),
            Dialect::Ambiguous => f.write_str("ambiguous"),
            Dialect::None => f.write_str("none"),
        }
    }
}

/// One repository-relative path, optionally with a short content snippet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl ListingEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            snippet: None,
        }
    }

    pub fn with_snippet(path: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            snippet: Some(snippet.into()),
        }
    }
}

/// Repository file listing handed to the classifier by an evidence scanner
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryListing {
    pub entries: Vec<ListingEntry>,
}

impl RepositoryListing {
    pub fn new(entries: Vec<ListingEntry>) -> Self {
        Self { entries }
    }

    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: paths.into_iter().map(ListingEntry::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Canonical form used for scoring and caching: forward slashes, no
    /// leading `./`, de-duplicated and sorted by path.
    pub fn normalized(&self) -> Result<RepositoryListing, ClassifierError> {
        let mut by_path: BTreeMap<String, Option<String>> = BTreeMap::new();
        for entry in &self.entries {
            let path = normalize_path(&entry.path)?;
            let slot = by_path.entry(path).or_insert(None);
            if slot.is_none() {
                slot.clone_from(&entry.snippet);
            }
        }
        Ok(RepositoryListing {
            entries: by_path
                .into_iter()
                .map(|(path, snippet)| ListingEntry { path, snippet })
                .collect(),
        })
    }
}

fn normalize_path(raw: &str) -> Result<String, ClassifierError> {
    let invalid = |reason: &str| ClassifierError::InvalidPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    let unified = raw.trim().replace('\\', "/");
    if unified.starts_with('/') || unified.get(1..2) == Some(":") {
        return Err(invalid("path must be relative to the repository root"));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(invalid("path must not leave the repository")),
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(invalid("path is empty"));
    }
    Ok(segments.join("/"))
}

/// A matched-rule descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub dialect: IacDialect,
    pub rule: RuleKind,
    pub pattern: String,
    pub path: String,
    pub weight: f64,
}

/// Per-dialect score and normalized confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub dialect: IacDialect,
    pub score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub dialect: Dialect,
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
    pub cloud_provider: CloudProvider,
    pub candidates: Vec<Candidate>,
    pub suggested_layout: Option<SuggestedLayout>,
}

impl ClassificationResult {
    fn none() -> Self {
        Self {
            dialect: Dialect::None,
            confidence: 0.0,
            evidence: Vec::new(),
            cloud_provider: CloudProvider::Unknown,
            candidates: Vec::new(),
            suggested_layout: None,
        }
    }

    /// Candidate with the highest confidence, ties broken by dialect order
    pub fn leading_candidate(&self) -> Option<&Candidate> {
        self.candidates.iter().fold(None, |best: Option<&Candidate>, c| match best {
            Some(b) if b.confidence >= c.confidence => Some(b),
            _ if c.score > 0.0 => Some(c),
            _ => best,
        })
    }
}

/// Decision parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// Minimum confidence for a dialect to be picked
    pub threshold: f64,
    /// Minimum confidence lead over the runner-up
    pub margin: f64,
    /// Smoothing term added to the score total
    pub epsilon: f64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            margin: 0.2,
            epsilon: 0.25,
        }
    }
}

impl ClassifierSettings {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ClassifierError::InvalidSettings(format!(
                "threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if !(0.0..1.0).contains(&self.margin) {
            return Err(ClassifierError::InvalidSettings(format!(
                "margin must be in [0, 1), got {}",
                self.margin
            )));
        }
        if self.epsilon <= 0.0 || !self.epsilon.is_finite() {
            return Err(ClassifierError::InvalidSettings(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// Pure, side-effect-free dialect classifier
#[derive(Debug, Clone)]
pub struct InfraClassifier {
    settings: ClassifierSettings,
}

impl InfraClassifier {
    pub fn new(settings: ClassifierSettings) -> Result<Self, ClassifierError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    pub fn classify(
        &self,
        listing: &RepositoryListing,
    ) -> Result<ClassificationResult, ClassifierError> {
        let listing = listing.normalized()?;
        Ok(self.classify_normalized(&listing))
    }

    pub(crate) fn classify_normalized(&self, listing: &RepositoryListing) -> ClassificationResult {
        let evidence: Vec<Evidence> = listing
            .entries
            .iter()
            .flat_map(|entry| rules::match_path(&entry.path))
            .collect();

        if evidence.is_empty() {
            return ClassificationResult::none();
        }

        let scores: Vec<(IacDialect, f64)> = IacDialect::ALL
            .iter()
            .map(|dialect| {
                let score = evidence
                    .iter()
                    .filter(|e| e.dialect == *dialect)
                    .map(|e| e.weight)
                    .sum::<f64>();
                (*dialect, score)
            })
            .collect();
        let total: f64 = scores.iter().map(|(_, score)| score).sum();
        let candidates: Vec<Candidate> = scores
            .into_iter()
            .map(|(dialect, score)| Candidate {
                dialect,
                score,
                confidence: score / (total + self.settings.epsilon),
            })
            .collect();

        let mut ranked: Vec<&Candidate> = candidates.iter().collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.dialect.cmp(&b.dialect))
        });
        let (dialect, confidence) = (ranked[0].dialect, ranked[0].confidence);
        let runner_up = ranked.get(1).map(|c| c.confidence).unwrap_or(0.0);

        let decided = confidence >= self.settings.threshold
            && confidence - runner_up >= self.settings.margin;

        if !decided {
            return ClassificationResult {
                dialect: Dialect::Ambiguous,
                confidence,
                evidence,
                cloud_provider: CloudProvider::Unknown,
                candidates,
                suggested_layout: None,
            };
        }

        ClassificationResult {
            dialect: Dialect::from(dialect),
            confidence,
            cloud_provider: provider::detect(dialect, listing),
            suggested_layout: Some(layout::suggest(dialect, listing, &evidence)),
            evidence,
            candidates,
        }
    }
}

impl Default for InfraClassifier {
    fn default() -> Self {
        Self {
            settings: ClassifierSettings::default(),
        }
    }
}
