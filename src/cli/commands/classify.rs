use anyhow::Result;
use std::path::PathBuf;

use super::{scan_repository, Command};
use crate::classifier::{CachedClassifier, InfraClassifier};
use crate::config::ConductorConfig;

pub struct ClassifyCommand {
    pub path: PathBuf,
    pub use_git_index: bool,
    pub json: bool,
    pub config: ConductorConfig,
}

impl Command for ClassifyCommand {
    async fn execute(&self) -> Result<()> {
        let listing = scan_repository(&self.path, self.use_git_index).await?;
        let classifier = CachedClassifier::new(
            InfraClassifier::new(self.config.classifier_settings())?,
            self.config.classifier.cache_capacity,
        );
        let result = classifier.classify(&listing).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }

        println!("🔎 {} ({} entries scanned)", self.path.display(), listing.len());
        println!("   Dialect: {}", result.dialect);
        println!("   Confidence: {:.2}", result.confidence);
        if let Some(provider) = result.cloud_provider.name() {
            println!("   Cloud provider: {provider}");
        }
        for candidate in &result.candidates {
            println!(
                "   • {} score {:.2} confidence {:.2}",
                candidate.dialect, candidate.score, candidate.confidence
            );
        }
        if let Some(layout) = &result.suggested_layout {
            println!("   📁 IaC directory: {}", layout.iac_dir);
        }
        Ok(())
    }
}
