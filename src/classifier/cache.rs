use moka::future::Cache;
use tracing::debug;

use super::{ClassificationResult, ClassifierError, InfraClassifier, RepositoryListing};
use crate::observability::engine_metrics;

/// Classifier front-end that memoizes results by normalized listing
#[derive(Debug, Clone)]
pub struct CachedClassifier {
    classifier: InfraClassifier,
    cache: Cache<RepositoryListing, ClassificationResult>,
}

impl CachedClassifier {
    pub fn new(classifier: InfraClassifier, capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(capacity).build();
        Self { classifier, cache }
    }

    pub fn classifier(&self) -> &InfraClassifier {
        &self.classifier
    }

    pub async fn classify(
        &self,
        listing: &RepositoryListing,
    ) -> Result<ClassificationResult, ClassifierError> {
        let key = listing.normalized()?;

        if let Some(cached) = self.cache.get(&key).await {
            engine_metrics().record_cache_hit();
            debug!(paths = key.len(), "Classification cache hit");
            return Ok(cached);
        }

        engine_metrics().record_cache_miss();
        let result = self.classifier.classify_normalized(&key);
        self.cache.insert(key, result.clone()).await;
        Ok(result)
    }
}
