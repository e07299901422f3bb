use chrono::Utc;
use log::{info, warn};
use shared::{CategorizationResult, ImageCategory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use super::{ClassificationError, Classifier, RawCategorization};
use crate::config::Settings;

const MAX_CATEGORIES: usize = 5;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub timeout: Duration,
    /// Bound on a readiness round-trip, kept well below `timeout`.
    pub health_timeout: Duration,
    pub confidence_threshold: f32,
    pub allowed_categories: Vec<String>,
    pub max_categories: usize,
}

impl GatewayConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.remote_timeout(),
            health_timeout: HEALTH_CHECK_TIMEOUT.min(settings.remote_timeout()),
            confidence_threshold: settings.confidence_threshold,
            allowed_categories: settings
                .allowed_categories
                .iter()
                .map(|c| c.to_lowercase())
                .collect(),
            max_categories: MAX_CATEGORIES,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Boundary around the remote classifier: one bounded call per image, with
/// the answer ordered and checked before anyone else sees it.
#[derive(Clone)]
pub struct ClassifierGateway {
    classifier: Arc<dyn Classifier>,
    config: GatewayConfig,
}

impl ClassifierGateway {
    pub fn new(classifier: Arc<dyn Classifier>, config: GatewayConfig) -> Self {
        Self { classifier, config }
    }

    pub fn is_configured(&self) -> bool {
        self.classifier.is_configured()
    }

    pub async fn check_health(&self) -> bool {
        timeout(self.config.health_timeout, self.classifier.check_health())
            .await
            .unwrap_or(false)
    }

    pub async fn classify(
        &self,
        image: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> Result<CategorizationResult, ClassificationError> {
        let started = Instant::now();
        let raw = match timeout(self.config.timeout, self.classifier.classify(image, mime_type)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                warn!("Classifier call failed for {}: {}", filename, err);
                return Err(err);
            }
            Err(_) => {
                warn!(
                    "Classifier call for {} exceeded {:?}",
                    filename, self.config.timeout
                );
                return Err(ClassificationError::timeout(format!(
                    "Classifier did not respond within {} seconds",
                    self.config.timeout.as_secs_f64()
                )));
            }
        };
        info!(
            "Classifier responded: filename={} duration_ms={}",
            filename,
            started.elapsed().as_millis()
        );

        let result = self.finalize(raw, filename)?;
        info!(
            "Image categorized: filename={} primary_category={} category_matched={} num_categories={}",
            filename,
            result.primary_category,
            result.category_matched,
            result.categories.len()
        );
        Ok(result)
    }

    fn finalize(
        &self,
        raw: RawCategorization,
        filename: &str,
    ) -> Result<CategorizationResult, ClassificationError> {
        let mut categories: Vec<ImageCategory> = raw
            .categories
            .into_iter()
            .map(|mut category| {
                category.name = category.name.trim().to_string();
                category.confidence = if category.confidence.is_nan() {
                    0.0
                } else {
                    category.confidence.clamp(0.0, 1.0)
                };
                category
            })
            .filter(|category| !category.name.is_empty())
            .collect();

        if categories.is_empty() {
            return Err(ClassificationError::malformed(
                "Classifier returned no categories",
            ));
        }

        categories.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let threshold = self.config.confidence_threshold;
        if categories.iter().any(|c| c.confidence >= threshold) {
            categories.retain(|c| c.confidence >= threshold);
        }
        categories.truncate(self.config.max_categories.max(1));

        let primary_category = categories[0].name.clone();
        let category_matched = categories.iter().any(|c| {
            self.config
                .allowed_categories
                .contains(&c.name.to_lowercase())
        });

        Ok(CategorizationResult {
            filename: filename.to_string(),
            categories,
            primary_category,
            category_matched,
            raw_analysis: raw.summary,
            bill_recognised: raw.bill_recognised,
            bill_details: raw.bill_details.unwrap_or_default(),
            processed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::{category, MockClassifier};
    use shared::ErrorKind;

    fn gateway(mock: MockClassifier) -> ClassifierGateway {
        ClassifierGateway::new(Arc::new(mock), GatewayConfig::default())
    }

    #[tokio::test]
    async fn orders_categories_and_picks_primary() {
        let gateway = gateway(MockClassifier::returning(vec![
            category("medical", 0.75),
            category("receipt", 0.95),
            category("blurry", 0.2),
        ]));

        let result = gateway.classify(b"img", "image/jpeg", "r.jpg").await.unwrap();

        let names: Vec<_> = result.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["receipt", "medical"]);
        assert_eq!(result.primary_category, "receipt");
        assert!(result.category_matched);
        assert_eq!(result.filename, "r.jpg");
    }

    #[tokio::test]
    async fn keeps_low_confidence_answer_when_nothing_passes_threshold() {
        let gateway = gateway(MockClassifier::returning(vec![
            category("landscape", 0.4),
            category("travel", 0.5),
        ]));

        let result = gateway.classify(b"img", "image/png", "v.png").await.unwrap();

        assert_eq!(result.primary_category, "travel");
        assert_eq!(result.categories.len(), 2);
        assert!(!result.category_matched);
    }

    #[tokio::test]
    async fn clamps_out_of_range_confidence() {
        let gateway = gateway(MockClassifier::returning(vec![category("fuel", 1.7)]));
        let result = gateway.classify(b"img", "image/png", "f.png").await.unwrap();
        assert_eq!(result.categories[0].confidence, 1.0);
    }

    #[tokio::test]
    async fn empty_label_set_is_malformed() {
        let gateway = gateway(MockClassifier::returning(Vec::new()));
        let err = gateway.classify(b"img", "image/png", "e.png").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn slow_classifier_times_out() {
        let config = GatewayConfig {
            timeout: Duration::from_millis(50),
            ..GatewayConfig::default()
        };
        let gateway = ClassifierGateway::new(
            Arc::new(MockClassifier::slow(Duration::from_secs(5))),
            config,
        );

        let err = gateway.classify(b"img", "image/png", "s.png").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RemoteTimeout);
    }

    #[tokio::test]
    async fn stalled_health_check_gives_up_before_classify_timeout() {
        let config = GatewayConfig {
            timeout: Duration::from_secs(60),
            health_timeout: Duration::from_millis(50),
            ..GatewayConfig::default()
        };
        let gateway = ClassifierGateway::new(
            Arc::new(MockClassifier::slow(Duration::from_secs(30))),
            config,
        );

        let healthy = tokio::time::timeout(Duration::from_secs(2), gateway.check_health())
            .await
            .expect("health check not bounded by health_timeout");
        assert!(!healthy);
    }

    #[test]
    fn health_timeout_defaults_to_a_few_seconds() {
        let config = GatewayConfig::default();
        assert_eq!(config.health_timeout, Duration::from_secs(5));
        assert!(config.health_timeout < config.timeout);
    }

    #[tokio::test]
    async fn remote_failure_passes_through_unchanged() {
        let gateway = gateway(MockClassifier::failing(ErrorKind::RemoteRateLimited));
        let err = gateway.classify(b"img", "image/png", "x.png").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RemoteRateLimited);
    }
}
