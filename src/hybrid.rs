//! Hybrid dispatcher: LLM providers in priority order, then keyword rules

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{CircuitBreakerConfig, Config};
use crate::error::{Result, TriageError};
use crate::gemini::GeminiGenerator;
use crate::models::{ClassificationResult, EmailRecord, PrimaryService, ProviderStatus, ServiceStatus};
use crate::openai::OpenAiGenerator;
use crate::provider::{Classifier, LlmClassifier};
use crate::rate_limiter::{Gap, NoThrottle, Throttle, TokenBucketThrottle};
use crate::rules::RuleBasedClassifier;

/// Progress callback invoked once per classified record
pub type ProgressCallback = Arc<dyn Fn() + Send + Sync>;

/// Source label for results produced by the keyword rules
pub const RULES_SOURCE: &str = "rules";

/// Source label for the hardcoded safe result
pub const DEFAULT_SOURCE: &str = "default";

const SERVICE_NAME: &str = "HybridClassifier";

/// A result together with the classifier that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub result: ClassificationResult,
    pub source: String,
}

struct ProviderSlot {
    classifier: Arc<dyn Classifier>,
    breaker: CircuitBreaker,
}

/// Classifies emails with the first provider that answers
///
/// Built once from configuration and shared behind an `Arc`; only the
/// circuit breakers and the throttle carry mutable state.
pub struct HybridClassifier {
    providers: Vec<ProviderSlot>,
    rules: Arc<RuleBasedClassifier>,
    throttle: Arc<dyn Throttle>,
    rule_fallback: bool,
    default_batch_size: usize,
}

impl HybridClassifier {
    /// Providers are tried in the order given
    pub fn new(providers: Vec<Arc<dyn Classifier>>, rules: Arc<RuleBasedClassifier>) -> Self {
        let breaker_config = CircuitBreakerConfig::default();
        let providers = providers
            .into_iter()
            .map(|classifier| ProviderSlot {
                breaker: CircuitBreaker::new(classifier.name(), breaker_config.clone()),
                classifier,
            })
            .collect();

        Self {
            providers,
            rules,
            throttle: Arc::new(NoThrottle),
            rule_fallback: true,
            default_batch_size: 5,
        }
    }

    /// Build providers, throttle and breakers from configuration
    ///
    /// Providers without a usable API key are left out of the chain.
    pub fn from_config(config: &Config) -> Result<Self> {
        let rules = Arc::new(RuleBasedClassifier::new(
            &config.classification.organization_domain,
        ));
        let timeout = Duration::from_secs(config.providers.request_timeout_secs);

        let mut providers: Vec<Arc<dyn Classifier>> = Vec::new();
        if let Some(generator) = OpenAiGenerator::from_config(&config.providers.openai, timeout)? {
            providers.push(Arc::new(LlmClassifier::new(generator, Arc::clone(&rules))));
        }
        if let Some(generator) = GeminiGenerator::from_config(&config.providers.gemini, timeout)? {
            providers.push(Arc::new(LlmClassifier::new(generator, Arc::clone(&rules))));
        }

        if providers.is_empty() {
            warn!("No LLM provider configured, classifying with keyword rules only");
        }

        let throttle: Arc<dyn Throttle> = if config.throttle.enabled {
            Arc::new(TokenBucketThrottle::from_config(&config.throttle))
        } else {
            Arc::new(NoThrottle)
        };

        let mut classifier = Self::new(providers, rules)
            .with_throttle(throttle)
            .with_rule_fallback(config.classification.rule_fallback)
            .with_breaker_config(config.circuit_breaker.clone());
        classifier.default_batch_size = config.classification.batch_size;
        Ok(classifier)
    }

    pub fn with_throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    /// When disabled, exhausted providers yield the safe default instead
    pub fn with_rule_fallback(mut self, enabled: bool) -> Self {
        self.rule_fallback = enabled;
        self
    }

    /// Replace every provider's breaker with a fresh one using `config`
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        for slot in &mut self.providers {
            slot.breaker = CircuitBreaker::new(slot.classifier.name(), config.clone());
        }
        self
    }

    pub fn rules(&self) -> &RuleBasedClassifier {
        &self.rules
    }

    /// Batch size from configuration
    pub fn default_batch_size(&self) -> usize {
        self.default_batch_size
    }

    /// Classify one record; never fails
    pub async fn classify_email(&self, record: &EmailRecord) -> ClassificationResult {
        self.classify_sourced(record).await.result
    }

    /// Classify one record and report which classifier answered
    pub async fn classify_sourced(&self, record: &EmailRecord) -> Classified {
        for slot in &self.providers {
            let name = slot.classifier.name();

            if let Err(e) = slot.breaker.check_request().await {
                debug!(provider = name, error = %e, "Skipping provider");
                continue;
            }

            info!(provider = name, "Classifying with provider");
            match slot.classifier.classify(record).await {
                Ok(result) => {
                    slot.breaker.record_success().await;
                    return Classified {
                        result,
                        source: name.to_string(),
                    };
                }
                Err(e) => {
                    warn!(provider = name, error = %e, "Provider classification failed");
                    slot.breaker.record_failure(&e).await;
                }
            }
        }

        if !self.providers.is_empty() {
            warn!("All LLM providers failed");
        }
        self.fallback(record)
    }

    fn fallback(&self, record: &EmailRecord) -> Classified {
        if self.rule_fallback {
            debug!("Using keyword rules");
            Classified {
                result: self.rules.classify(record),
                source: RULES_SOURCE.to_string(),
            }
        } else {
            Classified {
                result: ClassificationResult::safe_default(
                    "AI services not available - using basic classification",
                ),
                source: DEFAULT_SOURCE.to_string(),
            }
        }
    }

    /// Classify every record, pacing calls through the throttle
    ///
    /// Returns exactly one result per record, in input order.
    pub async fn classify_batch(
        &self,
        records: &[EmailRecord],
        batch_size: usize,
    ) -> Vec<ClassificationResult> {
        // The sender outlives the call, so the batch can never be cancelled
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        match self.classify_records(records, batch_size, cancel_rx, None).await {
            Ok(classified) => classified.into_iter().map(|c| c.result).collect(),
            Err(e) => {
                warn!(error = %e, "Uncancellable batch stopped early, filling with fallback");
                records.iter().map(|r| self.fallback(r).result).collect()
            }
        }
    }

    /// Like [`classify_batch`](Self::classify_batch), but stops as soon as
    /// `cancel` turns true
    pub async fn classify_batch_until(
        &self,
        records: &[EmailRecord],
        batch_size: usize,
        cancel: watch::Receiver<bool>,
    ) -> Result<Vec<ClassificationResult>> {
        let classified = self.classify_records(records, batch_size, cancel, None).await?;
        Ok(classified.into_iter().map(|c| c.result).collect())
    }

    /// Cancellable batch that keeps result sources and reports progress
    pub async fn classify_records(
        &self,
        records: &[EmailRecord],
        batch_size: usize,
        cancel: watch::Receiver<bool>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<Classified>> {
        let mut results = Vec::with_capacity(records.len());
        self.classify_records_into(records, batch_size, cancel, on_progress, &mut results)
            .await?;
        Ok(results)
    }

    /// Like [`classify_records`](Self::classify_records), appending to
    /// `results` as it goes
    ///
    /// On cancellation `results` keeps the completed prefix.
    pub async fn classify_records_into(
        &self,
        records: &[EmailRecord],
        batch_size: usize,
        mut cancel: watch::Receiver<bool>,
        on_progress: Option<ProgressCallback>,
        results: &mut Vec<Classified>,
    ) -> Result<()> {
        let batch_size = batch_size.max(1);
        let total_batches = records.len().div_ceil(batch_size);
        let start = results.len();

        for (index, record) in records.iter().enumerate() {
            if index > 0 {
                self.pace_or_cancel(Gap::Request, &mut cancel, results.len() - start)
                    .await?;
            }

            if index % batch_size == 0 {
                if index > 0 {
                    self.pace_or_cancel(Gap::Batch, &mut cancel, results.len() - start)
                        .await?;
                }
                info!(
                    "Processing batch {}/{}, emails {}-{}",
                    index / batch_size + 1,
                    total_batches,
                    index + 1,
                    (index + batch_size).min(records.len())
                );
            }

            if *cancel.borrow() {
                return Err(TriageError::OperationCancelled {
                    completed: results.len() - start,
                });
            }

            results.push(self.classify_sourced(record).await);
            if let Some(callback) = &on_progress {
                callback();
            }
        }

        info!("Completed batch classification of {} emails", records.len());
        Ok(())
    }

    async fn pace_or_cancel(
        &self,
        gap: Gap,
        cancel: &mut watch::Receiver<bool>,
        completed: usize,
    ) -> Result<()> {
        if *cancel.borrow() {
            return Err(TriageError::OperationCancelled { completed });
        }

        tokio::select! {
            _ = self.throttle.pace(gap) => Ok(()),
            _ = cancelled(cancel) => {
                info!(completed, "Batch cancelled");
                Err(TriageError::OperationCancelled { completed })
            }
        }
    }

    /// Which providers are configured and what state their breakers are in
    pub async fn get_status(&self) -> ServiceStatus {
        let mut providers = Vec::with_capacity(self.providers.len());
        for slot in &self.providers {
            providers.push(ProviderStatus {
                name: slot.classifier.name().to_string(),
                model: slot.classifier.model().to_string(),
                circuit_state: slot.breaker.state().await,
            });
        }

        let openai_available = providers.iter().any(|p| p.name == "openai");
        let gemini_available = providers.iter().any(|p| p.name == "gemini");

        ServiceStatus {
            service: SERVICE_NAME.to_string(),
            openai_available,
            gemini_available,
            primary_service: PrimaryService::select(openai_available, gemini_available),
            rule_fallback_enabled: self.rule_fallback,
            providers,
        }
    }
}

/// Resolves once the flag is true; never resolves if the sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|flag| *flag).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
