//! Classifier capability and the LLM-backed implementation

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, TriageError};
use crate::models::{ClassificationResult, EmailRecord};
use crate::prompt::{build_classification_prompt, parse_classification_response};
use crate::rules::RuleBasedClassifier;

/// Raw text completion against an LLM API
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short provider label used in logs and status reports
    fn name(&self) -> &str;

    /// Model identifier sent with each request
    fn model(&self) -> &str;

    /// Send one prompt and return the model's text answer
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Anything that can turn an EmailRecord into a ClassificationResult
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Classify one record, failing when the backing service cannot answer
    async fn classify(&self, record: &EmailRecord) -> Result<ClassificationResult>;
}

/// Classifier that prompts an LLM and parses its JSON answer
pub struct LlmClassifier<G> {
    generator: G,
    rules: Arc<RuleBasedClassifier>,
}

impl<G: TextGenerator> LlmClassifier<G> {
    pub fn new(generator: G, rules: Arc<RuleBasedClassifier>) -> Self {
        Self { generator, rules }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Classify with the LLM, using the keyword rules on any failure
    pub async fn classify_or_fallback(&self, record: &EmailRecord) -> ClassificationResult {
        match self.classify_with_llm(record).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    provider = self.generator.name(),
                    error = %e,
                    "LLM classification failed, using keyword rules"
                );
                self.rules.classify(record)
            }
        }
    }

    async fn classify_with_llm(&self, record: &EmailRecord) -> Result<ClassificationResult> {
        let prompt = build_classification_prompt(record);
        debug!(
            provider = self.generator.name(),
            prompt_chars = prompt.chars().count(),
            "Sending classification prompt"
        );

        let answer = self.generator.generate(&prompt).await?;
        if answer.trim().is_empty() {
            return Err(TriageError::EmptyResponse(self.generator.name().to_string()));
        }

        parse_classification_response(&answer, self.rules.detect_sender_type(record))
    }
}

#[async_trait]
impl<G: TextGenerator> Classifier for LlmClassifier<G> {
    fn name(&self) -> &str {
        self.generator.name()
    }

    fn model(&self) -> &str {
        self.generator.model()
    }

    async fn classify(&self, record: &EmailRecord) -> Result<ClassificationResult> {
        self.classify_with_llm(record).await
    }
}

#[async_trait]
impl Classifier for RuleBasedClassifier {
    fn name(&self) -> &str {
        "rules"
    }

    fn model(&self) -> &str {
        "keywords"
    }

    async fn classify(&self, record: &EmailRecord) -> Result<ClassificationResult> {
        Ok(RuleBasedClassifier::classify(self, record))
    }
}
