//! Email Triage
//!
//! Urgency classification for an institutional inbox. Each email is rated
//! `urgent`, `high`, `medium` or `low` together with the sender's role, the
//! kind of email and whether the directorate must act right away.
//!
//! # Overview
//!
//! - **Hybrid dispatch**: OpenAI first, Gemini second, keyword rules last
//! - **Keyword rules**: deterministic Spanish keyword classifier, always available
//! - **Pacing**: token-bucket throttle between calls, cancellable batches
//! - **Resilience**: per-provider circuit breakers skip failing providers
//! - **Delivery**: REST API, CLI, and a JSON result store
//!
//! # Example Usage
//!
//! ```no_run
//! use email_triage::{config::Config, hybrid::HybridClassifier, models::EmailRecord};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let classifier = HybridClassifier::from_config(&config)?;
//!
//!     let record = EmailRecord {
//!         sender_email: "alumno@uss.cl".to_string(),
//!         subject: "Accidente en laboratorio".to_string(),
//!         ..Default::default()
//!     };
//!     let result = classifier.classify_email(&record).await;
//!     println!("{} ({:.2})", result.urgency_category, result.confidence_score);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`models`] - Email records, results and the classification taxonomy
//! - [`rules`] - Keyword rule classifier
//! - [`prompt`] - Prompt template and LLM answer parsing
//! - [`provider`] - `Classifier` and `TextGenerator` traits, LLM classifier
//! - [`openai`] / [`gemini`] - HTTP backends
//! - [`hybrid`] - Provider chain with fallback and batch pacing
//! - [`rate_limiter`] - Token bucket throttle
//! - [`circuit_breaker`] - Per-provider circuit breaker
//! - [`stats`] - Aggregates over results
//! - [`store`] - JSON result store
//! - [`server`] - REST API
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases

pub mod circuit_breaker;
pub mod cli;
pub mod config;
pub mod error;
pub mod gemini;
pub mod hybrid;
pub mod models;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod rate_limiter;
pub mod rules;
pub mod server;
pub mod stats;
pub mod store;

// Re-export commonly used types for convenience
pub use error::{Result, TriageError};

// Core data models
pub use models::{
    ClassificationResult, EmailRecord, EmailType, PrimaryService, SenderType, ServiceStatus,
    UrgencyCategory,
};

// Classifiers
pub use hybrid::{Classified, HybridClassifier};
pub use provider::{Classifier, LlmClassifier, TextGenerator};
pub use rules::{KeywordRules, RuleBasedClassifier};

// Config types
pub use config::Config;

// Aggregates and persistence
pub use stats::{get_classification_stats, ClassificationStats};
pub use store::ClassificationStore;
