use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, TriageError};
use crate::hybrid::Classified;
use crate::models::{ClassificationResult, EmailRecord};
use crate::stats::{get_classification_stats, ClassificationStats};

/// One persisted classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredClassification {
    pub record: EmailRecord,
    pub result: ClassificationResult,
    /// Classifier that produced the result (`openai`, `gemini`, `rules`, `default`)
    pub source: String,
    pub classified_at: DateTime<Utc>,
}

/// JSON file of classification results, one entry per email
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationStore {
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entries: BTreeMap<String, StoredClassification>,
}

impl ClassificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable key for a record: its id, or sender, date and subject
    pub fn record_key(record: &EmailRecord) -> String {
        match record.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!(
                "{}|{}|{}",
                record.sender_email, record.received_at, record.subject
            ),
        }
    }

    /// Store a result, replacing any earlier one for the same email
    ///
    /// Returns true when an earlier result was replaced.
    pub fn upsert(&mut self, record: &EmailRecord, classified: Classified) -> bool {
        let now = Utc::now();
        let entry = StoredClassification {
            record: record.clone(),
            result: classified.result,
            source: classified.source,
            classified_at: now,
        };
        self.updated_at = Some(now);
        self.entries.insert(Self::record_key(record), entry).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&StoredClassification> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn results(&self) -> Vec<ClassificationResult> {
        self.entries.values().map(|e| e.result.clone()).collect()
    }

    pub fn stats(&self) -> ClassificationStats {
        get_classification_stats(&self.results())
    }

    /// Save the store to disk
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Readers never see a half-written store
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        tracing::debug!("Saved {} classifications to {:?}", self.len(), path);
        Ok(())
    }

    /// Load the store from disk; a missing file is an empty store
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No existing store at {:?}, starting empty", path);
            return Ok(Self::new());
        }

        let json = tokio::fs::read_to_string(path).await?;
        let store: Self = serde_json::from_str(&json).map_err(|e| {
            TriageError::StoreError(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        tracing::info!("Loaded {} classifications from {:?}", store.len(), path);
        Ok(store)
    }
}
