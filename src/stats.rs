//! Aggregate statistics over classification results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ClassificationResult, EmailType, SenderType, UrgencyCategory};

/// Confidence at or above this counts as high confidence
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationStats {
    pub total_classified: usize,
    /// Every tier is present, zero when unseen
    pub by_urgency: BTreeMap<UrgencyCategory, usize>,
    pub by_sender_type: BTreeMap<SenderType, usize>,
    pub by_email_type: BTreeMap<EmailType, usize>,
    /// Rounded to 3 decimals
    pub avg_confidence: f64,
    pub high_confidence_count: usize,
    /// Percentage of results at high confidence, rounded to 1 decimal
    pub high_confidence_percentage: f64,
    pub requires_immediate_action: usize,
}

impl Default for ClassificationStats {
    fn default() -> Self {
        Self {
            total_classified: 0,
            by_urgency: UrgencyCategory::ALL.iter().map(|u| (*u, 0)).collect(),
            by_sender_type: SenderType::ALL.iter().map(|s| (*s, 0)).collect(),
            by_email_type: EmailType::ALL.iter().map(|e| (*e, 0)).collect(),
            avg_confidence: 0.0,
            high_confidence_count: 0,
            high_confidence_percentage: 0.0,
            requires_immediate_action: 0,
        }
    }
}

/// Summarize a set of results; empty input yields all-zero stats
pub fn get_classification_stats(results: &[ClassificationResult]) -> ClassificationStats {
    let mut stats = ClassificationStats::default();
    if results.is_empty() {
        return stats;
    }

    let mut total_confidence = 0.0;
    for result in results {
        *stats.by_urgency.entry(result.urgency_category).or_default() += 1;
        *stats.by_sender_type.entry(result.sender_type).or_default() += 1;
        *stats.by_email_type.entry(result.email_type).or_default() += 1;

        total_confidence += result.confidence_score;
        if result.confidence_score >= HIGH_CONFIDENCE_THRESHOLD {
            stats.high_confidence_count += 1;
        }
        if result.requires_immediate_action {
            stats.requires_immediate_action += 1;
        }
    }

    let total = results.len() as f64;
    stats.total_classified = results.len();
    stats.avg_confidence = round_to(total_confidence / total, 3);
    stats.high_confidence_percentage =
        round_to(stats.high_confidence_count as f64 / total * 100.0, 1);
    stats
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
