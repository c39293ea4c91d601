use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::circuit_breaker::CircuitState;

/// Email metadata handed to the classifiers
///
/// Mirrors what the ingestion side stores for each message. Every text field
/// defaults to empty so partially populated records still classify.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body_preview: String,
    /// ISO-8601 text as received from the mail provider
    #[serde(default)]
    pub received_at: String,
}

/// Urgency tier, ordered by required response latency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyCategory {
    Urgent,
    High,
    Medium,
    Low,
}

impl UrgencyCategory {
    pub const ALL: [UrgencyCategory; 4] = [
        UrgencyCategory::Urgent,
        UrgencyCategory::High,
        UrgencyCategory::Medium,
        UrgencyCategory::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyCategory::Urgent => "urgent",
            UrgencyCategory::High => "high",
            UrgencyCategory::Medium => "medium",
            UrgencyCategory::Low => "low",
        }
    }

    /// Case-insensitive parse; anything unrecognized becomes `Medium`
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "urgent" => UrgencyCategory::Urgent,
            "high" => UrgencyCategory::High,
            "low" => UrgencyCategory::Low,
            _ => UrgencyCategory::Medium,
        }
    }

    /// Urgent and high tiers need the directorate to act right away
    pub fn requires_immediate_action(&self) -> bool {
        matches!(self, UrgencyCategory::Urgent | UrgencyCategory::High)
    }
}

impl fmt::Display for UrgencyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of the person who sent the email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Estudiante,
    Profesor,
    Administracion,
    Externo,
}

impl SenderType {
    pub const ALL: [SenderType; 4] = [
        SenderType::Estudiante,
        SenderType::Profesor,
        SenderType::Administracion,
        SenderType::Externo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Estudiante => "estudiante",
            SenderType::Profesor => "profesor",
            SenderType::Administracion => "administracion",
            SenderType::Externo => "externo",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "estudiante" => Some(SenderType::Estudiante),
            "profesor" => Some(SenderType::Profesor),
            "administracion" | "administración" => Some(SenderType::Administracion),
            "externo" => Some(SenderType::Externo),
            _ => None,
        }
    }
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad kind of email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailType {
    Academico,
    Administrativo,
    Personal,
    Emergencia,
}

impl EmailType {
    pub const ALL: [EmailType; 4] = [
        EmailType::Academico,
        EmailType::Administrativo,
        EmailType::Personal,
        EmailType::Emergencia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmailType::Academico => "academico",
            EmailType::Administrativo => "administrativo",
            EmailType::Personal => "personal",
            EmailType::Emergencia => "emergencia",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "academico" | "académico" => Some(EmailType::Academico),
            "administrativo" => Some(EmailType::Administrativo),
            "personal" => Some(EmailType::Personal),
            "emergencia" => Some(EmailType::Emergencia),
            _ => None,
        }
    }
}

impl fmt::Display for EmailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one EmailRecord
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub urgency_category: UrgencyCategory,
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence_score: f64,
    pub reasoning: String,
    pub sender_type: SenderType,
    pub email_type: EmailType,
    pub requires_immediate_action: bool,
    pub suggested_deadline: Option<NaiveDateTime>,
}

impl ClassificationResult {
    /// Build a result, clamping confidence into [0, 1]
    pub fn new(
        urgency_category: UrgencyCategory,
        confidence_score: f64,
        reasoning: impl Into<String>,
        sender_type: SenderType,
        email_type: EmailType,
    ) -> Self {
        Self {
            urgency_category,
            confidence_score: clamp_confidence(confidence_score),
            reasoning: reasoning.into(),
            sender_type,
            email_type,
            requires_immediate_action: urgency_category.requires_immediate_action(),
            suggested_deadline: None,
        }
    }

    /// Hardcoded result used when every classifier is exhausted
    pub fn safe_default(reasoning: impl Into<String>) -> Self {
        Self {
            urgency_category: UrgencyCategory::Medium,
            confidence_score: 0.5,
            reasoning: reasoning.into(),
            sender_type: SenderType::Externo,
            email_type: EmailType::Academico,
            requires_immediate_action: false,
            suggested_deadline: None,
        }
    }
}

/// Clamp a confidence value into [0, 1]; NaN becomes 0
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn deserialize_confidence<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(clamp_confidence)
}

/// Which classifier the dispatcher will try first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryService {
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    Fallback,
}

impl PrimaryService {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimaryService::OpenAi => "openai",
            PrimaryService::Gemini => "gemini",
            PrimaryService::Fallback => "fallback",
        }
    }

    /// Priority order: openai > gemini > rule-based fallback
    pub fn select(openai_available: bool, gemini_available: bool) -> Self {
        if openai_available {
            PrimaryService::OpenAi
        } else if gemini_available {
            PrimaryService::Gemini
        } else {
            PrimaryService::Fallback
        }
    }
}

impl fmt::Display for PrimaryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-provider entry in the status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub model: String,
    pub circuit_state: CircuitState,
}

/// Snapshot of which classifiers are usable right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: String,
    pub openai_available: bool,
    pub gemini_available: bool,
    pub primary_service: PrimaryService,
    pub rule_fallback_enabled: bool,
    pub providers: Vec<ProviderStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_record_defaults_missing_fields() {
        let record: EmailRecord =
            serde_json::from_str(r#"{"subject": "Consulta", "sender_email": "a@uss.cl"}"#)
                .unwrap();

        assert_eq!(record.subject, "Consulta");
        assert_eq!(record.sender_email, "a@uss.cl");
        assert!(record.id.is_none());
        assert!(record.body_preview.is_empty());
        assert!(record.received_at.is_empty());
    }

    #[test]
    fn test_urgency_normalize() {
        assert_eq!(UrgencyCategory::normalize("URGENT"), UrgencyCategory::Urgent);
        assert_eq!(UrgencyCategory::normalize(" High "), UrgencyCategory::High);
        assert_eq!(UrgencyCategory::normalize("low"), UrgencyCategory::Low);
        assert_eq!(UrgencyCategory::normalize("critical"), UrgencyCategory::Medium);
        assert_eq!(UrgencyCategory::normalize(""), UrgencyCategory::Medium);
    }

    #[test]
    fn test_immediate_action_tiers() {
        assert!(UrgencyCategory::Urgent.requires_immediate_action());
        assert!(UrgencyCategory::High.requires_immediate_action());
        assert!(!UrgencyCategory::Medium.requires_immediate_action());
        assert!(!UrgencyCategory::Low.requires_immediate_action());
    }

    #[test]
    fn test_taxonomy_parse_accepts_accents() {
        assert_eq!(SenderType::parse("Administración"), Some(SenderType::Administracion));
        assert_eq!(EmailType::parse("Académico"), Some(EmailType::Academico));
        assert_eq!(SenderType::parse("alumno"), None);
        assert_eq!(EmailType::parse("spam"), None);
    }

    #[test]
    fn test_result_serializes_seven_keys() {
        let result = ClassificationResult::new(
            UrgencyCategory::High,
            0.8,
            "Reunión hoy",
            SenderType::Profesor,
            EmailType::Administrativo,
        );

        let value = serde_json::to_value(&result).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 7);
        assert_eq!(object["urgency_category"], "high");
        assert_eq!(object["sender_type"], "profesor");
        assert_eq!(object["email_type"], "administrativo");
        assert_eq!(object["requires_immediate_action"], true);
        assert!(object["suggested_deadline"].is_null());
    }

    #[test]
    fn test_result_new_clamps_confidence() {
        let high = ClassificationResult::new(
            UrgencyCategory::Low,
            1.7,
            "",
            SenderType::Externo,
            EmailType::Personal,
        );
        assert_eq!(high.confidence_score, 1.0);

        let nan = ClassificationResult::new(
            UrgencyCategory::Low,
            f64::NAN,
            "",
            SenderType::Externo,
            EmailType::Personal,
        );
        assert_eq!(nan.confidence_score, 0.0);
    }

    #[test]
    fn test_deserialized_confidence_is_clamped() {
        let result: ClassificationResult = serde_json::from_str(
            r#"{
                "urgency_category": "high",
                "confidence_score": 5.0,
                "reasoning": "",
                "sender_type": "profesor",
                "email_type": "academico",
                "requires_immediate_action": true
            }"#,
        )
        .unwrap();
        assert_eq!(result.confidence_score, 1.0);
        assert!(result.suggested_deadline.is_none());

        let negative: ClassificationResult = serde_json::from_str(
            r#"{"urgency_category": "low", "confidence_score": -0.3, "reasoning": "",
                "sender_type": "externo", "email_type": "personal",
                "requires_immediate_action": false}"#,
        )
        .unwrap();
        assert_eq!(negative.confidence_score, 0.0);
    }

    #[test]
    fn test_safe_default() {
        let result = ClassificationResult::safe_default("AI services not available");
        assert_eq!(result.urgency_category, UrgencyCategory::Medium);
        assert_eq!(result.confidence_score, 0.5);
        assert_eq!(result.sender_type, SenderType::Externo);
        assert_eq!(result.email_type, EmailType::Academico);
        assert!(!result.requires_immediate_action);
        assert!(result.suggested_deadline.is_none());
    }

    #[test]
    fn test_primary_service_priority() {
        assert_eq!(PrimaryService::select(true, true), PrimaryService::OpenAi);
        assert_eq!(PrimaryService::select(false, true), PrimaryService::Gemini);
        assert_eq!(PrimaryService::select(false, false), PrimaryService::Fallback);
        assert_eq!(
            serde_json::to_string(&PrimaryService::OpenAi).unwrap(),
            "\"openai\""
        );
    }
}
