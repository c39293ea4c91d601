//! Deterministic keyword classifier used when no LLM provider answers
//!
//! Checks run in a fixed order and the first match wins. Non-urgent phrasing
//! ("no es urgente", "cuándo", ...) is checked before the urgent keywords so a
//! routine question that happens to mention an alarming word stays low.

use once_cell::sync::Lazy;

use crate::models::{ClassificationResult, EmailRecord, EmailType, SenderType, UrgencyCategory};

/// Real emergencies at the institute
static URGENT_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "emergencia",
        "accidente",
        "hospital",
        "ambulancia",
        "lesion",
        "lesionado",
        "herido",
        "caída",
        "golpe",
        "sangre",
        "desmayo",
        "crisis",
        "problema grave",
        "suspensión",
        "expulsión",
        "ayuda",
        "socorro",
        "grave",
        "inmediato",
        "hoy mismo",
        "crítico",
    ]
});

/// Phrasing that marks a routine question even when it sounds pressing
static NON_URGENT_INDICATORS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "qué día",
        "que dia",
        "cuando",
        "cuándo",
        "horario",
        "hora",
        "información",
        "consulta",
        "pregunta",
        "duda",
        "ayuda con",
        "necesito saber",
        "podrías decirme",
        "me puedes ayudar",
        "solo quería",
        "solo queria",
        "nada urgente",
        "no es urgente",
        "cuando puedas",
        "cuando tengas tiempo",
        "no hay prisa",
    ]
});

static HIGH_PRIORITY_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "reunión",
        "junta",
        "consejo",
        "deadline",
        "plazo",
        "entrega",
        "examen",
        "evaluación",
        "presentación",
        "defensa",
        "tesis",
        "calificación",
        "nota",
        "reprobado",
        "aprobado",
        "suspensión",
        "expulsión",
        "disciplinario",
        "problema",
        "conflicto",
        "queja",
    ]
});

static INQUIRY_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "consulta",
        "pregunta",
        "ayuda",
        "información",
        "horario",
        "clase",
        "materia",
        "asignatura",
    ]
});

static PROFESSOR_ROLES: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["profesor", "profesora", "docente", "académico"]);

static ADMINISTRATION_ROLES: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["secretaria", "coordinador", "director", "decanato"]);

fn owned(list: &[&'static str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Keyword tables consulted by [`RuleBasedClassifier`]
///
/// All entries are matched as lowercase substrings of `"{subject} {body}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRules {
    pub urgent: Vec<String>,
    pub non_urgent_indicators: Vec<String>,
    pub high_priority: Vec<String>,
    pub inquiry: Vec<String>,
    /// Inquiry keywords plus teaching roles; only used for organization senders
    pub academic: Vec<String>,
    pub professor_roles: Vec<String>,
    pub administration_roles: Vec<String>,
}

impl Default for KeywordRules {
    fn default() -> Self {
        let inquiry = owned(&INQUIRY_KEYWORDS);
        let mut academic = inquiry.clone();
        academic.push("profesor".to_string());
        academic.push("docente".to_string());

        Self {
            urgent: owned(&URGENT_KEYWORDS),
            non_urgent_indicators: owned(&NON_URGENT_INDICATORS),
            high_priority: owned(&HIGH_PRIORITY_KEYWORDS),
            inquiry,
            academic,
            professor_roles: owned(&PROFESSOR_ROLES),
            administration_roles: owned(&ADMINISTRATION_ROLES),
        }
    }
}

fn contains_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword.as_str()))
}

/// Rule-based urgency classifier
///
/// Pure: identical records always produce identical results.
#[derive(Debug, Clone)]
pub struct RuleBasedClassifier {
    rules: KeywordRules,
    /// `"@" + organization domain`, lowercase
    domain_marker: String,
}

impl RuleBasedClassifier {
    pub fn new(organization_domain: &str) -> Self {
        Self::with_rules(organization_domain, KeywordRules::default())
    }

    pub fn with_rules(organization_domain: &str, rules: KeywordRules) -> Self {
        let domain = organization_domain.trim().trim_start_matches('@').to_lowercase();
        Self {
            rules,
            domain_marker: format!("@{}", domain),
        }
    }

    pub fn rules(&self) -> &KeywordRules {
        &self.rules
    }

    /// Whether the sender address belongs to the organization
    pub fn is_organization_sender(&self, sender_email: &str) -> bool {
        sender_email.to_lowercase().contains(&self.domain_marker)
    }

    pub fn classify(&self, record: &EmailRecord) -> ClassificationResult {
        let text = format!("{} {}", record.subject, record.body_preview).to_lowercase();
        let from_organization = self.is_organization_sender(&record.sender_email);

        let (urgency, confidence, reasoning) = self.assess_urgency(&text, from_organization);
        let sender_type = self.sender_type_for(&text, from_organization);

        // email_type has no rule of its own on this path
        ClassificationResult::new(
            urgency,
            confidence,
            reasoning,
            sender_type,
            EmailType::Academico,
        )
    }

    /// Sender role derived from the address first, then from role words
    pub fn detect_sender_type(&self, record: &EmailRecord) -> SenderType {
        let text = format!("{} {}", record.subject, record.body_preview).to_lowercase();
        self.sender_type_for(&text, self.is_organization_sender(&record.sender_email))
    }

    fn sender_type_for(&self, text: &str, from_organization: bool) -> SenderType {
        if from_organization {
            SenderType::Estudiante
        } else if contains_any(text, &self.rules.professor_roles) {
            SenderType::Profesor
        } else if contains_any(text, &self.rules.administration_roles) {
            SenderType::Administracion
        } else {
            SenderType::Externo
        }
    }

    fn assess_urgency(
        &self,
        text: &str,
        from_organization: bool,
    ) -> (UrgencyCategory, f64, &'static str) {
        let has_non_urgent = contains_any(text, &self.rules.non_urgent_indicators);
        let has_urgent = contains_any(text, &self.rules.urgent);

        if has_non_urgent && !has_urgent {
            return (
                UrgencyCategory::Low,
                0.8,
                "Contenido indica consulta no urgente",
            );
        }

        if has_non_urgent {
            return (
                UrgencyCategory::Low,
                0.8,
                "Consulta no urgente a pesar de palabras como 'urgente' o 'ayuda'",
            );
        }

        if has_urgent {
            return (
                UrgencyCategory::Urgent,
                0.9,
                "Detectadas palabras clave de urgencia crítica real",
            );
        }

        if contains_any(text, &self.rules.high_priority) {
            return (
                UrgencyCategory::High,
                0.8,
                "Detectadas palabras clave de alta prioridad académica",
            );
        }

        if contains_any(text, &self.rules.inquiry) {
            return (
                UrgencyCategory::Medium,
                0.7,
                "Consulta académica que requiere respuesta",
            );
        }

        if from_organization {
            if contains_any(text, &self.rules.academic) {
                return (
                    UrgencyCategory::Medium,
                    0.7,
                    "Correo institucional con contenido académico",
                );
            }
            return (
                UrgencyCategory::Low,
                0.6,
                "Correo institucional - contenido general",
            );
        }

        (UrgencyCategory::Low, 0.5, "Correo externo - prioridad baja")
    }
}
