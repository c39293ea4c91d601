//! Prompt construction and response parsing shared by every LLM provider

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::error::{Result, TriageError};
use crate::models::{
    clamp_confidence, ClassificationResult, EmailRecord, EmailType, SenderType, UrgencyCategory,
};

/// Bodies longer than this many characters are shortened
pub const BODY_TRUNCATION_THRESHOLD: usize = 400;

/// Characters kept from each end of a truncated body
pub const BODY_EDGE_CHARS: usize = 200;

/// Fields the model must return for the answer to be usable
pub const REQUIRED_FIELDS: [&str; 3] = ["urgency_category", "confidence_score", "reasoning"];

/// System message sent ahead of the prompt by chat-style providers
pub const SYSTEM_PROMPT: &str =
    "Eres un clasificador de correos académicos. Respondes únicamente con JSON válido.";

/// Keep the first and last [`BODY_EDGE_CHARS`] characters of a long body
pub fn truncate_body(body: &str) -> String {
    let total = body.chars().count();
    if total <= BODY_TRUNCATION_THRESHOLD {
        return body.to_string();
    }

    let head: String = body.chars().take(BODY_EDGE_CHARS).collect();
    let tail: String = body.chars().skip(total - BODY_EDGE_CHARS).collect();
    format!("{}...{}", head, tail)
}

/// Build the classification prompt for one email
pub fn build_classification_prompt(record: &EmailRecord) -> String {
    let content = truncate_body(&record.body_preview);

    format!(
        r#"Eres un asistente especializado en clasificar correos para la Dirección de un instituto de la Universidad San Sebastián, Chile.

CONTEXTO: Dirección universitaria que gestiona estudiantes, profesores y personal. Debe responder emergencias rápidamente.

NIVELES DE URGENCIA:
1. URGENTE (1 hora): Emergencias médicas, accidentes, crisis de seguridad, acción INMEDIATA
2. ALTA (3 horas): Problemas académicos graves, reuniones urgentes hoy, deadlines críticos
3. MEDIA (hoy/próximos días): Solicitudes académicas con plazo, cambios de horario, coordinación
4. BAJA (mañana+): Información general, invitaciones futuras, documentación no urgente

PALABRAS CLAVE CRÍTICAS para URGENTE:
- Emergencias: accidente, lesión, hospital, ambulancia, herido, sangre, desmayo, caída
- Crisis: ayuda, socorro, crítico, grave, urgente, emergencia
- Seguridad: peligro, amenaza, violencia, drogas, alcohol

EJEMPLOS:
- URGENTE: "Estudiante herido en laboratorio, necesita ambulancia"
- ALTA: "Reunión urgente hoy a las 3pm para resolver problema académico"
- MEDIA: "Solicitud cambio de horario con plazo viernes 20 septiembre"
- BAJA: "Consulta general sobre horarios del próximo semestre"

CORREO A CLASIFICAR:
Remitente: {sender_name} <{sender_email}>
Asunto: {subject}
Fecha recibido: {received_at}
Contenido: {content}

INSTRUCCIONES:
1. Analiza el contexto académico del remitente (estudiante/profesor/administración)
2. Identifica palabras clave de urgencia y deadlines
3. Considera la proximidad temporal de eventos
4. Evalúa el impacto en las responsabilidades de la dirección

Responde SOLO en formato JSON válido:
{{
    "urgency_category": "urgent|high|medium|low",
    "confidence_score": 0.85,
    "reasoning": "Explicación breve de la clasificación",
    "sender_type": "estudiante|profesor|administracion|externo",
    "email_type": "academico|administrativo|personal|emergencia",
    "requires_immediate_action": true,
    "suggested_deadline": "2024-01-15T14:00:00"
}}
Usa null en suggested_deadline si no aplica."#,
        sender_name = record.sender_name,
        sender_email = record.sender_email,
        subject = record.subject,
        received_at = record.received_at,
        content = content,
    )
}

/// Strip a markdown code fence wrapped around the model answer
pub fn strip_code_fences(raw: &str) -> &str {
    let mut content = raw.trim();
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    } else if let Some(rest) = content.strip_prefix("```") {
        content = rest;
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    content.trim()
}

/// Parse and normalize a raw model answer
///
/// `sender_fallback` fills `sender_type` when the model omits it or answers
/// with a value outside the taxonomy.
pub fn parse_classification_response(
    raw: &str,
    sender_fallback: SenderType,
) -> Result<ClassificationResult> {
    let content = strip_code_fences(raw);
    if content.is_empty() {
        return Err(TriageError::MalformedResponse(
            "response contained no JSON".to_string(),
        ));
    }

    let value: Value = serde_json::from_str(content)
        .map_err(|e| TriageError::MalformedResponse(format!("invalid JSON: {}", e)))?;
    let object = value.as_object().ok_or_else(|| {
        TriageError::MalformedResponse("expected a JSON object".to_string())
    })?;

    for field in REQUIRED_FIELDS {
        if object.get(field).map_or(true, Value::is_null) {
            return Err(TriageError::MissingField(field.to_string()));
        }
    }

    let urgency = match &object["urgency_category"] {
        Value::String(s) => UrgencyCategory::normalize(s),
        other => {
            return Err(TriageError::MalformedResponse(format!(
                "urgency_category is not a string: {}",
                other
            )))
        }
    };

    let confidence = parse_confidence(&object["confidence_score"])?;

    let reasoning = match &object["reasoning"] {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let sender_type = optional_str(object, "sender_type")
        .and_then(SenderType::parse)
        .unwrap_or(sender_fallback);

    let email_type = optional_str(object, "email_type")
        .and_then(EmailType::parse)
        .unwrap_or(EmailType::Academico);

    let requires_immediate_action = object
        .get("requires_immediate_action")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| urgency.requires_immediate_action());

    let suggested_deadline = optional_str(object, "suggested_deadline").and_then(parse_deadline);

    Ok(ClassificationResult {
        urgency_category: urgency,
        confidence_score: confidence,
        reasoning,
        sender_type,
        email_type,
        requires_immediate_action,
        suggested_deadline,
    })
}

fn optional_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

fn parse_confidence(value: &Value) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed
        .filter(|v| !v.is_nan())
        .map(clamp_confidence)
        .ok_or_else(|| {
            TriageError::MalformedResponse(format!("confidence_score is not a number: {}", value))
        })
}

/// Accepts `YYYY-MM-DDTHH:MM:SS[.f]`, RFC 3339 and bare dates
fn parse_deadline(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("null") {
        return None;
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}
