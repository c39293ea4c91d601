//! Common test utilities and fixtures

#![allow(dead_code)]

use email_triage::config::Config;
use email_triage::models::EmailRecord;
use serde_json::{json, Value};

/// Create a test record with default values
pub fn create_test_record(id: &str, sender: &str, subject: &str, body: &str) -> EmailRecord {
    EmailRecord {
        id: Some(id.to_string()),
        sender_name: "Test Sender".to_string(),
        sender_email: sender.to_string(),
        subject: subject.to_string(),
        body_preview: body.to_string(),
        received_at: "2024-09-16T10:00:00".to_string(),
    }
}

/// A real emergency from an outside sender
pub fn create_emergency_record(id: &str) -> EmailRecord {
    create_test_record(
        id,
        "guardia@gmail.com",
        "Accidente en laboratorio",
        "Estudiante herido, necesita ambulancia urgente",
    )
}

/// A student asking a routine question
pub fn create_inquiry_record(id: &str) -> EmailRecord {
    create_test_record(
        id,
        "alumno@uss.cl",
        "Consulta",
        "¿Cuándo es el próximo horario de clases? No es urgente.",
    )
}

/// A thesis defense coordination email from a professor
pub fn create_high_priority_record(id: &str) -> EmailRecord {
    create_test_record(
        id,
        "docente@gmail.com",
        "Defensa de tesis",
        "Soy profesor guía, necesitamos confirmar la sala.",
    )
}

/// JSON answer in the shape the prompt asks for
pub fn classification_answer(urgency: &str, confidence: f64, reasoning: &str) -> String {
    json!({
        "urgency_category": urgency,
        "confidence_score": confidence,
        "reasoning": reasoning,
        "sender_type": "profesor",
        "email_type": "administrativo",
        "requires_immediate_action": urgency == "urgent" || urgency == "high",
        "suggested_deadline": null
    })
    .to_string()
}

/// Mock OpenAI chat completion response body
pub fn openai_completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

/// Mock Gemini generateContent response body
pub fn gemini_response(content: &str) -> Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": content}]},
            "finishReason": "STOP"
        }]
    })
}

/// Configuration pointing both providers at local mock servers
pub fn config_with_providers(openai_url: Option<&str>, gemini_url: Option<&str>) -> Config {
    let mut config = Config::default();
    config.throttle.enabled = false;
    config.providers.request_timeout_secs = 5;

    if let Some(url) = openai_url {
        config.providers.openai.api_key = Some("sk-test".to_string());
        config.providers.openai.base_url = url.to_string();
    }
    if let Some(url) = gemini_url {
        config.providers.gemini.api_key = Some("g-test".to_string());
        config.providers.gemini.base_url = url.to_string();
    }
    config
}
