//! End-to-end tests for the provider chain against mocked HTTP APIs

mod common;

use common::{
    classification_answer, config_with_providers, create_emergency_record,
    create_high_priority_record, create_inquiry_record, gemini_response, openai_completion,
};
use email_triage::circuit_breaker::CircuitState;
use email_triage::hybrid::{HybridClassifier, RULES_SOURCE};
use email_triage::models::{PrimaryService, SenderType, UrgencyCategory};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_openai(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn mount_gemini(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/models/.+:generateContent$"))
        .respond_with(template)
        .mount(server)
        .await;
}

// ============================================================================
// Provider priority
// ============================================================================

#[tokio::test]
async fn test_openai_answers_first() {
    let openai = MockServer::start().await;
    let gemini = MockServer::start().await;
    mount_openai(
        &openai,
        ResponseTemplate::new(200).set_body_json(openai_completion(&classification_answer(
            "high", 0.82, "Reunión hoy",
        ))),
    )
    .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&gemini)
        .await;

    let config = config_with_providers(Some(&openai.uri()), Some(&gemini.uri()));
    let hybrid = HybridClassifier::from_config(&config).unwrap();

    let classified = hybrid
        .classify_sourced(&create_high_priority_record("m-1"))
        .await;
    assert_eq!(classified.source, "openai");
    assert_eq!(classified.result.urgency_category, UrgencyCategory::High);
    assert_eq!(classified.result.confidence_score, 0.82);
    assert_eq!(classified.result.sender_type, SenderType::Profesor);
}

#[tokio::test]
async fn test_gemini_used_when_openai_fails() {
    let openai = MockServer::start().await;
    let gemini = MockServer::start().await;
    mount_openai(&openai, ResponseTemplate::new(500)).await;
    mount_gemini(
        &gemini,
        ResponseTemplate::new(200).set_body_json(gemini_response(&format!(
            "```json\n{}\n```",
            classification_answer("urgent", 0.97, "Emergencia médica")
        ))),
    )
    .await;

    let config = config_with_providers(Some(&openai.uri()), Some(&gemini.uri()));
    let hybrid = HybridClassifier::from_config(&config).unwrap();

    let classified = hybrid.classify_sourced(&create_emergency_record("m-1")).await;
    assert_eq!(classified.source, "gemini");
    assert_eq!(classified.result.urgency_category, UrgencyCategory::Urgent);
    assert!(classified.result.requires_immediate_action);
}

#[tokio::test]
async fn test_malformed_answer_falls_through() {
    let openai = MockServer::start().await;
    let gemini = MockServer::start().await;
    mount_openai(
        &openai,
        ResponseTemplate::new(200)
            .set_body_json(openai_completion("Este correo parece urgente.")),
    )
    .await;
    mount_gemini(
        &gemini,
        ResponseTemplate::new(200).set_body_json(gemini_response(
            r#"{"urgency_category": "low", "reasoning": "sin confianza"}"#,
        )),
    )
    .await;

    let config = config_with_providers(Some(&openai.uri()), Some(&gemini.uri()));
    let hybrid = HybridClassifier::from_config(&config).unwrap();

    let record = create_emergency_record("m-1");
    let classified = hybrid.classify_sourced(&record).await;
    assert_eq!(classified.source, RULES_SOURCE);
    assert_eq!(classified.result, hybrid.rules().classify(&record));
}

#[tokio::test]
async fn test_no_keys_uses_rules_only() {
    let config = config_with_providers(None, None);
    let hybrid = HybridClassifier::from_config(&config).unwrap();

    let status = hybrid.get_status().await;
    assert_eq!(status.primary_service, PrimaryService::Fallback);
    assert!(!status.openai_available);
    assert!(!status.gemini_available);

    let result = hybrid.classify_email(&create_inquiry_record("m-1")).await;
    assert_eq!(result.urgency_category, UrgencyCategory::Low);
    assert_eq!(result.confidence_score, 0.8);
    assert_eq!(result.sender_type, SenderType::Estudiante);
}

#[tokio::test]
async fn test_safe_default_when_rules_disabled() {
    let openai = MockServer::start().await;
    mount_openai(&openai, ResponseTemplate::new(503)).await;

    let mut config = config_with_providers(Some(&openai.uri()), None);
    config.classification.rule_fallback = false;
    let hybrid = HybridClassifier::from_config(&config).unwrap();

    let result = hybrid.classify_email(&create_emergency_record("m-1")).await;
    assert_eq!(result.urgency_category, UrgencyCategory::Medium);
    assert_eq!(result.confidence_score, 0.5);
    assert_eq!(result.sender_type, SenderType::Externo);
}

// ============================================================================
// Circuit breaker
// ============================================================================

#[tokio::test]
async fn test_failing_provider_is_skipped_after_threshold() {
    let openai = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
        .expect(2)
        .mount(&openai)
        .await;

    let mut config = config_with_providers(Some(&openai.uri()), None);
    config.circuit_breaker.failure_threshold = 2;
    let hybrid = HybridClassifier::from_config(&config).unwrap();

    for i in 0..5 {
        let classified = hybrid
            .classify_sourced(&create_inquiry_record(&format!("m-{}", i)))
            .await;
        assert_eq!(classified.source, RULES_SOURCE);
    }

    let status = hybrid.get_status().await;
    assert_eq!(status.providers[0].circuit_state, CircuitState::Open);
    // Configured providers stay listed while their circuit is open
    assert_eq!(status.primary_service, PrimaryService::OpenAi);
}

#[tokio::test]
async fn test_permanent_errors_keep_circuit_closed() {
    let openai = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(4)
        .mount(&openai)
        .await;

    let mut config = config_with_providers(Some(&openai.uri()), None);
    config.circuit_breaker.failure_threshold = 1;
    let hybrid = HybridClassifier::from_config(&config).unwrap();

    for i in 0..4 {
        hybrid
            .classify_email(&create_inquiry_record(&format!("m-{}", i)))
            .await;
    }

    let status = hybrid.get_status().await;
    assert_eq!(status.providers[0].circuit_state, CircuitState::Closed);
}

// ============================================================================
// Batches
// ============================================================================

#[tokio::test]
async fn test_batch_mixes_sources_in_order() {
    let openai = MockServer::start().await;
    // Only the emergency gets an LLM answer; everything else is a server error
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(wiremock::matchers::body_string_contains("Accidente en laboratorio"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion(
            &classification_answer("urgent", 0.99, "Accidente"),
        )))
        .mount(&openai)
        .await;
    mount_openai(&openai, ResponseTemplate::new(502)).await;

    let mut config = config_with_providers(Some(&openai.uri()), None);
    config.circuit_breaker.enabled = false;
    let hybrid = HybridClassifier::from_config(&config).unwrap();

    let records = vec![
        create_inquiry_record("m-1"),
        create_emergency_record("m-2"),
        create_high_priority_record("m-3"),
    ];
    let results = hybrid.classify_batch(&records, 2).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].urgency_category, UrgencyCategory::Low);
    assert_eq!(results[1].urgency_category, UrgencyCategory::Urgent);
    assert_eq!(results[1].confidence_score, 0.99);
    assert_eq!(results[2].urgency_category, UrgencyCategory::High);
}
