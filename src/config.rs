use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::error::{Result, TriageError};

/// Placeholder keys shipped in example `.env` files; treated as absent
const PLACEHOLDER_KEYS: &[&str] = &[
    "your-openai-api-key-here",
    "your-gemini-api-key-here",
    "tu-openai-api-key-aqui",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            openai: OpenAiConfig::default(),
            gemini: GeminiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_openai_temperature")]
    pub temperature: f32,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_openai_model(),
            max_tokens: default_openai_max_tokens(),
            temperature: default_openai_temperature(),
            base_url: default_openai_base_url(),
        }
    }
}

impl OpenAiConfig {
    /// The configured key, unless it is missing, blank or a placeholder
    pub fn usable_api_key(&self) -> Option<&str> {
        usable_key(self.api_key.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_gemini_model(),
            base_url: default_gemini_base_url(),
        }
    }
}

impl GeminiConfig {
    /// The configured key, unless it is missing, blank or a placeholder
    pub fn usable_api_key(&self) -> Option<&str> {
        usable_key(self.api_key.as_deref())
    }
}

fn usable_key(key: Option<&str>) -> Option<&str> {
    let key = key?.trim();
    if key.is_empty() || PLACEHOLDER_KEYS.contains(&key) {
        None
    } else {
        Some(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Mail domain of the organization; senders under it count as students
    #[serde(default = "default_organization_domain")]
    pub organization_domain: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// When false, exhausted providers yield the hardcoded safe default
    #[serde(default = "default_rule_fallback")]
    pub rule_fallback: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            organization_domain: default_organization_domain(),
            batch_size: default_batch_size(),
            rule_fallback: default_rule_fallback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_throttle_enabled")]
    pub enabled: bool,
    /// Units added to the bucket per second
    #[serde(default = "default_refill_rate")]
    pub refill_rate: f64,
    /// Bucket capacity
    #[serde(default = "default_burst_units")]
    pub burst_units: f64,
    #[serde(default = "default_request_cost")]
    pub request_cost: f64,
    #[serde(default = "default_batch_cost")]
    pub batch_cost: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: default_throttle_enabled(),
            refill_rate: default_refill_rate(),
            burst_units: default_burst_units(),
            request_cost: default_request_cost(),
            batch_cost: default_batch_cost(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_circuit_breaker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_circuit_breaker_enabled(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_max_tokens() -> u32 {
    1000
}

fn default_openai_temperature() -> f32 {
    0.3
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_gemini_model() -> String {
    "gemini-pro".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_organization_domain() -> String {
    "uss.cl".to_string()
}

fn default_batch_size() -> usize {
    5
}

fn default_rule_fallback() -> bool {
    true
}

fn default_throttle_enabled() -> bool {
    true
}

fn default_refill_rate() -> f64 {
    1.0
}

fn default_burst_units() -> f64 {
    5.0
}

fn default_request_cost() -> f64 {
    2.0
}

fn default_batch_cost() -> f64 {
    5.0
}

fn default_circuit_breaker_enabled() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_secs() -> u64 {
    60
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                TriageError::ConfigError(format!("Failed to read config file: {}", e))
            })?;

            let config: Self = toml::from_str(&content).map_err(|e| {
                TriageError::ConfigError(format!("Failed to parse config file: {}", e))
            })?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Read only the `[logging]` section, so logging can be set up before
    /// the full load reports anything
    ///
    /// A missing or broken file yields the default; [`Config::load`]
    /// reports the actual problem.
    pub async fn logging_hint(path: &Path) -> LoggingConfig {
        #[derive(Deserialize)]
        struct LoggingOnly {
            #[serde(default)]
            logging: LoggingConfig,
        }

        match tokio::fs::read_to_string(path).await {
            Ok(content) => toml::from_str::<LoggingOnly>(&content)
                .map(|partial| partial.logging)
                .unwrap_or_default(),
            Err(_) => LoggingConfig::default(),
        }
    }

    /// Overlay values from the process environment
    ///
    /// Keys and deployment-specific values usually arrive this way rather
    /// than through the TOML file.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            self.providers.openai.api_key = Some(key);
        }
        if let Ok(model) = env::var("OPENAI_MODEL") {
            self.providers.openai.model = model;
        }
        if let Ok(value) = env::var("OPENAI_MAX_TOKENS") {
            self.providers.openai.max_tokens = value.trim().parse().map_err(|_| {
                TriageError::ConfigError(format!("OPENAI_MAX_TOKENS is not a number: {}", value))
            })?;
        }
        if let Ok(value) = env::var("OPENAI_TEMPERATURE") {
            self.providers.openai.temperature = value.trim().parse().map_err(|_| {
                TriageError::ConfigError(format!("OPENAI_TEMPERATURE is not a number: {}", value))
            })?;
        }
        if let Ok(key) = env::var("GEMINI_API_KEY") {
            self.providers.gemini.api_key = Some(key);
        }
        if let Ok(model) = env::var("GEMINI_MODEL") {
            self.providers.gemini.model = model;
        }
        if let Ok(domain) = env::var("ORGANIZATION_DOMAIN") {
            self.classification.organization_domain = domain;
        }
        if let Ok(value) = env::var("PORT") {
            self.server.port = value.trim().parse().map_err(|_| {
                TriageError::ConfigError(format!("PORT is not a valid port: {}", value))
            })?;
        }
        if let Ok(value) = env::var("CORS_ORIGINS") {
            self.server.cors_origins = value
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    TriageError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TriageError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let domain = &self.classification.organization_domain;
        if domain.trim().is_empty() {
            return Err(TriageError::ConfigError(
                "classification.organization_domain cannot be empty".to_string(),
            ));
        }
        if domain.contains('@') {
            return Err(TriageError::ConfigError(
                "classification.organization_domain must not contain '@'".to_string(),
            ));
        }

        if self.classification.batch_size == 0 {
            return Err(TriageError::ConfigError(
                "classification.batch_size must be at least 1".to_string(),
            ));
        }
        if self.classification.batch_size > 100 {
            return Err(TriageError::ConfigError(
                "classification.batch_size cannot exceed 100".to_string(),
            ));
        }

        if self.providers.request_timeout_secs == 0 {
            return Err(TriageError::ConfigError(
                "providers.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let openai = &self.providers.openai;
        if openai.max_tokens == 0 {
            return Err(TriageError::ConfigError(
                "providers.openai.max_tokens must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&openai.temperature) {
            return Err(TriageError::ConfigError(
                "providers.openai.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        for (name, url) in [
            ("providers.openai.base_url", &openai.base_url),
            ("providers.gemini.base_url", &self.providers.gemini.base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(TriageError::ConfigError(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }

        let throttle = &self.throttle;
        for (name, value) in [
            ("throttle.refill_rate", throttle.refill_rate),
            ("throttle.burst_units", throttle.burst_units),
            ("throttle.request_cost", throttle.request_cost),
            ("throttle.batch_cost", throttle.batch_cost),
        ] {
            if !value.is_finite() {
                return Err(TriageError::ConfigError(format!(
                    "{} must be a finite number",
                    name
                )));
            }
        }
        if !(throttle.refill_rate > 0.0) {
            return Err(TriageError::ConfigError(
                "throttle.refill_rate must be greater than 0".to_string(),
            ));
        }
        if throttle.request_cost < 0.0 || throttle.batch_cost < 0.0 {
            return Err(TriageError::ConfigError(
                "throttle costs cannot be negative".to_string(),
            ));
        }
        // A cost larger than the bucket could never be satisfied
        if throttle.burst_units < throttle.request_cost.max(throttle.batch_cost) {
            return Err(TriageError::ConfigError(
                "throttle.burst_units must be at least the largest throttle cost".to_string(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(TriageError::ConfigError(
                "circuit_breaker.failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.circuit_breaker.reset_timeout_secs == 0 {
            return Err(TriageError::ConfigError(
                "circuit_breaker.reset_timeout_secs must be greater than 0".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    const ENV_KEYS: &[&str] = &[
        "OPENAI_API_KEY",
        "OPENAI_MODEL",
        "OPENAI_MAX_TOKENS",
        "OPENAI_TEMPERATURE",
        "GEMINI_API_KEY",
        "GEMINI_MODEL",
        "ORGANIZATION_DOMAIN",
        "PORT",
        "CORS_ORIGINS",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.providers.openai.model, "gpt-4o-mini");
        assert_eq!(config.providers.openai.max_tokens, 1000);
        assert!((config.providers.openai.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.providers.gemini.model, "gemini-pro");
        assert!(config.providers.openai.api_key.is_none());

        assert_eq!(config.classification.organization_domain, "uss.cl");
        assert_eq!(config.classification.batch_size, 5);
        assert!(config.classification.rule_fallback);

        assert_eq!(config.throttle.request_cost, 2.0);
        assert_eq!(config.throttle.batch_cost, 5.0);

        assert_eq!(config.server.port, 5000);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_usable_api_key_filters_placeholders() {
        let mut openai = OpenAiConfig::default();
        assert!(openai.usable_api_key().is_none());

        openai.api_key = Some("   ".to_string());
        assert!(openai.usable_api_key().is_none());

        openai.api_key = Some("your-openai-api-key-here".to_string());
        assert!(openai.usable_api_key().is_none());

        openai.api_key = Some(" sk-test ".to_string());
        assert_eq!(openai.usable_api_key(), Some("sk-test"));

        let gemini = GeminiConfig {
            api_key: Some("your-gemini-api-key-here".to_string()),
            ..Default::default()
        };
        assert!(gemini.usable_api_key().is_none());
    }

    #[test]
    fn test_config_validation_batch_size() {
        let mut config = Config::default();
        config.classification.batch_size = 0;
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("at least 1"));

        config.classification.batch_size = 101;
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("cannot exceed 100"));

        config.classification.batch_size = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_domain() {
        let mut config = Config::default();
        config.classification.organization_domain = "@uss.cl".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("must not contain '@'"));

        config.classification.organization_domain = "".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("cannot be empty"));
    }

    #[test]
    fn test_config_validation_temperature() {
        let mut config = Config::default();
        config.providers.openai.temperature = 2.5;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("temperature"));
    }

    #[test]
    fn test_config_validation_base_url() {
        let mut config = Config::default();
        config.providers.gemini.base_url = "generativelanguage.googleapis.com".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("providers.gemini.base_url"));
    }

    #[test]
    fn test_config_validation_throttle_burst_too_small() {
        let mut config = Config::default();
        config.throttle.burst_units = 4.0;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("burst_units"));
    }

    #[test]
    fn test_config_validation_throttle_not_finite() {
        let mut config = Config::default();
        config.throttle.refill_rate = f64::NAN;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("throttle.refill_rate"));

        let mut config = Config::default();
        config.throttle.burst_units = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.throttle.batch_cost = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_logging_hint() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(
            temp_file.path(),
            "[logging]\njson = true\n\n[throttle]\nrefill_rate = -1.0\n",
        )
        .await
        .unwrap();
        // An invalid throttle does not hide the logging choice
        assert!(Config::logging_hint(temp_file.path()).await.json);

        tokio::fs::write(temp_file.path(), "not toml {[").await.unwrap();
        assert!(!Config::logging_hint(temp_file.path()).await.json);

        let missing = temp_file.path().with_extension("missing");
        assert!(!Config::logging_hint(&missing).await.json);
    }

    #[tokio::test]
    #[serial]
    async fn test_config_load_rejects_nan_refill_rate() {
        clear_env();
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "[throttle]\nrefill_rate = nan\n")
            .await
            .unwrap();

        let result = Config::load(temp_file.path()).await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must be a finite number"));
    }

    #[test]
    fn test_config_validation_circuit_breaker() {
        let mut config = Config::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.circuit_breaker.reset_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var("OPENAI_API_KEY", "sk-env");
        env::set_var("OPENAI_MAX_TOKENS", "500");
        env::set_var("GEMINI_API_KEY", "gm-env");
        env::set_var("ORGANIZATION_DOMAIN", "example.edu");
        env::set_var("CORS_ORIGINS", "https://a.example, https://b.example,");

        let mut config = Config::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.providers.openai.usable_api_key(), Some("sk-env"));
        assert_eq!(config.providers.openai.max_tokens, 500);
        assert_eq!(config.providers.gemini.usable_api_key(), Some("gm-env"));
        assert_eq!(config.classification.organization_domain, "example.edu");
        assert_eq!(
            config.server.cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_number() {
        clear_env();
        env::set_var("OPENAI_TEMPERATURE", "warm");

        let mut config = Config::default();
        let result = config.apply_env_overrides();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("OPENAI_TEMPERATURE"));

        clear_env();
    }

    #[tokio::test]
    #[serial]
    async fn test_config_load_save_roundtrip() {
        clear_env();
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let mut config = Config::default();
        config.classification.batch_size = 10;
        config.server.port = 8080;
        config.save(path).await.unwrap();

        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.classification.batch_size, 10);
        assert_eq!(loaded.server.port, 8080);
        assert_eq!(loaded.providers.openai.model, "gpt-4o-mini");
    }

    #[tokio::test]
    #[serial]
    async fn test_config_load_nonexistent_returns_default() {
        clear_env();
        let path = Path::new("/tmp/nonexistent-email-triage-config-12345.toml");

        let config = Config::load(path).await.unwrap();
        assert_eq!(config.classification.batch_size, 5);
    }

    #[tokio::test]
    #[serial]
    async fn test_config_load_invalid_toml() {
        clear_env();
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        tokio::fs::write(path, "this is not valid toml {[}]")
            .await
            .unwrap();

        let result = Config::load(path).await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse config file"));
    }

    #[tokio::test]
    #[serial]
    async fn test_config_partial_with_defaults() {
        clear_env();
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let partial_config = r#"
[classification]
organization_domain = "example.edu"

[providers.openai]
api_key = "sk-file"
"#;
        tokio::fs::write(path, partial_config).await.unwrap();

        let config = Config::load(path).await.unwrap();

        assert_eq!(config.classification.organization_domain, "example.edu");
        assert_eq!(config.providers.openai.usable_api_key(), Some("sk-file"));
        assert_eq!(config.classification.batch_size, 5);
        assert_eq!(config.providers.openai.max_tokens, 1000);
        assert!(config.providers.gemini.api_key.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_config_create_example() {
        clear_env();
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        Config::create_example(&path).await.unwrap();
        assert!(path.exists());

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!content.contains("api_key"));

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.server.port, 5000);
    }
}
