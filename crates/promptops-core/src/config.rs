use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ModelClient;
use crate::error::{ConfigError, ProviderError};
use crate::orchestrator::ExecutionOrchestrator;
use crate::provider::ModelProvider;
use crate::providers::gemini::{self, GeminiProvider};
use crate::providers::openai_compat::{self, OpenAiCompatProvider};
use crate::retry::RetryPolicy;
use crate::scoring::ScoreWeights;

/// Pipeline settings, loaded from YAML and then overridden by environment.
///
/// ```yaml
/// provider: gemini
/// generation_model: gemini-3-flash-preview
/// evaluation_model: gemini-3-pro-preview
/// retry:
///   max_attempts: 3
///   base_delay_ms: 1000
/// weights:
///   accuracy: 0.5
///   clarity: 0.3
///   hallucination: 0.2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_evaluation_model")]
    pub evaluation_model: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub weights: ScoreWeights,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Gemini,
    OpenaiCompat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_generation_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_evaluation_model() -> String {
    "gemini-3-pro-preview".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: None,
            api_key: None,
            generation_model: default_generation_model(),
            evaluation_model: default_evaluation_model(),
            retry: RetryConfig::default(),
            weights: ScoreWeights::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load from `path` if given (defaults otherwise), apply environment overrides, validate.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Io {
                        path: path.display().to_string(),
                        source,
                    })?;
                Self::from_yaml(&content)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `PROMPTOPS_*` overrides and pick up the provider's API key.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = lookup("PROMPTOPS_PROVIDER") {
            match provider.trim().to_lowercase().as_str() {
                "gemini" => self.provider = ProviderKind::Gemini,
                "openai_compat" | "openai" => self.provider = ProviderKind::OpenaiCompat,
                other => tracing::warn!(provider = other, "ignoring unknown PROMPTOPS_PROVIDER"),
            }
        }
        if let Some(model) = lookup("PROMPTOPS_GENERATION_MODEL") {
            self.generation_model = model;
        }
        if let Some(model) = lookup("PROMPTOPS_EVALUATION_MODEL") {
            self.evaluation_model = model;
        }
        if let Some(url) = lookup("PROMPTOPS_BASE_URL") {
            self.base_url = Some(url);
        }
        if self.api_key.is_none() {
            let key_var = match self.provider {
                ProviderKind::Gemini => "GEMINI_API_KEY",
                ProviderKind::OpenaiCompat => "OPENAI_API_KEY",
            };
            self.api_key = lookup(key_var);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation_model.trim().is_empty() {
            return Err(ConfigError::Invalid("generation_model must not be empty".into()));
        }
        if self.evaluation_model.trim().is_empty() {
            return Err(ConfigError::Invalid("evaluation_model must not be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be at least 1".into()));
        }
        let w = &self.weights;
        if [w.accuracy, w.clarity, w.hallucination]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(ConfigError::Invalid("weights must be finite and non-negative".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        )
    }

    pub fn build_provider(&self) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        let timeout = Duration::from_secs(self.request_timeout_secs);
        let provider: Arc<dyn ModelProvider> = match self.provider {
            ProviderKind::Gemini => Arc::new(GeminiProvider::with_base_url(
                self.api_key.clone(),
                self.base_url.as_deref().unwrap_or(gemini::DEFAULT_BASE_URL),
                timeout,
            )?),
            ProviderKind::OpenaiCompat => Arc::new(OpenAiCompatProvider::new(
                self.api_key.clone(),
                self.base_url.as_deref().unwrap_or(openai_compat::DEFAULT_BASE_URL),
                timeout,
            )?),
        };
        Ok(provider)
    }

    pub fn build_orchestrator(&self) -> anyhow::Result<ExecutionOrchestrator> {
        let client = ModelClient::new(
            self.build_provider()?,
            self.generation_model.clone(),
            self.evaluation_model.clone(),
        )
        .with_retry(self.retry_policy());
        ExecutionOrchestrator::builder()
            .client(client)
            .weights(self.weights)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_yaml("{}").unwrap();
        assert_eq!(config.provider, ProviderKind::Gemini);
        assert_eq!(config.generation_model, "gemini-3-flash-preview");
        assert_eq!(config.evaluation_model, "gemini-3-pro-preview");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.weights, ScoreWeights::default());
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn test_yaml_overrides() {
        let config = PipelineConfig::from_yaml(
            r#"
provider: openai_compat
base_url: http://localhost:8080
generation_model: qwen3-0.5b
evaluation_model: qwen3-7b
retry:
  max_attempts: 5
weights:
  clamp_inputs: true
"#,
        )
        .unwrap();
        assert_eq!(config.provider, ProviderKind::OpenaiCompat);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert!(config.weights.clamp_inputs);
        assert_eq!(config.weights.accuracy, 0.5);
        assert_ne!(config.generation_model, config.evaluation_model);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PROMPTOPS_EVALUATION_MODEL", "judge-model"),
            ("PROMPTOPS_GENERATION_MODEL", "  "),
            ("GEMINI_API_KEY", "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.evaluation_model, "judge-model");
        assert_eq!(config.generation_model, "gemini-3-flash-preview");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_validation() {
        let mut config = PipelineConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = PipelineConfig::default();
        config.weights.clarity = -0.1;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.evaluation_model = String::new();
        assert!(config.validate().is_err());

        let config = PipelineConfig::from_yaml("request_timeout_secs: 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(PipelineConfig::from_yaml("retry: [1, 2]").is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = PipelineConfig::load(Some(Path::new("/definitely/not/here.yaml")))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = PipelineConfig::default();
        config.api_key = Some("secret".into());
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("secret"));
    }
}
