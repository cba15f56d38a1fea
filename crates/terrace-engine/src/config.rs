use std::env;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use crate::knowledge::DEFAULT_KNOWLEDGE_PATH;

pub const API_KEY_ENV: &str = "WATSONX_API_KEY";
pub const PROJECT_ID_ENV: &str = "WATSONX_PROJECT_ID";
pub const SERVICE_URL_ENV: &str = "WATSONX_SERVICE_URL";
pub const MODEL_ID_ENV: &str = "WATSONX_MODEL_ID";
pub const IAM_URL_ENV: &str = "WATSONX_IAM_URL";
pub const KNOWLEDGE_PATH_ENV: &str = "TERRACE_KNOWLEDGE_PATH";

pub const PLACEHOLDER_API_KEY: &str = "your_api_key_here";
pub const PLACEHOLDER_PROJECT_ID: &str = "your_project_id_here";
pub const DEFAULT_SERVICE_URL: &str = "https://api.watsonx.ai";
pub const DEFAULT_MODEL_ID: &str = "meta-llama/llama-3-2-90b-vision-instruct";
pub const DEFAULT_IAM_URL: &str = "https://iam.cloud.ibm.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingMethod {
    Greedy,
    Sample,
}

impl DecodingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::Sample => "sample",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub decoding_method: DecodingMethod,
    pub max_new_tokens: u32,
    pub min_new_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl GenerationParams {
    /// Greedy decoding never samples, so the temperature sent upstream is pinned to zero.
    pub fn effective_temperature(&self) -> f64 {
        match self.decoding_method {
            DecodingMethod::Greedy => 0.0,
            DecodingMethod::Sample => self.temperature,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            decoding_method: DecodingMethod::Greedy,
            max_new_tokens: 500,
            min_new_tokens: 1,
            temperature: 0.0,
            top_p: 1.0,
        }
    }
}

/// Everything needed to build a model client. Two equal configs share one client.
#[derive(Clone, PartialEq)]
pub struct ModelConfig {
    pub api_key: String,
    pub project_id: String,
    pub service_url: String,
    pub model_id: String,
    pub iam_url: String,
    pub parameters: GenerationParams,
    pub timeout: Duration,
}

impl ModelConfig {
    /// Reads credentials from the environment, falling back to placeholders that fail validation.
    pub fn from_env() -> Self {
        Self {
            api_key: first_non_empty_env(&[API_KEY_ENV])
                .unwrap_or_else(|| PLACEHOLDER_API_KEY.to_string()),
            project_id: first_non_empty_env(&[PROJECT_ID_ENV])
                .unwrap_or_else(|| PLACEHOLDER_PROJECT_ID.to_string()),
            service_url: first_non_empty_env(&[SERVICE_URL_ENV])
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
            model_id: first_non_empty_env(&[MODEL_ID_ENV])
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            iam_url: first_non_empty_env(&[IAM_URL_ENV])
                .unwrap_or_else(|| DEFAULT_IAM_URL.to_string()),
            parameters: GenerationParams::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: PLACEHOLDER_API_KEY.to_string(),
            project_id: PLACEHOLDER_PROJECT_ID.to_string(),
            service_url: DEFAULT_SERVICE_URL.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            iam_url: DEFAULT_IAM_URL.to_string(),
            parameters: GenerationParams::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("service_url", &self.service_url)
            .field("model_id", &self.model_id)
            .field("iam_url", &self.iam_url)
            .field("parameters", &self.parameters)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub fn knowledge_path_from_env() -> PathBuf {
    first_non_empty_env(&[KNOWLEDGE_PATH_ENV])
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_KNOWLEDGE_PATH))
}

/// Loads `.env` from the working directory if one exists. A missing file is not an error.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => log::debug!("loaded environment from {}", path.display()),
        Err(dotenvy::Error::Io(err)) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => log::warn!("failed to load .env file: {err}"),
    }
}

fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_generation_params_are_greedy() {
        let params = GenerationParams::default();
        assert_eq!(params.decoding_method, DecodingMethod::Greedy);
        assert_eq!(params.max_new_tokens, 500);
        assert_eq!(params.min_new_tokens, 1);
        assert_eq!(params.top_p, 1.0);
    }

    #[test]
    fn greedy_pins_temperature() {
        let params = GenerationParams {
            temperature: 0.7,
            ..GenerationParams::default()
        };
        assert_eq!(params.effective_temperature(), 0.0);

        let sampled = GenerationParams {
            decoding_method: DecodingMethod::Sample,
            temperature: 0.7,
            ..GenerationParams::default()
        };
        assert_eq!(sampled.effective_temperature(), 0.7);
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = ModelConfig {
            api_key: "super-secret".to_string(),
            ..ModelConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn defaults_use_placeholders() {
        let config = ModelConfig::default();
        assert_eq!(config.api_key, PLACEHOLDER_API_KEY);
        assert_eq!(config.project_id, PLACEHOLDER_PROJECT_ID);
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
    }
}
