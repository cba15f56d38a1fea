use std::sync::{Arc, Mutex, PoisonError};

use terrace_contracts::chat::{ChatRequest, USER_LABEL};
use thiserror::Error;

use crate::config::{ModelConfig, PLACEHOLDER_API_KEY, PLACEHOLDER_PROJECT_ID};
use crate::watsonx::WatsonxChatModel;

/// The only channel from a session to the remote provider.
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;
    fn invoke(&self, request: &ChatRequest) -> Result<String, RemoteInvocationError>;
}

#[derive(Debug, Error)]
pub enum ClientInitError {
    #[error("{field} is not set")]
    MissingValue { field: &'static str },
    #[error("{field} still has its placeholder value; set it in the environment or .env")]
    PlaceholderValue { field: &'static str },
    #[error("invalid {field} '{url}': {reason}")]
    InvalidUrl {
        field: &'static str,
        url: String,
        reason: String,
    },
    #[error("invalid generation parameters: {reason}")]
    InvalidParameter { reason: String },
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum RemoteInvocationError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("invalid response payload: {0}")]
    InvalidResponse(String),
    #[error("model returned an empty reply")]
    EmptyReply,
}

/// Checks a config without touching the network.
pub fn validate_config(config: &ModelConfig) -> Result<(), ClientInitError> {
    require_value("WATSONX_API_KEY", &config.api_key, Some(PLACEHOLDER_API_KEY))?;
    require_value(
        "WATSONX_PROJECT_ID",
        &config.project_id,
        Some(PLACEHOLDER_PROJECT_ID),
    )?;
    require_value("WATSONX_MODEL_ID", &config.model_id, None)?;
    require_http_url("WATSONX_SERVICE_URL", &config.service_url)?;
    require_http_url("WATSONX_IAM_URL", &config.iam_url)?;

    let params = &config.parameters;
    if params.max_new_tokens == 0 || params.min_new_tokens > params.max_new_tokens {
        return Err(ClientInitError::InvalidParameter {
            reason: format!(
                "token limits must satisfy 0 <= min ({}) <= max ({}) and max > 0",
                params.min_new_tokens, params.max_new_tokens
            ),
        });
    }
    if !(0.0..=2.0).contains(&params.temperature) {
        return Err(ClientInitError::InvalidParameter {
            reason: format!("temperature {} outside 0..=2", params.temperature),
        });
    }
    if !(params.top_p > 0.0 && params.top_p <= 1.0) {
        return Err(ClientInitError::InvalidParameter {
            reason: format!("top_p {} outside (0, 1]", params.top_p),
        });
    }
    Ok(())
}

fn require_value(
    field: &'static str,
    value: &str,
    placeholder: Option<&str>,
) -> Result<(), ClientInitError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ClientInitError::MissingValue { field });
    }
    if placeholder == Some(trimmed) {
        return Err(ClientInitError::PlaceholderValue { field });
    }
    Ok(())
}

fn require_http_url(field: &'static str, raw: &str) -> Result<(), ClientInitError> {
    require_value(field, raw, None)?;
    let invalid = |reason: String| ClientInitError::InvalidUrl {
        field,
        url: raw.to_string(),
        reason,
    };
    let parsed = reqwest::Url::parse(raw.trim()).map_err(|err| invalid(err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
    }
    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

/// Memoizes one handle per distinct configuration for as long as the cache lives.
///
/// Construction happens under the lock, so concurrent callers with the same config
/// never build two handles.
pub struct ClientCache<M> {
    entries: Mutex<Vec<(ModelConfig, Arc<M>)>>,
}

impl<M> ClientCache<M> {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn get_or_try_init<F>(
        &self,
        config: &ModelConfig,
        init: F,
    ) -> Result<Arc<M>, ClientInitError>
    where
        F: FnOnce(&ModelConfig) -> Result<M, ClientInitError>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, handle)) = entries.iter().find(|(cached, _)| cached == config) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(init(config)?);
        entries.push((config.clone(), Arc::clone(&handle)));
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M> Default for ClientCache<M> {
    fn default() -> Self {
        Self::new()
    }
}

static WATSONX_CLIENTS: ClientCache<WatsonxChatModel> = ClientCache::new();

/// Returns the process-wide watsonx client for `config`, building it on first use.
pub fn initialize_chat_model(
    config: &ModelConfig,
) -> Result<Arc<WatsonxChatModel>, ClientInitError> {
    WATSONX_CLIENTS.get_or_try_init(config, |config| {
        let client = WatsonxChatModel::new(config)?;
        log::info!("initialized watsonx chat model {}", config.model_id);
        Ok(client)
    })
}

/// Offline stand-in that answers locally. Used with `--dryrun`.
#[derive(Debug, Clone)]
pub struct DryrunChatModel {
    model_id: String,
}

impl DryrunChatModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }
}

impl ChatModel for DryrunChatModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn invoke(&self, request: &ChatRequest) -> Result<String, RemoteInvocationError> {
        let text = request.text().unwrap_or_default();
        let user_text = text
            .rsplit_once(USER_LABEL)
            .map(|(_, tail)| tail)
            .unwrap_or(text);
        let image_note = if request.is_multimodal() {
            " with an image"
        } else {
            ""
        };
        Ok(format!(
            "[dryrun {}] Received {} prompt characters{image_note}. You asked: {}",
            self.model_id,
            text.chars().count(),
            user_text.trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use terrace_contracts::chat::compose_request;

    use super::*;
    use crate::config::GenerationParams;

    fn valid_config() -> ModelConfig {
        ModelConfig {
            api_key: "test-key".to_string(),
            project_id: "project-1".to_string(),
            service_url: "https://us-south.ml.cloud.ibm.com".to_string(),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn placeholder_credentials_fail_clearly() {
        let err = validate_config(&ModelConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ClientInitError::PlaceholderValue {
                field: "WATSONX_API_KEY"
            }
        ));
        assert!(err.to_string().contains("WATSONX_API_KEY"));

        let config = ModelConfig {
            api_key: "real".to_string(),
            ..ModelConfig::default()
        };
        let err = initialize_chat_model(&config).err().map(|err| err.to_string());
        assert!(err.unwrap_or_default().contains("WATSONX_PROJECT_ID"));
    }

    #[test]
    fn blank_and_malformed_values_are_rejected() {
        let blank = ModelConfig {
            model_id: "  ".to_string(),
            ..valid_config()
        };
        assert!(matches!(
            validate_config(&blank),
            Err(ClientInitError::MissingValue {
                field: "WATSONX_MODEL_ID"
            })
        ));

        let bad_url = ModelConfig {
            service_url: "ftp://example.com".to_string(),
            ..valid_config()
        };
        assert!(matches!(
            validate_config(&bad_url),
            Err(ClientInitError::InvalidUrl { .. })
        ));

        let relative = ModelConfig {
            service_url: "not a url".to_string(),
            ..valid_config()
        };
        assert!(validate_config(&relative).is_err());

        let bad_params = ModelConfig {
            parameters: GenerationParams {
                min_new_tokens: 10,
                max_new_tokens: 5,
                ..GenerationParams::default()
            },
            ..valid_config()
        };
        assert!(matches!(
            validate_config(&bad_params),
            Err(ClientInitError::InvalidParameter { .. })
        ));

        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn cache_returns_same_handle_for_identical_config() -> anyhow::Result<()> {
        let cache: ClientCache<DryrunChatModel> = ClientCache::new();
        let builds = AtomicUsize::new(0);
        let build = |config: &ModelConfig| -> Result<DryrunChatModel, ClientInitError> {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(DryrunChatModel::new(config.model_id.clone()))
        };

        let first = cache.get_or_try_init(&valid_config(), build)?;
        let second = cache.get_or_try_init(&valid_config(), build)?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn cache_does_not_store_failed_builds() {
        let cache: ClientCache<DryrunChatModel> = ClientCache::new();
        let result = cache.get_or_try_init(&valid_config(), |_| {
            Err(ClientInitError::InvalidParameter {
                reason: "boom".to_string(),
            })
        });
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn initializer_memoizes_watsonx_client() -> anyhow::Result<()> {
        let config = ModelConfig {
            model_id: "ibm/granite-vision-3-2-2b".to_string(),
            ..valid_config()
        };
        let first = initialize_chat_model(&config)?;
        let second = initialize_chat_model(&config.clone())?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.model_id(), "ibm/granite-vision-3-2-2b");
        Ok(())
    }

    #[test]
    fn dryrun_echoes_user_text() -> anyhow::Result<()> {
        let model = DryrunChatModel::new("dryrun-chat-1");
        let reply = model.invoke(&compose_request("guide", "facts", "Where do I start?", None))?;
        assert!(reply.starts_with("[dryrun dryrun-chat-1]"));
        assert!(reply.ends_with("You asked: Where do I start?"));
        assert!(!reply.contains("with an image"));

        let with_image = model.invoke(&compose_request(
            "guide",
            "facts",
            "And this?",
            Some("aGk=".to_string()),
        ))?;
        assert!(with_image.contains("with an image"));
        Ok(())
    }
}
