use std::sync::{Mutex, PoisonError};

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use terrace_contracts::chat::{ChatRequest, ContentPart};

use crate::client::{validate_config, ChatModel, ClientInitError, RemoteInvocationError};
use crate::config::ModelConfig;

const CHAT_API_VERSION: &str = "2024-05-01";
const IAM_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
const ERROR_BODY_MAX_CHARS: usize = 512;

#[derive(Debug, Clone)]
struct IamToken {
    access_token: String,
    expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct IamTokenResponse {
    access_token: String,
    #[serde(default)]
    expiration: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Chat client for the watsonx.ai `text/chat` endpoint.
///
/// The IAM bearer token is fetched on first use and reused until it nears expiry.
pub struct WatsonxChatModel {
    config: ModelConfig,
    chat_endpoint: String,
    token_endpoint: String,
    http: HttpClient,
    token: Mutex<Option<IamToken>>,
}

impl WatsonxChatModel {
    pub fn new(config: &ModelConfig) -> Result<Self, ClientInitError> {
        validate_config(config)?;
        let http = HttpClient::builder().timeout(config.timeout).build()?;
        Ok(Self {
            chat_endpoint: format!(
                "{}/ml/v1/text/chat?version={CHAT_API_VERSION}",
                trim_base(&config.service_url)
            ),
            token_endpoint: format!("{}/identity/token", trim_base(&config.iam_url)),
            config: config.clone(),
            http,
            token: Mutex::new(None),
        })
    }

    fn bearer_token(&self) -> Result<String, RemoteInvocationError> {
        let mut cached = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        let now = chrono::Utc::now().timestamp();
        if let Some(token) = cached.as_ref() {
            if token.expires_at - TOKEN_REFRESH_MARGIN_SECS > now {
                return Ok(token.access_token.clone());
            }
        }
        let token = self.request_token(now)?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    fn request_token(&self, now: i64) -> Result<IamToken, RemoteInvocationError> {
        log::debug!("requesting IAM token from {}", self.token_endpoint);
        let response = self
            .http
            .post(&self.token_endpoint)
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", IAM_GRANT_TYPE),
                ("apikey", self.config.api_key.as_str()),
            ])
            .send()
            .map_err(|source| RemoteInvocationError::Transport {
                endpoint: self.token_endpoint.clone(),
                source,
            })?;
        let payload = match response_json_or_error(&self.token_endpoint, response) {
            Ok(payload) => payload,
            Err(RemoteInvocationError::Status { status, body, .. }) => {
                return Err(RemoteInvocationError::Auth(format!(
                    "IAM token request returned {status}: {body}"
                )));
            }
            Err(err) => return Err(err),
        };
        let parsed: IamTokenResponse = serde_json::from_value(payload).map_err(|err| {
            RemoteInvocationError::Auth(format!("IAM token response was malformed: {err}"))
        })?;
        if parsed.access_token.trim().is_empty() {
            return Err(RemoteInvocationError::Auth(
                "IAM token response had an empty access_token".to_string(),
            ));
        }
        let expires_at = parsed
            .expiration
            .or_else(|| parsed.expires_in.map(|secs| now + secs))
            .unwrap_or(now + DEFAULT_TOKEN_LIFETIME_SECS);
        Ok(IamToken {
            access_token: parsed.access_token,
            expires_at,
        })
    }

    fn chat_payload(&self, request: &ChatRequest) -> Value {
        let params = &self.config.parameters;
        let content: Vec<Value> = request.parts().iter().map(content_part_json).collect();
        json!({
            "model_id": self.config.model_id,
            "project_id": self.config.project_id,
            "messages": [{
                "role": "user",
                "content": content,
            }],
            "max_tokens": params.max_new_tokens,
            "temperature": params.effective_temperature(),
            "top_p": params.top_p,
        })
    }
}

impl ChatModel for WatsonxChatModel {
    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn invoke(&self, request: &ChatRequest) -> Result<String, RemoteInvocationError> {
        let token = self.bearer_token()?;
        log::debug!(
            "sending {} part(s) to {} ({})",
            request.parts().len(),
            self.chat_endpoint,
            self.config.model_id
        );
        let response = self
            .http
            .post(&self.chat_endpoint)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&self.chat_payload(request))
            .send()
            .map_err(|source| RemoteInvocationError::Transport {
                endpoint: self.chat_endpoint.clone(),
                source,
            })?;
        let payload = response_json_or_error(&self.chat_endpoint, response)?;
        extract_chat_reply(&payload)
    }
}

fn content_part_json(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({
            "type": "text",
            "text": text,
        }),
        ContentPart::Image {
            encoding,
            data,
            detail,
        } => json!({
            "type": "image_url",
            "image_url": {
                "url": encoding.data_url(data),
                "detail": detail.as_str(),
            },
        }),
    }
}

fn extract_chat_reply(payload: &Value) -> Result<String, RemoteInvocationError> {
    let choice = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| RemoteInvocationError::InvalidResponse("missing choices".to_string()))?;
    let content = choice
        .get("message")
        .and_then(|message| message.get("content"))
        .ok_or_else(|| {
            RemoteInvocationError::InvalidResponse("missing choices[0].message.content".to_string())
        })?;
    let text = match content {
        Value::String(text) => text.clone(),
        Value::Array(chunks) => chunks
            .iter()
            .filter_map(|chunk| chunk.get("text").and_then(Value::as_str))
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<&str>>()
            .join("\n"),
        Value::Null => String::new(),
        other => {
            return Err(RemoteInvocationError::InvalidResponse(format!(
                "unexpected content type: {other}"
            )))
        }
    };
    if text.trim().is_empty() {
        return Err(RemoteInvocationError::EmptyReply);
    }
    Ok(text)
}

fn response_json_or_error(
    endpoint: &str,
    response: HttpResponse,
) -> Result<Value, RemoteInvocationError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|source| RemoteInvocationError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;
    if !status.is_success() {
        return Err(RemoteInvocationError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: truncate_text(&body, ERROR_BODY_MAX_CHARS),
        });
    }
    serde_json::from_str(&body).map_err(|err| {
        RemoteInvocationError::InvalidResponse(format!("{endpoint} returned invalid JSON: {err}"))
    })
}

fn trim_base(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
