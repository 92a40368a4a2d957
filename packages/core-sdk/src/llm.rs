use std::time::Duration;

use anyhow::Result;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{BackendConfig, ConfigStore};
use crate::error::ConfigError;
use crate::models::{ChatCompletionBody, GenerationParameters, Message, Role};
use crate::telemetry;

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

const API_KEY_HEADER: &str = "api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomAuth {
    Bearer,
    ApiKey,
}

/**
 * \brief 后端类型，每种类型只负责构造自己的 URL、请求头与请求体。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Azure,
    OpenAi,
    Custom(CustomAuth),
}

/**
 * \brief 构造完成、尚未发送的出站请求。
 */
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: ChatCompletionBody,
}

impl BackendKind {
    pub fn from_config(cfg: &BackendConfig) -> Result<Self, ConfigError> {
        match cfg.backend_kind.trim().to_ascii_uppercase().as_str() {
            "AZURE" => Ok(Self::Azure),
            "OPENAI" => Ok(Self::OpenAi),
            "CUSTOM" => {
                let auth = match cfg.custom_auth.trim().to_ascii_lowercase().as_str() {
                    "" | "bearer" => CustomAuth::Bearer,
                    "api-key" | "api_key" => CustomAuth::ApiKey,
                    other => return Err(ConfigError::UnsupportedAuth(other.to_string())),
                };
                Ok(Self::Custom(auth))
            }
            _ => Err(ConfigError::UnsupportedBackend(cfg.backend_kind.clone())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::OpenAi => "openai",
            Self::Custom(_) => "custom",
        }
    }

    pub fn build_request(
        &self,
        cfg: &BackendConfig,
        mut body: ChatCompletionBody,
    ) -> Result<OutgoingRequest, ConfigError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let url = match self {
            Self::Azure => {
                headers.insert(API_KEY_HEADER, header_value(&cfg.api_key)?);
                azure_url(&cfg.resource_name, &body.model, &cfg.api_version)
            }
            Self::OpenAi => {
                headers.insert(AUTHORIZATION, bearer(&cfg.api_key)?);
                body.model = openai_model_name(&body.model);
                OPENAI_CHAT_URL.to_string()
            }
            Self::Custom(auth) => {
                match auth {
                    CustomAuth::Bearer => {
                        headers.insert(AUTHORIZATION, bearer(&cfg.api_key)?);
                    }
                    CustomAuth::ApiKey => {
                        headers.insert(API_KEY_HEADER, header_value(&cfg.api_key)?);
                    }
                }
                cfg.custom_endpoint_url.clone()
            }
        };

        Ok(OutgoingRequest { url, headers, body })
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, ConfigError> {
    let mut value = HeaderValue::from_str(raw).map_err(|_| ConfigError::InvalidApiKey)?;
    value.set_sensitive(true);
    Ok(value)
}

fn bearer(api_key: &str) -> Result<HeaderValue, ConfigError> {
    header_value(&format!("Bearer {}", api_key))
}

fn azure_url(resource_name: &str, deployment: &str, api_version: &str) -> String {
    let base = format!(
        "https://{}.openai.azure.com/openai/deployments/{}/chat/completions",
        resource_name, deployment
    );
    let version = api_version.trim();
    if version.is_empty() {
        base
    } else if version.contains('=') {
        // 兼容 "api-version=2023-05-15" 这种整段查询串的写法
        format!("{}?{}", base, version)
    } else {
        format!("{}?api-version={}", base, version)
    }
}

/**
 * \brief 将 Azure 部署名转换为 OpenAI 模型名，仅做子串替换 "35" -> "3.5"。
 */
pub fn openai_model_name(model: &str) -> String {
    model.replace("35", "3.5")
}

/**
 * \brief 按配置补充系统消息与用户后缀，返回新序列，不修改入参。
 */
pub fn augment_messages(conversation: &[Message], cfg: &BackendConfig) -> Vec<Message> {
    let mut out = Vec::with_capacity(conversation.len() + 1);
    if !cfg.system_message.is_empty() {
        out.push(Message::new(Role::System, cfg.system_message.clone()));
    }
    out.extend(conversation.iter().map(|m| match m.role {
        Role::User if !cfg.user_message_suffix.is_empty() => Message::new(
            Role::User,
            format!("{}{}", m.content, cfg.user_message_suffix),
        ),
        _ => m.clone(),
    }));
    out
}

/**
 * \brief 单次分发的归一化结果。分发过程从不返回 Err。
 */
#[derive(Debug, Clone, PartialEq)]
pub enum ChatResult {
    Success(Value),
    UpstreamError { status: u16, message: String },
    TransportError(String),
    ConfigurationError(String),
    Cancelled,
}

impl ChatResult {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::UpstreamError { .. } => "upstream_error",
            Self::TransportError(_) => "transport_error",
            Self::ConfigurationError(_) => "configuration_error",
            Self::Cancelled => "cancelled",
        }
    }

    fn redacted(self, secret: &str) -> Self {
        match self {
            Self::UpstreamError { status, message } => Self::UpstreamError {
                status,
                message: telemetry::redact(&message, secret),
            },
            Self::TransportError(message) => {
                Self::TransportError(telemetry::redact(&message, secret))
            }
            Self::ConfigurationError(message) => {
                Self::ConfigurationError(telemetry::redact(&message, secret))
            }
            other => other,
        }
    }
}

/**
 * \brief 对话分发器：读取配置快照、补充消息、选择后端并发起一次请求。
 */
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    store: ConfigStore,
}

impl Dispatcher {
    /**
     * \brief 创建分发器；`timeout` 为上游整体超时，None 表示不设上限。
     */
    pub fn new(store: ConfigStore, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, store))
    }

    pub fn with_client(client: reqwest::Client, store: ConfigStore) -> Self {
        Self { client, store }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /**
     * \brief 分发一次对话。`cancel` 触发后立即放弃出站请求并关闭连接。
     */
    pub async fn dispatch(
        &self,
        conversation: &[Message],
        params: &GenerationParameters,
        cancel: &CancellationToken,
    ) -> ChatResult {
        let cfg = self.store.get();
        let result = self.dispatch_with(&cfg, conversation, params, cancel).await;
        let result = result.redacted(&cfg.api_key);
        match &result {
            ChatResult::Success(_) | ChatResult::Cancelled => {
                telemetry::log_event("llm.dispatch", &format!("outcome={}", result.label()))
            }
            ChatResult::UpstreamError { status, message } => telemetry::log_error(
                "llm.dispatch",
                &format!("outcome={} status={} message={}", result.label(), status, message),
            ),
            ChatResult::TransportError(message) | ChatResult::ConfigurationError(message) => {
                telemetry::log_error(
                    "llm.dispatch",
                    &format!("outcome={} message={}", result.label(), message),
                )
            }
        }
        result
    }

    async fn dispatch_with(
        &self,
        cfg: &BackendConfig,
        conversation: &[Message],
        params: &GenerationParameters,
        cancel: &CancellationToken,
    ) -> ChatResult {
        let kind = match BackendKind::from_config(cfg) {
            Ok(kind) => kind,
            Err(e) => {
                telemetry::log_error("llm.dispatch", &format!("rejected code={}", e.code()));
                return ChatResult::ConfigurationError(e.to_string());
            }
        };
        let messages = augment_messages(conversation, cfg);
        let body = ChatCompletionBody::new(params, messages);
        let request = match kind.build_request(cfg, body) {
            Ok(request) => request,
            Err(e) => {
                telemetry::log_error("llm.dispatch", &format!("rejected code={}", e.code()));
                return ChatResult::ConfigurationError(e.to_string());
            }
        };

        telemetry::log_event(
            "llm.dispatch",
            &format!(
                "backend={} model={} messages={}",
                kind.label(),
                request.body.model,
                request.body.messages.len()
            ),
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => ChatResult::Cancelled,
            result = self.send(request) => result,
        }
    }

    async fn send(&self, request: OutgoingRequest) -> ChatResult {
        let resp = match self
            .client
            .post(&request.url)
            .headers(request.headers)
            .json(&request.body)
            .send()
            .await
        {
            Ok(resp) => resp,
            // 空或非法的端点地址在发送前就失败，属于配置问题而非网络故障
            Err(e) if e.is_builder() => {
                return ChatResult::ConfigurationError(format!(
                    "invalid upstream endpoint: {}",
                    e.without_url()
                ))
            }
            Err(e) => return ChatResult::TransportError(describe_transport(e)),
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(text) => text,
            Err(e) => return ChatResult::TransportError(describe_transport(e)),
        };

        if status.is_success() {
            match serde_json::from_str::<Value>(&text) {
                Ok(v) => ChatResult::Success(v),
                Err(_) => ChatResult::UpstreamError {
                    status: StatusCode::BAD_GATEWAY.as_u16(),
                    message: "upstream returned a non-JSON body".to_string(),
                },
            }
        } else {
            ChatResult::UpstreamError {
                status: status.as_u16(),
                message: upstream_message(status, &text),
            }
        }
    }
}

fn describe_transport(e: reqwest::Error) -> String {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else {
        "request"
    };
    format!("{} error: {}", kind, e.without_url())
}

/**
 * \brief 从上游错误体中提取可读信息。
 */
fn upstream_message(status: StatusCode, text: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        let found = v
            .get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(|m| m.as_str())
            .or_else(|| v.get("message").and_then(|m| m.as_str()));
        if let Some(message) = found {
            return message.to_string();
        }
    }
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("upstream error")
        .to_string()
}
