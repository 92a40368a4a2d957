use serde::{Deserialize, Serialize};

/**
 * \brief 消息角色，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/**
 * \brief 单条对话消息。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: Role,
    /** \brief 内容 */
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/**
 * \brief 每次请求由调用方提供的生成参数；缺省值不做服务端补全。
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParameters {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
}

/**
 * \brief POST /chat 的请求体。`token` 是前端沿用的最大 token 字段名。
 */
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub token: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    /** \brief 可选的请求标识，用于 POST /chat/{id}/cancel。 */
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ChatRequest {
    pub fn params(&self) -> GenerationParameters {
        GenerationParameters {
            model: self.model.clone(),
            max_tokens: self.token,
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
        }
    }
}

/**
 * \brief 发往后端的 chat/completions 请求体。
 */
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionBody {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

impl ChatCompletionBody {
    pub fn new(params: &GenerationParameters, messages: Vec<Message>) -> Self {
        Self {
            model: params.model.clone(),
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_request_from_ui_payload() {
        let req: ChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "model": "gpt-35-turbo",
            "token": 256,
            "temperature": 0.7,
            "top_p": 0.95,
            "frequency_penalty": 0,
            "presence_penalty": 0
        }))
        .expect("parse chat request");
        assert_eq!(req.messages, vec![Message::new(Role::User, "hi")]);
        let params = req.params();
        assert_eq!(params.max_tokens, Some(256));
        assert_eq!(params.top_p, Some(0.95));
        assert!(req.request_id.is_none());
    }

    #[test]
    fn test_body_uses_underscore_names_and_drops_absent() {
        let params = GenerationParameters {
            model: "gpt-4".to_string(),
            max_tokens: Some(100),
            top_p: Some(1.0),
            ..Default::default()
        };
        let body = ChatCompletionBody::new(&params, vec![Message::new(Role::User, "x")]);
        let v = serde_json::to_value(&body).expect("serialize body");
        assert_eq!(v["max_tokens"], json!(100));
        assert_eq!(v["top_p"], json!(1.0));
        assert_eq!(v["messages"][0]["role"], json!("user"));
        assert!(v.get("temperature").is_none());
        assert!(v.get("presence_penalty").is_none());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let res = serde_json::from_value::<Message>(json!({"role": "tool", "content": "x"}));
        assert!(res.is_err());
    }
}
