use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/**
 * \brief 当前生效的后端配置。
 *
 * `backend_kind` 保留原始字符串，在每次分发时才解析，
 * 这样通过设置接口写入的非法值会以配置错误的形式返回给调用方。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /** \brief 后端类型：AZURE / OPENAI / CUSTOM */
    pub backend_kind: String,
    /** \brief Azure 资源名 */
    pub resource_name: String,
    /** \brief API 密钥 */
    pub api_key: String,
    /** \brief Azure API 版本 */
    pub api_version: String,
    /** \brief 自定义兼容端点 */
    pub custom_endpoint_url: String,
    /** \brief 自定义端点的鉴权方式：bearer / api-key */
    pub custom_auth: String,
    /** \brief 前置的系统消息，空串表示不注入 */
    pub system_message: String,
    /** \brief 追加到每条用户消息末尾的文本 */
    pub user_message_suffix: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend_kind: "AZURE".to_string(),
            resource_name: String::new(),
            api_key: String::new(),
            api_version: String::new(),
            custom_endpoint_url: String::new(),
            custom_auth: "bearer".to_string(),
            system_message: String::new(),
            user_message_suffix: String::new(),
        }
    }
}

impl BackendConfig {
    /**
     * \brief 从环境变量读取进程启动时的默认配置。
     */
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).unwrap_or_default();
        Self {
            backend_kind: lookup("BACKEND_KIND").unwrap_or(defaults.backend_kind),
            resource_name: lookup("RESOURCE_NAME")
                .or_else(|| lookup("RESSOURCE_NAME"))
                .unwrap_or_default(),
            api_key: get("OPENAI_API_KEY"),
            api_version: get("API_VERSION"),
            custom_endpoint_url: get("CUSTOM_ENDPOINT_URL"),
            custom_auth: lookup("CUSTOM_AUTH").unwrap_or(defaults.custom_auth),
            system_message: get("SYSTEM_MESSAGE"),
            user_message_suffix: get("USER_MESSAGE_SUFFIX"),
        }
    }
}

/**
 * \brief 部分更新：出现的字段覆盖，缺失的字段保持不变。空串照常写入。
 */
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfigPatch {
    #[serde(default)]
    pub backend_kind: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub custom_endpoint_url: Option<String>,
    #[serde(default)]
    pub custom_auth: Option<String>,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub user_message_suffix: Option<String>,
}

impl BackendConfigPatch {
    pub fn apply(self, cfg: &mut BackendConfig) {
        let fields = [
            (self.backend_kind, &mut cfg.backend_kind),
            (self.resource_name, &mut cfg.resource_name),
            (self.api_key, &mut cfg.api_key),
            (self.api_version, &mut cfg.api_version),
            (self.custom_endpoint_url, &mut cfg.custom_endpoint_url),
            (self.custom_auth, &mut cfg.custom_auth),
            (self.system_message, &mut cfg.system_message),
            (self.user_message_suffix, &mut cfg.user_message_suffix),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }

    /** \brief 更新涉及的字段名，仅用于日志，不含取值。 */
    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        let checks = [
            (self.backend_kind.is_some(), "backend_kind"),
            (self.resource_name.is_some(), "resource_name"),
            (self.api_key.is_some(), "api_key"),
            (self.api_version.is_some(), "api_version"),
            (self.custom_endpoint_url.is_some(), "custom_endpoint_url"),
            (self.custom_auth.is_some(), "custom_auth"),
            (self.system_message.is_some(), "system_message"),
            (self.user_message_suffix.is_some(), "user_message_suffix"),
        ];
        for (present, name) in checks {
            if present {
                out.push(name);
            }
        }
        out
    }
}

/**
 * \brief 进程内共享的配置存储。
 *
 * 读取返回整份快照；更新时构造新结构并整体替换，读方不会看到半更新状态。
 */
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<Arc<BackendConfig>>>,
}

impl ConfigStore {
    pub fn new(initial: BackendConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    pub fn from_env() -> Self {
        Self::new(BackendConfig::from_env())
    }

    pub fn get(&self) -> Arc<BackendConfig> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, patch: BackendConfigPatch) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = BackendConfig::clone(&guard);
        patch.apply(&mut next);
        *guard = Arc::new(next);
    }
}

/**
 * \brief GET /settings 返回的视图，默认遮蔽 API 密钥。
 */
#[derive(Debug, Clone, Serialize)]
pub struct SettingsView {
    pub backend_kind: String,
    pub resource_name: String,
    pub api_key: String,
    pub api_version: String,
    pub custom_endpoint_url: String,
    pub custom_auth: String,
    pub system_message: String,
    pub user_message_suffix: String,
}

impl SettingsView {
    pub fn from_config(cfg: &BackendConfig, expose_api_key: bool) -> Self {
        Self {
            backend_kind: cfg.backend_kind.clone(),
            resource_name: cfg.resource_name.clone(),
            api_key: if expose_api_key {
                cfg.api_key.clone()
            } else {
                mask_secret(&cfg.api_key)
            },
            api_version: cfg.api_version.clone(),
            custom_endpoint_url: cfg.custom_endpoint_url.clone(),
            custom_auth: cfg.custom_auth.clone(),
            system_message: cfg.system_message.clone(),
            user_message_suffix: cfg.user_message_suffix.clone(),
        }
    }
}

/**
 * \brief 遮蔽密钥：长度超过 8 时保留末 4 位。
 */
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("****{}", tail)
    } else {
        "****".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> BackendConfig {
        BackendConfig {
            backend_kind: "AZURE".to_string(),
            resource_name: "swag".to_string(),
            api_key: "sk-secret-123456".to_string(),
            api_version: "2023-05-15".to_string(),
            custom_endpoint_url: String::new(),
            custom_auth: "bearer".to_string(),
            system_message: "be nice".to_string(),
            user_message_suffix: String::new(),
        }
    }

    #[test]
    fn test_from_lookup_defaults_and_legacy_name() {
        let env: HashMap<&str, &str> = [
            ("RESSOURCE_NAME", "legacy"),
            ("OPENAI_API_KEY", "k"),
            ("SYSTEM_MESSAGE", "sys"),
        ]
        .into_iter()
        .collect();
        let cfg = BackendConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.backend_kind, "AZURE");
        assert_eq!(cfg.resource_name, "legacy");
        assert_eq!(cfg.api_key, "k");
        assert_eq!(cfg.system_message, "sys");
        assert_eq!(cfg.custom_auth, "bearer");
        assert_eq!(cfg.user_message_suffix, "");
    }

    #[test]
    fn test_update_only_touches_present_fields() {
        let store = ConfigStore::new(sample());
        let before = store.get();
        store.update(BackendConfigPatch {
            system_message: Some("X".to_string()),
            ..Default::default()
        });
        let after = store.get();
        assert_eq!(after.system_message, "X");
        let mut expected = BackendConfig::clone(&before);
        expected.system_message = "X".to_string();
        assert_eq!(*after, expected);
        // 旧快照不受影响
        assert_eq!(before.system_message, "be nice");
    }

    #[test]
    fn test_update_accepts_empty_strings() {
        let store = ConfigStore::new(sample());
        store.update(BackendConfigPatch {
            api_key: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(store.get().api_key, "");
    }

    #[test]
    fn test_patch_from_json_and_touched_fields() {
        let patch: BackendConfigPatch = serde_json::from_str(
            r#"{"system_message":"hello","user_message_suffix":" pls","api_key":"zzz"}"#,
        )
        .expect("parse patch");
        assert_eq!(
            patch.touched_fields(),
            vec!["api_key", "system_message", "user_message_suffix"]
        );
    }

    #[test]
    fn test_settings_view_masks_key() {
        let cfg = sample();
        let view = SettingsView::from_config(&cfg, false);
        assert_eq!(view.api_key, "****3456");
        assert_eq!(view.system_message, "be nice");
        let exposed = SettingsView::from_config(&cfg, true);
        assert_eq!(exposed.api_key, "sk-secret-123456");
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret(""), "");
    }
}
