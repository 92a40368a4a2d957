use thiserror::Error;

/**
 * \brief 后端选择阶段的配置错误，发生时不会发起任何网络请求。
 */
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported backend kind: {0}")]
    UnsupportedBackend(String),
    #[error("unsupported custom auth scheme: {0}")]
    UnsupportedAuth(String),
    #[error("api key contains characters not allowed in a header")]
    InvalidApiKey,
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedBackend(_) => "CFG-1001",
            Self::UnsupportedAuth(_) => "CFG-1002",
            Self::InvalidApiKey => "CFG-1003",
        }
    }
}
