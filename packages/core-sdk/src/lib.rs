pub mod cancel;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod server;
pub mod telemetry;

#[cfg(test)]
mod testing;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::cancel;
    pub use crate::config;
    pub use crate::error;
    pub use crate::llm;
    pub use crate::models;
    pub use crate::server;
    pub use crate::telemetry;
}
