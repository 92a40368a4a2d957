use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use swaggpt_core_sdk::{
    config::{ConfigStore, SettingsView},
    llm::{ChatResult, Dispatcher},
    models::{GenerationParameters, Message, Role},
    server::{self, ServerOptions},
    telemetry,
};

/**
 * \brief CLI 程序入口：启动代理服务，或直接发送一次对话。
 */
#[derive(Parser, Debug)]
#[command(name = "swaggpt", version, about = "SwagGPT chat proxy")]
struct Cli {
    /** \brief 同时写入 logs/swaggpt.log */
    #[arg(long, global = true, default_value_t = false)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 启动 HTTP 服务并提供前端页面。
     */
    Serve {
        #[arg(long)]
        addr: Option<String>,
        #[arg(long)]
        ui_dir: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        expose_api_key: bool,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /**
     * \brief 使用环境变量中的配置发送一条用户消息，Ctrl-C 取消。
     */
    Chat {
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = "gpt-35-turbo")]
        model: String,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long)]
        top_p: Option<f64>,
        #[arg(long)]
        frequency_penalty: Option<f64>,
        #[arg(long)]
        presence_penalty: Option<f64>,
    },

    /**
     * \brief 打印当前环境配置（密钥已遮蔽）。
     */
    Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = cli.log_file
        || std::env::var("SWAGGPT_LOG_FILE")
            .map(|v| v.trim() == "1")
            .unwrap_or(false);
    telemetry::set_file_logging(log_file);

    let store = ConfigStore::from_env();

    match cli.command {
        Commands::Serve {
            addr,
            ui_dir,
            expose_api_key,
            timeout_secs,
        } => {
            let mut options = ServerOptions::from_env();
            if let Some(addr) = addr {
                options.addr = addr;
            }
            if let Some(ui_dir) = ui_dir {
                options.ui_dir = ui_dir;
            }
            options.expose_api_key |= expose_api_key;
            if let Some(secs) = timeout_secs {
                options.upstream_timeout = Some(Duration::from_secs(secs));
            }
            server::run(options, store).await?;
        }
        Commands::Chat {
            prompt,
            model,
            max_tokens,
            temperature,
            top_p,
            frequency_penalty,
            presence_penalty,
        } => {
            let timeout = ServerOptions::from_env().upstream_timeout;
            let dispatcher = Dispatcher::new(store, timeout)?;
            let params = GenerationParameters {
                model,
                max_tokens,
                temperature,
                top_p,
                frequency_penalty,
                presence_penalty,
            };
            let messages = vec![Message::new(Role::User, prompt)];

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            match dispatcher.dispatch(&messages, &params, &cancel).await {
                ChatResult::Success(v) => {
                    let content = v
                        .get("choices")
                        .and_then(|c| c.get(0))
                        .and_then(|c| c.get("message"))
                        .and_then(|m| m.get("content"))
                        .and_then(|c| c.as_str());
                    match content {
                        Some(text) => println!("{}", text),
                        None => println!("{}", serde_json::to_string_pretty(&v)?),
                    }
                }
                ChatResult::Cancelled => println!("(cancelled)"),
                ChatResult::UpstreamError { status, message } => {
                    bail!("upstream error {}: {}", status, message)
                }
                ChatResult::TransportError(message) => bail!("transport error: {}", message),
                ChatResult::ConfigurationError(message) => {
                    bail!("configuration error: {}", message)
                }
            }
        }
        Commands::Settings => {
            let cfg = store.get();
            let view = SettingsView::from_config(&cfg, false);
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

    Ok(())
}
