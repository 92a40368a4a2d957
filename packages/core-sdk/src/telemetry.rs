use std::{fs::OpenOptions, io::Write, path::PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

static FILE_SINK: Lazy<std::sync::RwLock<Option<PathBuf>>> =
    Lazy::new(|| std::sync::RwLock::new(None));

/**
 * \brief 开启或关闭文件日志（logs/swaggpt.log）。stderr 输出始终保留。
 */
pub fn set_file_logging(enabled: bool) {
    if let Ok(mut guard) = FILE_SINK.write() {
        *guard = if enabled {
            Some(PathBuf::from("logs"))
        } else {
            None
        };
    }
}

/**
 * \brief 记录常规事件。
 */
pub fn log_event(category: &str, message: &str) {
    write_line("INFO", category, message);
}

/**
 * \brief 记录错误事件。
 */
pub fn log_error(category: &str, message: &str) {
    write_line("ERROR", category, message);
}

/**
 * \brief 把文本中的密钥替换为占位符，空密钥不做处理。
 */
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "[redacted]")
}

fn write_line(level: &str, category: &str, message: &str) {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "-".to_string());
    let line = format!("{} [{}] {} - {}", timestamp, level, category, message);
    eprintln!("{}", line);

    let dir = FILE_SINK.read().ok().and_then(|g| g.clone());
    if let Some(dir) = dir {
        if let Err(err) = append_to_file(dir, &line) {
            eprintln!("telemetry write failed: {}", err);
        }
    }
}

fn append_to_file(log_dir: PathBuf, line: &str) -> Result<()> {
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("swaggpt.log"))?;
    writeln!(file, "{}", line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("bad key sk-abc for sk-abc", "sk-abc"),
            "bad key [redacted] for [redacted]"
        );
        assert_eq!(redact("nothing here", ""), "nothing here");
    }
}
