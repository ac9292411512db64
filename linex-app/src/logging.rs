use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use linex_config::LoggingConfig;
use tracing_subscriber::{EnvFilter, fmt};

/// 初始化文件日志。等级优先级：命令行 > `RUST_LOG` > 配置文件。
pub fn init_logging(config: &LoggingConfig, level_override: Option<&str>) -> Result<()> {
    if let Some(parent) = config.file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建日志目录 {} 失败", parent.display()))?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(config.append)
        .truncate(!config.append)
        .open(&config.file)
        .with_context(|| format!("打开日志文件 {} 失败", config.file.display()))?;

    let filter = match level_override {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("无效的日志等级 `{level}`"))?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info")),
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("初始化日志失败: {err}"))
}
