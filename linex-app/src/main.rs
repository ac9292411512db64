use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use linex_config::{OnRecordError, RunConfig};
use linex_engine::pipeline::{RecordErrorPolicy, RunOutcome};
use tracing::{error, info};

mod logging;
mod run;

/// 折线端点延长：按缓冲半径把每条折线的两端沿原方向延长。
#[derive(Debug, Parser)]
#[command(name = "linex", version, about)]
struct Args {
    /// 配置文件路径，缺省时依次查找 `LINEX_CONFIG` 与 `./config.toml`
    #[arg(long)]
    config: Option<PathBuf>,
    /// 任一记录失败即终止，覆盖配置中的 `on_record_error`
    #[arg(long)]
    abort_on_error: bool,
    /// 日志等级，覆盖 `RUST_LOG` 与配置文件
    #[arg(long)]
    log_level: Option<String>,
}

const EXIT_WITH_SKIPS: u8 = 2;

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match RunConfig::discover(args.config.clone()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("加载配置失败: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = logging::init_logging(&config.logging, args.log_level.as_deref()) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }
    info!(
        input = %config.input,
        output = %config.output,
        wkid = config.wkid,
        "启动折线延长"
    );

    match run::execute(&config, record_policy(&args, &config)) {
        Ok(report) => {
            println!(
                "延长完成：共 {} 条，延长 {} 条，跳过 {} 条",
                report.total,
                report.extended,
                report.skipped.len()
            );
            for skipped in &report.skipped {
                println!("  跳过 {}: {}", skipped.id, skipped.reason);
            }
            match report.outcome() {
                RunOutcome::Complete => ExitCode::SUCCESS,
                RunOutcome::CompletedWithSkips => ExitCode::from(EXIT_WITH_SKIPS),
            }
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "运行失败");
            eprintln!("运行失败: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn record_policy(args: &Args, config: &RunConfig) -> RecordErrorPolicy {
    if args.abort_on_error {
        return RecordErrorPolicy::Abort;
    }
    match config.run.on_record_error {
        OnRecordError::Skip => RecordErrorPolicy::Skip,
        OnRecordError::Abort => RecordErrorPolicy::Abort,
    }
}
