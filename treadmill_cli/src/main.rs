mod cli;
mod error_fmt;
mod rt;
mod session;

use std::path::Path;

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE, RtLock};
use crate::error_fmt::{
    exit, exit_code_for_error, exit_code_for_summary, format_error_json, format_summary_json,
    humanize,
};
use crate::rt::RtRequest;
use crate::session::{RunOptions, run_treadmill, self_check};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let code = match real_main(cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "exiting with error");
            if JSON_MODE.get().copied().unwrap_or(false) {
                println!("{}", format_error_json(&err));
            } else {
                eprintln!("{}", humanize(&err));
            }
            exit_code_for_error(&err)
        }
    };
    std::process::exit(code);
}

fn real_main(cli: Cli) -> eyre::Result<i32> {
    color_eyre::install()?;
    let cfg = load_config(&cli.config)?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    match cli.cmd {
        Commands::Run {
            speed,
            duration_s,
            mode,
            no_console,
            rt,
            rt_prio,
            rt_lock,
            rt_cpu,
        } => {
            let opts = RunOptions {
                speed,
                duration_s,
                mode,
                console: !no_console,
                rt: rt.then(|| RtRequest {
                    prio: rt_prio,
                    lock: rt_lock.unwrap_or_else(RtLock::os_default),
                    cpu: rt_cpu,
                }),
            };
            let started = chrono::Utc::now();
            let summary = run_treadmill(&cfg, &opts)?;
            if cli.json {
                println!("{}", format_summary_json(&summary, started.timestamp()));
            } else if let Some(report) = &summary.last {
                println!(
                    "Session ended: {} after {:.1} s ({} sessions)",
                    report.cause,
                    report.elapsed.as_secs_f64(),
                    summary.sessions
                );
            } else {
                println!("No session ran.");
            }
            Ok(exit_code_for_summary(&summary))
        }
        Commands::SelfCheck => {
            self_check(&cfg)?;
            println!("self-check ok ({} backend)", session::BACKEND);
            Ok(exit::OK)
        }
    }
}

/// Read and validate the config. A missing file means built-in defaults.
fn load_config(path: &Path) -> eyre::Result<treadmill_config::Config> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(text) => treadmill_config::load_toml(&text)
            .wrap_err_with(|| format!("parse config {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => treadmill_config::Config::default(),
        Err(e) => return Err(e).wrap_err_with(|| format!("read config {}", path.display())),
    };
    cfg.validate()
        .wrap_err_with(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

fn init_tracing(
    json: bool,
    level: &str,
    logging: &treadmill_config::Logging,
) -> eyre::Result<()> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };

    let file = match &logging.file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let dir = dir.unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name"))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let level = logging.level.as_deref().unwrap_or("info");
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(EnvFilter::new(level))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| eyre::eyre!("init tracing: {e}"))
}
