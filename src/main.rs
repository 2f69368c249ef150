use anyhow::Result;
use clap::{Parser, Subcommand};
use islad::{
    config::{ConfigWatcher, IslaConfig},
    plan::model::HttpPlanModel,
    project::templates::LIVE_PAGES,
    rest, storage::Storage, sync, AppContext,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "islad",
    about = "Isla Editor Host — patch-plan daemon for live page editing",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// REST API port
    #[arg(long, env = "ISLA_PORT")]
    port: Option<u16>,

    /// Preview sync WebSocket port
    #[arg(long, env = "ISLA_SYNC_PORT")]
    sync_port: Option<u16>,

    /// Data directory for config and the SQLite database
    #[arg(long, env = "ISLA_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ISLA_LOG")]
    log: Option<String>,

    /// Bind address for both servers (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "ISLA_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "ISLA_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand given).
    ///
    /// Examples:
    ///   islad serve
    ///   islad
    Serve,
    /// List the live-page templates projects can be seeded from.
    ///
    /// Examples:
    ///   islad templates
    Templates,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Init once — must happen before any tracing calls.
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();
    let log_format =
        std::env::var("ISLA_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref(), &log_format);

    match args.command {
        Some(Command::Templates) => {
            for template in LIVE_PAGES {
                println!("{:<12} {}", template.slug, template.file_path);
            }
            Ok(())
        }
        None | Some(Command::Serve) => {
            run_server(
                args.port,
                args.sync_port,
                args.data_dir,
                args.log,
                args.bind_address,
            )
            .await
        }
    }
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("islad.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}

async fn run_server(
    port: Option<u16>,
    sync_port: Option<u16>,
    data_dir: Option<std::path::PathBuf>,
    log: Option<String>,
    bind_address: Option<String>,
) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "islad starting");

    let config = IslaConfig::new(port, sync_port, data_dir, log, bind_address);
    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        sync_port = config.sync_port,
        max_versions = config.max_versions,
        "config loaded"
    );

    if config.model.api_key.is_none() {
        warn!("no model API key configured (ISLA_MODEL_API_KEY) — plan requests will fail");
    }

    let storage = Storage::new_with_slow_query(
        &config.data_dir,
        config.observability.slow_query_threshold_ms,
    )
    .await?;

    let model = Arc::new(HttpPlanModel::new(&config.model)?);
    let data_dir = config.data_dir.clone();
    let ctx = Arc::new(AppContext::new(config, storage, model));

    // Hot-reload for non-critical config fields
    let _config_watcher = match ConfigWatcher::start(&data_dir) {
        Some(watcher) => {
            let hot = watcher.hot.clone();
            let projects = ctx.projects.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_secs(5));
                loop {
                    interval.tick().await;
                    let hot = hot.read().await;
                    projects.set_max_versions(hot.max_versions);
                }
            });
            Some(watcher)
        }
        None => None,
    };

    // REST API in the background; the sync server owns the shutdown signal.
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = rest::start_rest_server(ctx).await {
                tracing::error!(err = %e, "REST server exited");
            }
        });
    }

    sync::run(ctx).await
}
