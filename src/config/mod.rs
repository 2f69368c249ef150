use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::context::ContextConfig;

const DEFAULT_PORT: u16 = 4620;
const DEFAULT_SYNC_PORT: u16 = 4621;
const DEFAULT_MAX_VERSIONS: usize = 50;
const DEFAULT_MODEL_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_TEXT_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_VISION_MODEL: &str = "gpt-4.1";

// ─── ModelConfig ──────────────────────────────────────────────────────────────

/// Code-generation model configuration (`[model]` in config.toml).
///
/// The API key is a server credential — never accepted from clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    /// API key for the model backend. Usually set via `ISLA_MODEL_API_KEY`.
    /// None means plan requests fail fast with a configuration error.
    pub api_key: Option<String>,
    /// Base URL of the model API (default: https://api.openai.com).
    pub base_url: String,
    /// Model ID for text-only plan requests.
    pub text_model: String,
    /// Model ID used when any conversation message carries images.
    pub vision_model: String,
    /// Upstream request timeout in seconds (default: 120).
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_MODEL_BASE_URL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            timeout_secs: 120,
        }
    }
}

// ─── PreviewConfig ────────────────────────────────────────────────────────────

/// Live preview sync tuning (`[preview]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Delay between an apply response and the patch broadcast, letting the
    /// preview's current render cycle settle first (milliseconds).
    pub settle_delay_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 120,
        }
    }
}

// ─── ObservabilityConfig ──────────────────────────────────────────────────────

/// Daemon observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds). Default: 100.
    /// Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// REST API port (default: 4620).
    port: Option<u16>,
    /// Preview sync WebSocket port (default: 4621).
    sync_port: Option<u16>,
    /// Log level filter string, e.g. "debug", "info,islad=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured).
    log_format: Option<String>,
    /// Bind address for both servers (default: "127.0.0.1").
    bind_address: Option<String>,
    /// Versions kept per project before the oldest snapshots are pruned
    /// (default: 50; 0 = unlimited).
    max_versions: Option<usize>,
    /// Bearer token for the REST API. None = auth disabled (loopback use).
    api_token: Option<String>,
    /// Model backend configuration (`[model]`).
    model: Option<ModelConfig>,
    /// Context window builder tuning (`[context]`).
    context: Option<ContextConfig>,
    /// Live preview sync tuning (`[preview]`).
    preview: Option<PreviewConfig>,
    /// Observability configuration (`[observability]`).
    observability: Option<ObservabilityConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── IslaConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IslaConfig {
    pub port: u16,
    pub sync_port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    /// Bind address for both servers (ISLA_BIND env var, default: "127.0.0.1").
    pub bind_address: String,
    /// Versions kept per project (0 = unlimited).
    pub max_versions: usize,
    /// Bearer token required to call the REST API (ISLA_API_TOKEN env var).
    /// None = REST authentication disabled (local-only, trusted loopback use).
    pub api_token: Option<String>,
    pub model: ModelConfig,
    pub context: ContextConfig,
    pub preview: PreviewConfig,
    pub observability: ObservabilityConfig,
}

impl IslaConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        sync_port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let sync_port = sync_port.or(toml.sync_port).unwrap_or(DEFAULT_SYNC_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());
        let max_versions = toml.max_versions.unwrap_or(DEFAULT_MAX_VERSIONS);

        let bind_address = bind_address
            .or(std::env::var("ISLA_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let log_format = std::env::var("ISLA_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let api_token = std::env::var("ISLA_API_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.api_token);

        let mut model = toml.model.unwrap_or_default();
        if let Ok(key) = std::env::var("ISLA_MODEL_API_KEY") {
            if !key.is_empty() {
                model.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("ISLA_MODEL_URL") {
            if !url.is_empty() {
                model.base_url = url;
            }
        }

        let context = toml.context.unwrap_or_default();
        let preview = toml.preview.unwrap_or_default();
        let observability = toml.observability.unwrap_or_default();

        Self {
            port,
            sync_port,
            data_dir,
            log,
            log_format,
            bind_address,
            max_versions,
            api_token,
            model,
            context,
            preview,
            observability,
        }
    }
}

// ─── Hot-reloadable config subset ─────────────────────────────────────────────

/// Non-critical config fields that can be changed without restarting.
#[derive(Debug, Clone)]
pub struct HotConfig {
    pub log_level: String,
    pub max_versions: usize,
}

/// Watches `config.toml` for changes and reloads non-critical fields.
///
/// The watcher uses the `notify` crate (kqueue on macOS, inotify on Linux)
/// to detect file modifications. Only `log` and `max_versions` are
/// reloaded; ports, bind address, and model settings require a restart.
pub struct ConfigWatcher {
    pub hot: Arc<RwLock<HotConfig>>,
    // Hold the watcher alive; dropping it stops the file watch.
    _watcher: notify_debouncer_full::Debouncer<
        notify_debouncer_full::notify::RecommendedWatcher,
        notify_debouncer_full::FileIdMap,
    >,
}

impl ConfigWatcher {
    /// Start watching `{data_dir}/config.toml` for changes.
    ///
    /// Returns `None` if the watcher could not be created (non-fatal; the
    /// daemon runs fine without hot-reload).
    pub fn start(data_dir: &Path) -> Option<Self> {
        let config_path = data_dir.join("config.toml");
        let initial = load_hot_config(&config_path);
        let hot = Arc::new(RwLock::new(initial));

        let hot_clone = hot.clone();
        let config_path_clone = config_path.clone();
        let rt_handle = tokio::runtime::Handle::current();

        let watcher = notify_debouncer_full::new_debouncer(
            std::time::Duration::from_secs(2),
            None,
            move |result: notify_debouncer_full::DebounceEventResult| {
                if let Ok(events) = result {
                    // Only act on modify/create events
                    let relevant = events.iter().any(|e| {
                        use notify_debouncer_full::notify::EventKind;
                        matches!(e.event.kind, EventKind::Modify(_) | EventKind::Create(_))
                    });
                    if relevant {
                        let hot = hot_clone.clone();
                        let path = config_path_clone.clone();
                        rt_handle.spawn(async move {
                            let new_config = load_hot_config(&path);
                            let mut guard = hot.write().await;
                            if guard.log_level != new_config.log_level
                                || guard.max_versions != new_config.max_versions
                            {
                                info!(
                                    log_level = %new_config.log_level,
                                    max_versions = new_config.max_versions,
                                    "config.toml reloaded"
                                );
                                *guard = new_config;
                            }
                        });
                    }
                }
            },
        );

        match watcher {
            Ok(mut debouncer) => {
                use notify_debouncer_full::notify::Watcher as _;
                // Watch the data_dir (parent of config.toml) since watching a
                // non-existent file fails on some platforms.
                let watch_path = config_path.parent().unwrap_or_else(|| Path::new("."));
                if let Err(e) = debouncer.watcher().watch(
                    watch_path,
                    notify_debouncer_full::notify::RecursiveMode::NonRecursive,
                ) {
                    warn!("config watcher failed to start: {e} — hot-reload disabled");
                    return None;
                }
                info!(path = %config_path.display(), "config hot-reload watcher started");
                Some(Self {
                    hot,
                    _watcher: debouncer,
                })
            }
            Err(e) => {
                warn!("config watcher creation failed: {e} — hot-reload disabled");
                None
            }
        }
    }
}

/// Load only the hot-reloadable fields from config.toml.
fn load_hot_config(path: &Path) -> HotConfig {
    let toml = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| toml::from_str::<TomlConfig>(&s).ok())
        .unwrap_or_default();
    HotConfig {
        log_level: toml.log.unwrap_or_else(|| "info".to_string()),
        max_versions: toml.max_versions.unwrap_or(DEFAULT_MAX_VERSIONS),
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/islad
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("islad");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/islad or ~/.local/share/islad
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("islad");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("islad");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\islad
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("islad");
        }
    }
    // Fallback
    PathBuf::from(".islad")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_toml() {
        let dir = std::env::temp_dir().join(format!("islad-cfg-{}", uuid::Uuid::new_v4()));
        let cfg = IslaConfig::new(None, None, Some(dir), None, None);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.sync_port, DEFAULT_SYNC_PORT);
        assert_eq!(cfg.max_versions, DEFAULT_MAX_VERSIONS);
        assert_eq!(cfg.model.base_url, DEFAULT_MODEL_BASE_URL);
        assert_eq!(cfg.context.full_file_cap, 14_000);
    }

    #[test]
    fn cli_beats_toml() {
        let dir = std::env::temp_dir().join(format!("islad-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.toml"),
            "port = 9000\nlog = \"debug\"\nmax_versions = 5\n",
        )
        .unwrap();
        let cfg = IslaConfig::new(Some(4444), None, Some(dir), None, None);
        assert_eq!(cfg.port, 4444);
        assert_eq!(cfg.log, "debug");
        assert_eq!(cfg.max_versions, 5);
    }

    #[test]
    fn model_section_parses() {
        let dir = std::env::temp_dir().join(format!("islad-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.toml"),
            "[model]\ntext_model = \"test-model\"\ntimeout_secs = 30\n",
        )
        .unwrap();
        let cfg = IslaConfig::new(None, None, Some(dir), None, None);
        assert_eq!(cfg.model.text_model, "test-model");
        assert_eq!(cfg.model.timeout_secs, 30);
        // Unset fields keep their defaults.
        assert_eq!(cfg.model.vision_model, DEFAULT_VISION_MODEL);
    }
}
