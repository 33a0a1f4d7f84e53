//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `--config PATH` (command line)
//! 2. `$MAIL2RMQ_CONFIG` (environment variable)
//! 3. `~/.config/mail2rmq/config.toml` (Linux/macOS)
//!    `%APPDATA%\mail2rmq\config.toml` (Windows)
//!
//! The raw [`Config`] is validated exactly once into an immutable [`Settings`]
//! value before any message is read.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Mail2RmqError, Result};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV_VAR: &str = "MAIL2RMQ_CONFIG";

/// Top-level configuration, as written in the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection and exchange settings.
    pub broker: BrokerConfig,
    /// Queue routing tables.
    pub routes: RouteTable,
    /// Attachment extraction and subject filtering.
    pub attachments: AttachmentConfig,
    /// Working directories.
    pub paths: PathsConfig,
    /// Log file and level.
    pub logging: LoggingConfig,
    /// Optional debug route for a single sender address.
    pub debug: Option<DebugConfig>,
}

/// Broker connection and exchange settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Exchange every message is published to.
    pub exchange_name: String,
    /// Exchange type: "direct", "topic", "fanout", "headers".
    pub exchange_type: String,
    /// Is the exchange durable.
    pub exchange_durable: bool,
    /// Are queues durable.
    pub queue_durable: bool,
    /// Do queues delete themselves once unused.
    pub auto_delete: bool,
}

/// One complete set of routing rules.
///
/// The primary table lives under `[routes]`; the debug route carries its own
/// copy under `[debug.routes]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTable {
    /// Queues addressable by (canonicalized) subject line.
    pub valid_queues: Vec<String>,
    /// Sender address → queue receiving that sender's attachments.
    pub address_queues: BTreeMap<String, String>,
    /// Queues accepting file attachments by subject line.
    pub file_queues: Vec<String>,
    /// Catch-all queue for messages nothing else matched.
    pub error_queue: String,
    /// Queue for mapped senders whose message had no usable attachment.
    pub address_error_queue: String,
    /// Queue for attachments whose subject is not a known file queue.
    pub file_error_queue: String,
}

/// Attachment extraction and subject filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentConfig {
    /// Content types extracted as attachments.
    pub types: Vec<String>,
    /// Regular expressions removed from the subject line before matching.
    pub subject_filters: Vec<String>,
}

/// Working directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Staging directory for extracted attachments.
    pub tmp_dir: PathBuf,
    /// Directory receiving messages that could not be published.
    pub archive_dir: PathBuf,
}

/// Log destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Append-only log file.
    pub file: PathBuf,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: String,
}

/// Debug route: messages from `address` are classified against `routes`
/// and their dispatch is logged to `log_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    pub address: String,
    pub log_file: PathBuf,
    #[serde(default)]
    pub routes: RouteTable,
}

// ── Default implementations ─────────────────────────────────────

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            exchange_name: "mail2rmq".to_string(),
            exchange_type: "direct".to_string(),
            exchange_durable: true,
            queue_durable: true,
            auto_delete: false,
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            valid_queues: Vec::new(),
            address_queues: BTreeMap::new(),
            file_queues: Vec::new(),
            error_queue: "ErrorQueue".to_string(),
            address_error_queue: "AddrErrorQueue".to_string(),
            file_error_queue: "FileErrorQueue".to_string(),
        }
    }
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            types: vec!["application/pdf".to_string()],
            subject_filters: vec![r"\[.*\]".to_string()],
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = data_dir();
        Self {
            tmp_dir: base.join("tmp"),
            archive_dir: base.join("email_dir"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: data_dir().join("logs").join("mail2rmq.log"),
            level: "info".to_string(),
        }
    }
}

// ── Validated settings ──────────────────────────────────────────

/// Validated, immutable configuration handed to the pipeline.
#[derive(Debug, Clone)]
pub struct Settings {
    pub broker: BrokerConfig,
    pub routes: RouteTable,
    /// Lower-cased content types.
    pub attach_types: Vec<String>,
    /// Compiled subject filters, applied in order.
    pub subject_filters: Vec<Regex>,
    pub tmp_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub log_file: PathBuf,
    pub log_level: String,
    pub debug: Option<DebugSettings>,
}

/// Validated debug route.
#[derive(Debug, Clone)]
pub struct DebugSettings {
    pub address: String,
    pub log_file: PathBuf,
    pub routes: RouteTable,
}

impl Config {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Mail2RmqError::FileNotFound(path.to_path_buf())
            } else {
                Mail2RmqError::io(path, e)
            }
        })?;
        let cfg = toml::from_str::<Config>(&contents).map_err(|source| {
            Mail2RmqError::ConfigParse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(cfg)
    }

    /// Validate the configuration and prepare every directory it names.
    ///
    /// Archive, temp and log directories are created when missing and must be
    /// writable. Nothing is dispatched if this fails.
    pub fn validate(self) -> Result<Settings> {
        if self.broker.exchange_name.trim().is_empty() {
            return Err(Mail2RmqError::Config(
                "broker.exchange_name must not be empty".into(),
            ));
        }
        check_route_table("routes", &self.routes)?;

        let subject_filters = self
            .attachments
            .subject_filters
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| Mail2RmqError::InvalidFilter {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let attach_types = self
            .attachments
            .types
            .iter()
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        ensure_writable_dir(&self.paths.archive_dir)?;
        ensure_writable_dir(&self.paths.tmp_dir)?;
        ensure_writable_dir(&parent_dir(&self.logging.file))?;

        let debug = match self.debug {
            Some(dbg) => {
                if dbg.address.trim().is_empty() {
                    return Err(Mail2RmqError::Config(
                        "debug.address must not be empty".into(),
                    ));
                }
                check_route_table("debug.routes", &dbg.routes)?;
                ensure_writable_dir(&parent_dir(&dbg.log_file))?;
                Some(DebugSettings {
                    address: dbg.address.trim().to_string(),
                    log_file: dbg.log_file,
                    routes: dbg.routes,
                })
            }
            None => None,
        };

        Ok(Settings {
            broker: self.broker,
            routes: self.routes,
            attach_types,
            subject_filters,
            tmp_dir: self.paths.tmp_dir,
            archive_dir: self.paths.archive_dir,
            log_file: self.logging.file,
            log_level: self.logging.level,
            debug,
        })
    }
}

/// Determine the config file path: explicit path, then env var, then the
/// standard config directory.
pub fn config_file_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mail2rmq").join("config.toml"))
}

/// Base directory for the default tmp, archive and log locations.
fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mail2rmq")
}

fn parent_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn check_route_table(section: &str, table: &RouteTable) -> Result<()> {
    for (key, value) in [
        ("error_queue", &table.error_queue),
        ("address_error_queue", &table.address_error_queue),
        ("file_error_queue", &table.file_error_queue),
    ] {
        if value.trim().is_empty() {
            return Err(Mail2RmqError::Config(format!(
                "{section}.{key} must not be empty"
            )));
        }
    }
    if let Some((addr, _)) = table.address_queues.iter().find(|(_, q)| q.trim().is_empty()) {
        return Err(Mail2RmqError::Config(format!(
            "{section}.address_queues maps '{addr}' to an empty queue name"
        )));
    }
    Ok(())
}

/// Create `dir` if needed and verify a file can be written inside it.
fn ensure_writable_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| Mail2RmqError::InvalidDirectory {
        path: dir.to_path_buf(),
        reason: format!("cannot create: {e}"),
    })?;

    let meta = std::fs::metadata(dir).map_err(|e| Mail2RmqError::InvalidDirectory {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !meta.is_dir() {
        return Err(Mail2RmqError::InvalidDirectory {
            path: dir.to_path_buf(),
            reason: "not a directory".into(),
        });
    }

    let probe = dir.join(format!(".mail2rmq-probe.{}", std::process::id()));
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
        .map_err(|e| Mail2RmqError::InvalidDirectory {
            path: dir.to_path_buf(),
            reason: format!("not writable: {e}"),
        })?;
    if let Err(e) = std::fs::remove_file(&probe) {
        tracing::warn!(path = %probe.display(), error = %e, "Failed to remove write probe");
    }
    Ok(())
}
