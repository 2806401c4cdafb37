use std::{
    fs::{self},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use clap::{Parser, Subcommand};
use fingerprint::Configuration;
use serde::{Deserialize, Serialize};

use crate::recognition::DEFAULT_MIN_OFFSET_VOTES;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLogLevel {
    Trace,
    Warn,
    Debug,
    Error,
    #[default]
    Info,
}

impl FromStr for ConfigLogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "warn" => Ok(Self::Warn),
            "debug" => Ok(Self::Debug),
            "error" => Ok(Self::Error),
            "info" => Ok(Self::Info),
            _ => Err(anyhow::anyhow!("{} does not match any log level", s)),
        }
    }
}

impl From<tracing::Level> for ConfigLogLevel {
    fn from(value: tracing::Level) -> Self {
        match value {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::ERROR => Self::Error,
            _ => Self::Info,
        }
    }
}

impl From<ConfigLogLevel> for tracing::Level {
    fn from(value: ConfigLogLevel) -> Self {
        match value {
            ConfigLogLevel::Trace => tracing::Level::TRACE,
            ConfigLogLevel::Warn => tracing::Level::WARN,
            ConfigLogLevel::Debug => tracing::Level::DEBUG,
            ConfigLogLevel::Error => tracing::Level::ERROR,
            ConfigLogLevel::Info => tracing::Level::INFO,
        }
    }
}

/// `[fingerprint]` table of the configuration file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FingerprintSettings {
    pub sample_rate: u32,
    pub window_size: usize,
    pub hop_length: usize,
    pub fan_value: usize,
    pub max_delta: u32,
    pub neighborhood: usize,
    pub amplitude_floor: f32,
    pub query_amplitude_floor: f32,
}

impl Default for FingerprintSettings {
    fn default() -> Self {
        Configuration::default().into()
    }
}

impl From<Configuration> for FingerprintSettings {
    fn from(c: Configuration) -> Self {
        Self {
            sample_rate: c.sample_rate,
            window_size: c.window_size,
            hop_length: c.hop_length,
            fan_value: c.fan_value,
            max_delta: c.max_delta,
            neighborhood: c.neighborhood,
            amplitude_floor: c.amplitude_floor,
            query_amplitude_floor: c.query_amplitude_floor,
        }
    }
}

impl From<FingerprintSettings> for Configuration {
    fn from(s: FingerprintSettings) -> Self {
        Self {
            sample_rate: s.sample_rate,
            window_size: s.window_size,
            hop_length: s.hop_length,
            fan_value: s.fan_value,
            max_delta: s.max_delta,
            neighborhood: s.neighborhood,
            amplitude_floor: s.amplitude_floor,
            query_amplitude_floor: s.query_amplitude_floor,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ServerConfiguration {
    pub port: u16,
    pub log_level: ConfigLogLevel,
    pub log_path: PathBuf,
    pub database_path: PathBuf,
    /// Decoded clips are trimmed to this many seconds
    pub max_clip_seconds: u32,
    /// Votes the best offset needs to be reported as a match
    pub min_offset_votes: u32,
    pub fingerprint: FingerprintSettings,
    #[serde(skip_serializing)]
    pub config_file: ConfigFile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct TomlConfig {
    port: u16,
    log_level: ConfigLogLevel,
    log_path: PathBuf,
    database_path: PathBuf,
    max_clip_seconds: u32,
    min_offset_votes: u32,
    fingerprint: FingerprintSettings,
}

impl Default for TomlConfig {
    fn default() -> Self {
        let resources = AppResources::default();
        Self {
            port: 8000,
            log_level: ConfigLogLevel::Info,
            log_path: resources.log_path,
            database_path: resources.database_path,
            max_clip_seconds: 60,
            min_offset_votes: DEFAULT_MIN_OFFSET_VOTES,
            fingerprint: FingerprintSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigFile(pub PathBuf);

impl ConfigFile {
    pub fn open(config_path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = config_path.as_ref().to_path_buf();
        match fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config_path)
            .map_err(|e| e.kind())
        {
            Err(ErrorKind::NotFound) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let default_config = TomlConfig::default();
                let mut file = fs::File::create_new(&config_path)?;
                file.write_all(toml::to_string_pretty(&default_config)?.as_bytes())?;
                tracing::info!(
                    "Created configuration file with defaults: {}",
                    config_path.as_ref().display()
                );
                Ok(ConfigFile(path))
            }
            Err(e) => Err(anyhow::anyhow!(
                "Unknown fs error occured while opening config: {e}"
            )),
            Ok(_) => Ok(ConfigFile(path)),
        }
    }

    /// Reads contents of config and repairs it in case of parse error
    fn read(&self) -> Result<TomlConfig, anyhow::Error> {
        let buf = fs::read_to_string(&self.0)?;
        match toml::from_str(&buf) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to read config: {}", e);
                let repaired_config = repair_config(&buf).unwrap_or_else(|e| {
                    tracing::error!("Failed to repair config ({e}), using defaults");
                    TomlConfig::default()
                });
                self.flush(&repaired_config)?;
                tracing::info!("Rewrote configuration file {}", self.0.display());
                Ok(repaired_config)
            }
        }
    }

    fn flush(&self, config: &TomlConfig) -> Result<(), anyhow::Error> {
        let config_text = toml::to_string_pretty(config)?;
        fs::write(&self.0, config_text)?;
        Ok(())
    }
}

fn table_value<T>(table: Option<&toml::Table>, key: &str, default: T) -> T
where
    T: for<'de> Deserialize<'de>,
{
    table
        .and_then(|t| t.get(key))
        .and_then(|v| v.clone().try_into().ok())
        .unwrap_or(default)
}

/// Keeps every valid key of a broken config and falls back to defaults for the rest
fn repair_config(raw: &str) -> Result<TomlConfig, anyhow::Error> {
    tracing::trace!("Trying to repair config");
    let default = TomlConfig::default();
    let parsed: toml::Table = toml::from_str(raw)?;
    let root = Some(&parsed);
    let log_level = parsed
        .get("log_level")
        .and_then(|v| v.as_str())
        .and_then(|s| ConfigLogLevel::from_str(s).ok())
        .unwrap_or(default.log_level);
    let fingerprint_table = parsed.get("fingerprint").and_then(|v| v.as_table());
    let fp = default.fingerprint;
    let fingerprint = FingerprintSettings {
        sample_rate: table_value(fingerprint_table, "sample_rate", fp.sample_rate),
        window_size: table_value(fingerprint_table, "window_size", fp.window_size),
        hop_length: table_value(fingerprint_table, "hop_length", fp.hop_length),
        fan_value: table_value(fingerprint_table, "fan_value", fp.fan_value),
        max_delta: table_value(fingerprint_table, "max_delta", fp.max_delta),
        neighborhood: table_value(fingerprint_table, "neighborhood", fp.neighborhood),
        amplitude_floor: table_value(fingerprint_table, "amplitude_floor", fp.amplitude_floor),
        query_amplitude_floor: table_value(
            fingerprint_table,
            "query_amplitude_floor",
            fp.query_amplitude_floor,
        ),
    };

    let repaired_config = TomlConfig {
        port: table_value(root, "port", default.port),
        log_level,
        log_path: table_value(root, "log_path", default.log_path),
        database_path: table_value(root, "database_path", default.database_path),
        max_clip_seconds: table_value(root, "max_clip_seconds", default.max_clip_seconds),
        min_offset_votes: table_value(root, "min_offset_votes", default.min_offset_votes),
        fingerprint,
    };
    Ok(repaired_config)
}

impl ServerConfiguration {
    /// Tries to load config or creates default config file
    /// Errors when cant create or read file
    pub fn from_file(config_path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let config_file = ConfigFile::open(&config_path)?;
        let file_config = config_file.read()?;
        Ok(Self::from_toml(file_config, config_file))
    }

    fn from_toml(file_config: TomlConfig, config_file: ConfigFile) -> Self {
        ServerConfiguration {
            port: file_config.port,
            log_level: file_config.log_level,
            log_path: file_config.log_path,
            database_path: file_config.database_path,
            max_clip_seconds: file_config.max_clip_seconds,
            min_offset_votes: file_config.min_offset_votes,
            fingerprint: file_config.fingerprint,
            config_file,
        }
    }

    /// Defaults that are never flushed anywhere
    #[cfg(test)]
    pub fn test_default() -> Self {
        let config_file = ConfigFile(std::env::temp_dir().join("audioprint-test").join("unused.toml"));
        Self::from_toml(TomlConfig::default(), config_file)
    }

    /// Arguments override the file values for this run only
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(level) = args.log_level {
            self.log_level = level.into();
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = log_path.clone();
        }
        if let Some(database_path) = &args.database_path {
            self.database_path = database_path.clone();
        }
    }

    pub fn fingerprint_config(&self) -> Configuration {
        self.fingerprint.into()
    }
}

#[derive(Debug, Parser)]
#[command(version, about = "Content based audio identification")]
pub struct Args {
    /// Override port
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<tracing::Level>,
    /// Override log location
    #[arg(long)]
    pub log_path: Option<PathBuf>,
    /// Provide custom config location
    #[arg(short, long)]
    pub config_path: Option<PathBuf>,
    /// Override database location
    #[arg(long)]
    pub database_path: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the http server (default)
    Serve {
        /// Keep fingerprints in memory instead of the database
        #[arg(long)]
        in_memory: bool,
    },
    /// Fingerprint an audio file and add it to the library
    Register {
        path: PathBuf,
        /// Track name, defaults to the file name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Identify an audio clip
    Identify { path: PathBuf },
    /// List registered tracks
    Tracks,
    /// Remove a track together with its fingerprints
    Remove { id: i64 },
}

impl Default for Command {
    fn default() -> Self {
        Self::Serve { in_memory: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppResources {
    pub database_path: PathBuf,
    pub config_path: PathBuf,
    pub log_path: PathBuf,
}

impl AppResources {
    const APP_NAME: &'static str = "audioprint";

    fn prod_storage() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(Self::APP_NAME)
    }

    fn debug_storage() -> PathBuf {
        PathBuf::from(".")
    }

    fn data_storage() -> PathBuf {
        let is_prod = !cfg!(debug_assertions);
        if is_prod {
            Self::prod_storage()
        } else {
            Self::debug_storage()
        }
    }

    pub fn default_config_path() -> PathBuf {
        Self::data_storage().join("configuration.toml")
    }

    /// Creates missing folders and the database file
    pub fn initiate(database_path: &Path, log_path: &Path) -> Result<(), anyhow::Error> {
        for path in [database_path, log_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(database_path)?;
        Ok(())
    }
}

impl Default for AppResources {
    fn default() -> Self {
        let store_path = Self::data_storage();
        Self {
            config_path: Self::default_config_path(),
            database_path: store_path.join("db").join("database.sqlite"),
            log_path: store_path.join("log.log"),
        }
    }
}
