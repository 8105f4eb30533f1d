use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::models::Source;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub locale: LocaleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// First port tried; the server walks forward until a bind succeeds.
    #[serde(default = "default_port_start")]
    pub port_start: u16,
    #[serde(default = "default_port_end")]
    pub port_end: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocaleConfig {
    /// Preferred locale for multilingual upstream fields.
    #[serde(default = "default_primary_locale")]
    pub primary: String,
    /// Fallback tried before giving up and taking any available locale.
    #[serde(default = "default_fallback_locale")]
    pub fallback: String,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Backoff base; delay before retry k is base * 2^(k-1), no jitter.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Per-attempt timeout, not per logical operation.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Fixed delay between batches to respect upstream request budgets.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_delay_ms: u64,
    /// Interval of the background incremental pass; 0 disables the scheduler.
    #[serde(default = "default_schedule_interval")]
    pub schedule_interval_secs: u64,
    #[serde(default = "default_catalogs")]
    pub catalogs: Vec<Source>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ReaderConfig {
    #[serde(default = "default_handle_ttl")]
    pub handle_ttl_secs: u64,
}

fn default_database_path() -> String { "tankobon.db".to_string() }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port_start() -> u16 { 8080 }
fn default_port_end() -> u16 { 8090 }
fn default_primary_locale() -> String { "en".to_string() }
fn default_fallback_locale() -> String { "ja-ro".to_string() }
fn default_max_attempts() -> usize { 3 }
fn default_base_delay() -> u64 { 100 }
fn default_timeout() -> u64 { 30 }
fn default_batch_size() -> u64 { 100 }
fn default_rate_limit() -> u64 { 300 }
fn default_schedule_interval() -> u64 { 3600 }
fn default_catalogs() -> Vec<Source> { vec![Source::MangaDex] }
fn default_handle_ttl() -> u64 { 300 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port_start: default_port_start(),
            port_end: default_port_end(),
        }
    }
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_locale(),
            fallback: default_fallback_locale(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            rate_limit_delay_ms: default_rate_limit(),
            schedule_interval_secs: default_schedule_interval(),
            catalogs: default_catalogs(),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self { handle_ttl_secs: default_handle_ttl() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            server: ServerConfig::default(),
            locale: LocaleConfig::default(),
            retry: RetryConfig::default(),
            sync: SyncConfig::default(),
            reader: ReaderConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let path = Path::new("config.toml");
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                match toml::from_str::<Config>(&content) {
                    Ok(cfg) => return cfg,
                    Err(e) => log::warn!("config.toml invalid, using defaults: {}", e),
                }
            }
        }
        Self::default()
    }
}
