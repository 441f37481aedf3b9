use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;
use crate::types::Language;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file. Defaults to `~/.cardscan/data/cardscan.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Directory for uploaded scan images. Defaults to `~/.cardscan/images`.
    #[serde(default)]
    pub image_directory: Option<String>,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub resolver: ResolverSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub gemini: Option<GeminiConfig>,
    #[serde(default)]
    pub translation: Option<TranslationConfig>,
    #[serde(default)]
    pub catalog: Option<CatalogConfig>,
    #[serde(default)]
    pub visual: VisualConfig,
}

impl Config {
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }

    pub fn image_directory(&self) -> Option<PathBuf> {
        match &self.image_directory {
            Some(path) => Some(PathBuf::from(path)),
            None => dirs::home_dir().map(|h| h.join(".cardscan").join("images")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_item_timeout_secs")]
    pub item_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Items stuck in processing longer than this are failed as timed out.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_item_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

fn default_retention_hours() -> u64 {
    24
}

fn default_stale_after_secs() -> u64 {
    300
}

fn default_lease_ttl_secs() -> u64 {
    600
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            item_timeout_secs: default_item_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            retention_hours: default_retention_hours(),
            stale_after_secs: default_stale_after_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Prior extraction confidence on a 0-1000 scale above which the
    /// chain is skipped.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: u32,
    #[serde(default = "default_target_language")]
    pub target_language: Language,
    /// Minimum confidence for a primary candidate to be accepted.
    #[serde(default = "default_min_acceptance")]
    pub min_acceptance: f64,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
}

fn default_confidence_threshold() -> u32 {
    800
}

fn default_target_language() -> Language {
    Language::Ja
}

fn default_min_acceptance() -> f64 {
    0.6
}

fn default_true() -> bool {
    true
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            target_language: default_target_language(),
            min_acceptance: default_min_acceptance(),
            fallback_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_primary_ttl_days")]
    pub primary_ttl_days: u32,
}

fn default_primary_ttl_days() -> u32 {
    crate::cache::DEFAULT_PRIMARY_TTL_DAYS as u32
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            primary_ttl_days: default_primary_ttl_days(),
        }
    }
}

impl CacheConfig {
    pub fn primary_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.primary_ttl_days as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    pub api_key: SecretSource,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Endpoint receiving `POST {text, source, target}`.
    pub endpoint: String,
    /// OAuth token endpoint for the client-credentials exchange.
    pub token_url: String,
    pub client_id: SecretSource,
    pub client_secret: SecretSource,
    #[serde(default)]
    pub scope: Option<String>,
    /// Characters per calendar month. Zero disables the limit.
    #[serde(default = "default_monthly_char_quota")]
    pub monthly_char_quota: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_monthly_char_quota() -> u64 {
    500_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<SecretSource>,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Longest edge after downscaling, in pixels.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// Best-guess confidence below which visual comparison is attempted.
    #[serde(default = "default_weak_confidence")]
    pub weak_confidence: f64,
}

fn default_max_candidates() -> usize {
    4
}

fn default_max_image_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_download_timeout_secs() -> u64 {
    10
}

fn default_max_dimension() -> u32 {
    512
}

fn default_weak_confidence() -> f64 {
    0.8
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_candidates: default_max_candidates(),
            max_image_bytes: default_max_image_bytes(),
            download_timeout_secs: default_download_timeout_secs(),
            max_dimension: default_max_dimension(),
            weak_confidence: default_weak_confidence(),
        }
    }
}
