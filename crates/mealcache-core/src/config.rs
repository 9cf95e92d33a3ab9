//! Cache layer configuration.
//!
//! Configuration is stored at `~/.config/mealcache/config.json`. Every field
//! is optional in the file; missing fields take the defaults below. The
//! origin and version tag can be overridden from the environment with
//! `MEALCACHE_ORIGIN` and `MEALCACHE_VERSION`.
//!
//! # Example
//!
//! ```
//! use mealcache_core::CacheConfig;
//!
//! let config: CacheConfig = serde_json::from_str(r#"{"version": "v7"}"#).unwrap();
//! assert_eq!(config.version.as_str(), "v7");
//! assert_eq!(config.api_timeout_ms, 5000);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;
use crate::tier::{Tier, VersionTag};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "mealcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// File holding undelivered sync tags, relative to the cache directory
const SYNC_QUEUE_FILE: &str = "sync-queue.json";

/// Environment variable overriding the origin
pub const ORIGIN_ENV: &str = "MEALCACHE_ORIGIN";

/// Environment variable overriding the version tag
pub const VERSION_ENV: &str = "MEALCACHE_VERSION";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Origin the static manifest is resolved against (e.g. "https://meals.example")
    #[serde(default)]
    pub origin: Option<String>,

    /// First component of every namespace name
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    /// Version tag of this build
    #[serde(default = "default_version")]
    pub version: VersionTag,

    #[serde(default = "Tier::defaults")]
    pub tiers: Vec<Tier>,

    /// Paths cached at install. Entries ending in `/` also match by prefix.
    #[serde(default = "default_static_manifest")]
    pub static_manifest: Vec<String>,

    /// Regexes matched against the full URL to detect backend API calls
    #[serde(default = "default_api_patterns")]
    pub api_patterns: Vec<String>,

    /// Regexes selecting API responses that are mirrored into the recipes tier
    #[serde(default = "default_recipe_mirror_patterns")]
    pub recipe_mirror_patterns: Vec<String>,

    /// Lowercase filename suffixes treated as images
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Regexes matched against the host to detect media CDNs
    #[serde(default = "default_image_host_patterns")]
    pub image_host_patterns: Vec<String>,

    /// Network timeout for API requests
    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,

    /// Transport-level timeout applied to every request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub sync: SyncConfig,
}

/// Redelivery policy for deferred sync tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_sync_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_sync_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_sync_max_attempts(),
            initial_backoff_ms: default_sync_initial_backoff_ms(),
            max_backoff_ms: default_sync_max_backoff_ms(),
        }
    }
}

impl SyncConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            factor: 2.0,
            max_retries: Some(self.max_attempts),
        }
    }
}

fn default_namespace_prefix() -> String {
    APP_NAME.to_string()
}

fn default_version() -> VersionTag {
    VersionTag::default()
}

fn default_static_manifest() -> Vec<String> {
    ["/", "/index.html", "/offline.html", "/manifest.json", "/css/app.css", "/js/app.js"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_api_patterns() -> Vec<String> {
    vec![r"^https?://[^/]+/api/".to_string(), r"^https?://api\.".to_string()]
}

fn default_recipe_mirror_patterns() -> Vec<String> {
    vec![r"/api/recipes(/|\?|$)".to_string()]
}

fn default_image_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "webp", "svg", "avif", "ico"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_image_host_patterns() -> Vec<String> {
    vec![
        r"(^|\.)images\.unsplash\.com$".to_string(),
        r"(^|\.)res\.cloudinary\.com$".to_string(),
        r"^img\.".to_string(),
    ]
}

fn default_api_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_sync_max_attempts() -> usize {
    5
}

fn default_sync_initial_backoff_ms() -> u64 {
    1000
}

fn default_sync_max_backoff_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            origin: None,
            namespace_prefix: default_namespace_prefix(),
            version: default_version(),
            tiers: Tier::defaults(),
            static_manifest: default_static_manifest(),
            api_patterns: default_api_patterns(),
            recipe_mirror_patterns: default_recipe_mirror_patterns(),
            image_extensions: default_image_extensions(),
            image_host_patterns: default_image_host_patterns(),
            api_timeout_ms: default_api_timeout_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            sync: SyncConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load from the default config path, falling back to defaults, then
    /// apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(origin) = std::env::var(ORIGIN_ENV) {
            self.origin = Some(origin);
        }
        if let Ok(version) = std::env::var(VERSION_ENV) {
            self.version = VersionTag::new(version)
                .with_context(|| format!("Invalid {}", VERSION_ENV))?;
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn sync_queue_path(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join(SYNC_QUEUE_FILE))
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
