use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::StoreConfig;
use crate::error::{AppError, Result};
use crate::feed::{FeedFilters, FeedFormat};
use crate::pipeline::{FeedQuery, DEFAULT_BATCH_SIZE, DEFAULT_MAX_PAGES};
use crate::render::{PageLayout, RenderConfig, DEFAULT_ENGINE_TIMEOUT, DEFAULT_IMAGE_TIMEOUT};

const APP_DIR: &str = "feed-archiver";

/// Overrides `feed_base_url` when set.
pub const FEED_URL_ENV: &str = "FEED_ARCHIVER_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_feed_base_url")]
    pub feed_base_url: String,

    #[serde(default = "default_feed_id")]
    pub feed_id: String,

    #[serde(default)]
    pub feed_format: FeedFormat,

    pub title_include: Option<String>,
    pub title_exclude: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,

    #[serde(default = "default_process_limit")]
    pub process_limit: usize,

    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,

    #[serde(default)]
    pub render: RenderSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Path to `wkhtmltopdf`; looked up on PATH when unset.
    pub engine_path: Option<String>,

    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,

    #[serde(default = "default_engine_timeout_secs")]
    pub engine_timeout_secs: u64,

    #[serde(default)]
    pub layout: PageLayout,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_feed_base_url() -> String {
    "http://localhost:9021".to_string()
}

fn default_feed_id() -> String {
    "all".to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

fn default_db_path() -> String {
    data_dir().join("articles.db").to_string_lossy().to_string()
}

fn default_archive_dir() -> String {
    data_dir().join("archive").to_string_lossy().to_string()
}

fn default_process_limit() -> usize {
    10
}

fn default_busy_timeout_secs() -> u64 {
    20
}

fn default_image_timeout_secs() -> u64 {
    DEFAULT_IMAGE_TIMEOUT.as_secs()
}

fn default_engine_timeout_secs() -> u64 {
    DEFAULT_ENGINE_TIMEOUT.as_secs()
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            engine_path: None,
            image_timeout_secs: default_image_timeout_secs(),
            engine_timeout_secs: default_engine_timeout_secs(),
            layout: PageLayout::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_base_url: default_feed_base_url(),
            feed_id: default_feed_id(),
            feed_format: FeedFormat::default(),
            title_include: None,
            title_exclude: None,
            batch_size: default_batch_size(),
            max_pages: default_max_pages(),
            db_path: default_db_path(),
            archive_dir: default_archive_dir(),
            process_limit: default_process_limit(),
            busy_timeout_secs: default_busy_timeout_secs(),
            render: RenderSettings::default(),
        }
    }
}

impl Config {
    /// Reads the config file, writing one with defaults on first run.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        if let Ok(url) = std::env::var(FEED_URL_ENV) {
            if !url.trim().is_empty() {
                config.feed_base_url = url.trim().to_string();
            }
        }
        Ok(config)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    fn validate(&self) -> Result<()> {
        if self.feed_base_url.trim().is_empty() {
            return Err(AppError::Config("feed_base_url must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(AppError::Config("batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            busy_timeout: Duration::from_secs(self.busy_timeout_secs),
            ..StoreConfig::new(&self.db_path)
        }
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            image_timeout: Duration::from_secs(self.render.image_timeout_secs),
            layout: self.render.layout.clone(),
            ..RenderConfig::new(&self.archive_dir)
        }
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.render.engine_timeout_secs)
    }

    pub fn feed_query(&self) -> FeedQuery {
        FeedQuery {
            feed_id: self.feed_id.clone(),
            filters: FeedFilters {
                title_include: self.title_include.clone(),
                title_exclude: self.title_exclude.clone(),
                update: false,
            },
            batch_size: self.batch_size,
            max_pages: self.max_pages,
        }
    }
}
