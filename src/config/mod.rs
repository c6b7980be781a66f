use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

/// HTTP client behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Where each portal lives
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default = "default_listing_base_url")]
    pub listing_base_url: String,

    #[serde(default = "default_detail_base_url")]
    pub detail_base_url: String,

    #[serde(default = "default_history_base_url")]
    pub history_base_url: String,

    #[serde(default = "default_history_referer")]
    pub history_referer: String,
}

/// Time-series chunking
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    #[serde(default = "default_chunk_days")]
    pub chunk_days: i64,

    #[serde(default = "default_max_years")]
    pub max_years: f64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    250
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}
fn default_listing_base_url() -> String {
    "https://www.kap.org.tr/tr/YatirimFonlari/".to_string()
}
fn default_detail_base_url() -> String {
    "https://www.kap.org.tr/tr/fonlarTumKalemler/".to_string()
}
fn default_history_base_url() -> String {
    "https://fonturkey.com.tr/api/DB/".to_string()
}
fn default_history_referer() -> String {
    "https://fonturkey.com.tr/TarihselVeriler.aspx".to_string()
}
fn default_chunk_days() -> i64 {
    60
}
fn default_max_years() -> f64 {
    5.0
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            listing_base_url: default_listing_base_url(),
            detail_base_url: default_detail_base_url(),
            history_base_url: default_history_base_url(),
            history_referer: default_history_referer(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            chunk_days: default_chunk_days(),
            max_years: default_max_years(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            sources: SourcesConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl HistoryConfig {
    /// `chunk_days >= 1` and a finite, non-negative `max_years`.
    pub fn is_valid(&self) -> bool {
        self.chunk_days >= 1 && self.max_years.is_finite() && self.max_years >= 0.0
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("FUND_ETL").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!("Config did not deserialize ({}), using defaults", e);
            AppConfig::default()
        });
        Ok(app_cfg.validated())
    }

    /// Replace an unusable `history` section with its defaults.
    pub fn validated(mut self) -> Self {
        if !self.history.is_valid() {
            tracing::warn!(
                "Invalid history config (chunk_days={}, max_years={}), using defaults",
                self.history.chunk_days,
                self.history.max_years
            );
            self.history = HistoryConfig::default();
        }
        self
    }
}
