use anyhow::{Context, Result, anyhow};
use chrono::NaiveTime;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

use crate::core::market_hours::MarketHours;
use crate::core::universe::SymbolUniverse;

pub const TWELVE_DATA_KEY_ENV: &str = "TWELVE_DATA_API_KEY";
pub const ALPHA_VANTAGE_KEY_ENV: &str = "ALPHA_VANTAGE_API_KEY";
pub const SHEET_URL_ENV: &str = "MARKET_CONFIG_SHEET_URL";

pub const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";
pub const TWELVE_DATA_BASE_URL: &str = "https://api.twelvedata.com";
pub const ALPHA_VANTAGE_BASE_URL: &str = "https://www.alphavantage.co";

/// Fixed retry budget shared by the HTTP adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: usize,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: default_retries(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct YahooProviderConfig {
    #[serde(default = "default_yahoo_url")]
    pub base_url: String,
}

impl Default for YahooProviderConfig {
    fn default() -> Self {
        YahooProviderConfig {
            base_url: default_yahoo_url(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TwelveDataConfig {
    #[serde(default = "default_twelve_data_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_twelve_data_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_twelve_data_per_day")]
    pub requests_per_day: u32,
}

impl Default for TwelveDataConfig {
    fn default() -> Self {
        TwelveDataConfig {
            base_url: default_twelve_data_url(),
            api_key: None,
            requests_per_minute: default_twelve_data_per_minute(),
            requests_per_day: default_twelve_data_per_day(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AlphaVantageConfig {
    #[serde(default = "default_alpha_vantage_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_alpha_vantage_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_alpha_vantage_per_day")]
    pub requests_per_day: u32,
}

impl Default for AlphaVantageConfig {
    fn default() -> Self {
        AlphaVantageConfig {
            base_url: default_alpha_vantage_url(),
            api_key: None,
            requests_per_minute: default_alpha_vantage_per_minute(),
            requests_per_day: default_alpha_vantage_per_day(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub yahoo: YahooProviderConfig,
    #[serde(default)]
    pub twelve_data: TwelveDataConfig,
    #[serde(default)]
    pub alpha_vantage: AlphaVantageConfig,
    /// Let the keyless provider serve what no keyed provider can.
    #[serde(default = "default_true")]
    pub local_fallback: bool,
    #[serde(default = "default_retries")]
    pub retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_rate_wait_secs")]
    pub max_rate_wait_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            yahoo: YahooProviderConfig::default(),
            twelve_data: TwelveDataConfig::default(),
            alpha_vantage: AlphaVantageConfig::default(),
            local_fallback: true,
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_rate_wait_secs: default_max_rate_wait_secs(),
        }
    }
}

impl ProvidersConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            delay_ms: self.retry_delay_ms,
        }
    }

    pub fn max_rate_wait(&self) -> Duration {
        Duration::from_secs(self.max_rate_wait_secs)
    }

    pub fn twelve_data_key(&self) -> Option<&str> {
        non_empty(self.twelve_data.api_key.as_deref())
    }

    pub fn alpha_vantage_key(&self) -> Option<&str> {
        non_empty(self.alpha_vantage.api_key.as_deref())
    }
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    pub quotes_ttl_secs: Option<u64>,
    pub history_ttl_secs: Option<u64>,
}

impl CacheConfig {
    pub fn quotes_ttl(&self) -> Option<Duration> {
        self.quotes_ttl_secs.map(Duration::from_secs)
    }

    pub fn history_ttl(&self) -> Option<Duration> {
        self.history_ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct UniverseSheetConfig {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MarketHoursConfig {
    #[serde(default = "default_open")]
    pub open: String,
    #[serde(default = "default_close")]
    pub close: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        MarketHoursConfig {
            open: default_open(),
            close: default_close(),
            timezone: default_timezone(),
        }
    }
}

impl MarketHoursConfig {
    pub fn to_market_hours(&self) -> Result<MarketHours> {
        let parse_time = |raw: &str| {
            NaiveTime::parse_from_str(raw, "%H:%M")
                .with_context(|| format!("Invalid market hours time: {raw}"))
        };
        let open = parse_time(&self.open)?;
        let close = parse_time(&self.close)?;
        if open >= close {
            return Err(anyhow!(
                "Market open {} must be before close {}",
                self.open,
                self.close
            ));
        }
        let timezone = self
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow!("Invalid market timezone {}: {e}", self.timezone))?;
        Ok(MarketHours {
            open,
            close,
            timezone,
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub universe_sheet: UniverseSheetConfig,
    /// Replaces the built-in default universe.
    #[serde(default)]
    pub universe: Option<SymbolUniverse>,
    #[serde(default)]
    pub market_hours: MarketHoursConfig,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            providers: ProvidersConfig::default(),
            cache: CacheConfig::default(),
            universe_sheet: UniverseSheetConfig::default(),
            universe: None,
            market_hours: MarketHoursConfig::default(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Reads the default config file. A missing file yields the defaults.
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(path = %config_path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "sporos", "market-pulse")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        // An empty file is a valid, all-defaults config.
        if config_str.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Overrides keys and the sheet URL from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = read(TWELVE_DATA_KEY_ENV) {
            debug!("Twelve Data key taken from environment");
            self.providers.twelve_data.api_key = Some(key);
        }
        if let Some(key) = read(ALPHA_VANTAGE_KEY_ENV) {
            debug!("Alpha Vantage key taken from environment");
            self.providers.alpha_vantage.api_key = Some(key);
        }
        if let Some(url) = read(SHEET_URL_ENV) {
            self.universe_sheet.url = Some(url);
        }
    }

    pub fn sheet_url(&self) -> Option<&str> {
        non_empty(self.universe_sheet.url.as_deref())
    }

    /// The configured universe, else the built-in one.
    pub fn default_universe(&self) -> SymbolUniverse {
        self.universe
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(SymbolUniverse::builtin)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn default_true() -> bool {
    true
}

fn default_yahoo_url() -> String {
    YAHOO_BASE_URL.to_string()
}

fn default_twelve_data_url() -> String {
    TWELVE_DATA_BASE_URL.to_string()
}

fn default_alpha_vantage_url() -> String {
    ALPHA_VANTAGE_BASE_URL.to_string()
}

fn default_twelve_data_per_minute() -> u32 {
    8
}

fn default_twelve_data_per_day() -> u32 {
    800
}

fn default_alpha_vantage_per_minute() -> u32 {
    5
}

fn default_alpha_vantage_per_day() -> u32 {
    25
}

fn default_retries() -> usize {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_max_rate_wait_secs() -> u64 {
    65
}

fn default_open() -> String {
    "09:30".to_string()
}

fn default_close() -> String {
    "16:00".to_string()
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    60
}
