use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::cors::CorsConfig;
use crate::error::Result;
use crate::utils::get_env_with_prefix;

/// Default time-to-live for runtime settings snapshots (5 minutes).
const DEFAULT_SETTINGS_TTL: Duration = Duration::from_secs(300);

/// Main configuration for a Lockgate application.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum request body size in bytes (default: 1MB; webhook payloads
    /// and JSON bodies are small).
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_json")]
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_json(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json() -> bool {
    false
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

impl ServerConfig {
    pub fn addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Builder for Config with environment variable support.
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.config.server.max_body_size = max_body_size;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.config.cors = cors;
        self
    }

    /// Load settings from environment variables.
    ///
    /// Checks `LOCKGATE_` prefixed variables first, then unprefixed names.
    pub fn from_env(mut self) -> Self {
        if let Some(host) = get_env_with_prefix("HOST") {
            self.config.server.host = host;
        }
        if let Some(port) = get_env_with_prefix("PORT") {
            if let Ok(port) = port.parse() {
                self.config.server.port = port;
            }
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }
        self.config.cors = CorsConfig::from_env();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Business settings consumed by request handlers.
///
/// These mirror a settings table owned by the platform and change without a
/// deploy, which is why they live behind [`RuntimeSettings`] instead of
/// [`Config`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    /// Where Stripe Checkout redirects after a completed purchase.
    pub checkout_success_url: String,
    /// Where Stripe Checkout redirects after an abandoned purchase.
    pub checkout_cancel_url: String,
    /// Where the customer portal returns to.
    pub portal_return_url: String,
    /// Stripe price used when a checkout request names none.
    pub default_price_id: Option<String>,
    /// Length of the free trial in days.
    pub trial_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            checkout_success_url: "https://app.example.com/billing/success".to_string(),
            checkout_cancel_url: "https://app.example.com/billing/cancel".to_string(),
            portal_return_url: "https://app.example.com/account".to_string(),
            default_price_id: None,
            trial_days: 7,
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(url) = get_env_with_prefix("CHECKOUT_SUCCESS_URL") {
            settings.checkout_success_url = url;
        }
        if let Some(url) = get_env_with_prefix("CHECKOUT_CANCEL_URL") {
            settings.checkout_cancel_url = url;
        }
        if let Some(url) = get_env_with_prefix("PORTAL_RETURN_URL") {
            settings.portal_return_url = url;
        }
        if let Some(price) = get_env_with_prefix("DEFAULT_PRICE_ID") {
            settings.default_price_id = Some(price);
        }
        if let Some(days) = get_env_with_prefix("TRIAL_DAYS") {
            if let Ok(days) = days.parse() {
                settings.trial_days = days;
            }
        }

        settings
    }
}

/// A shared handle to [`Settings`] with a defined time-to-live.
///
/// Handlers read the cached snapshot via [`current`](Self::current); when the
/// snapshot is older than the TTL, the caller refreshes it through
/// [`current_or_refresh`](Self::current_or_refresh) with a loader of its
/// choosing. There is no background refresh and no module-level state: the
/// handle is constructed once and passed explicitly.
#[derive(Clone)]
pub struct RuntimeSettings {
    inner: Arc<RwLock<CachedSettings>>,
    ttl: Duration,
}

struct CachedSettings {
    value: Settings,
    fetched_at: Instant,
}

impl RuntimeSettings {
    /// Create a handle with the default 5-minute TTL.
    #[must_use]
    pub fn new(initial: Settings) -> Self {
        Self::with_ttl(initial, DEFAULT_SETTINGS_TTL)
    }

    /// Create a handle with a custom TTL.
    #[must_use]
    pub fn with_ttl(initial: Settings, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CachedSettings {
                value: initial,
                fetched_at: Instant::now(),
            })),
            ttl,
        }
    }

    /// Return the cached snapshot regardless of age.
    #[must_use]
    pub fn current(&self) -> Settings {
        match self.inner.read() {
            Ok(cached) => cached.value.clone(),
            // A poisoned lock still holds a valid snapshot.
            Err(poisoned) => poisoned.into_inner().value.clone(),
        }
    }

    /// Whether the cached snapshot has outlived its TTL.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        match self.inner.read() {
            Ok(cached) => cached.fetched_at.elapsed() > self.ttl,
            Err(_) => true,
        }
    }

    /// Replace the cached snapshot and reset its age.
    pub fn replace(&self, settings: Settings) {
        let entry = CachedSettings {
            value: settings,
            fetched_at: Instant::now(),
        };
        match self.inner.write() {
            Ok(mut cached) => *cached = entry,
            Err(poisoned) => *poisoned.into_inner() = entry,
        }
    }

    /// Return the cached snapshot, refreshing through `loader` if it is stale.
    ///
    /// A loader failure falls back to the stale snapshot: settings are safe
    /// to serve slightly out of date, while failing a request over a settings
    /// fetch is not.
    pub async fn current_or_refresh<F, Fut>(&self, loader: F) -> Settings
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Settings>>,
    {
        if !self.is_stale() {
            return self.current();
        }

        match loader().await {
            Ok(fresh) => {
                self.replace(fresh.clone());
                fresh
            }
            Err(err) => {
                tracing::warn!(error = %err, "Settings refresh failed, serving stale snapshot");
                self.current()
            }
        }
    }
}
