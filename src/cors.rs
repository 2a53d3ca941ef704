//! CORS configuration and layer construction.
//!
//! The original handlers each carried their own CORS header boilerplate; here
//! a single [`CorsConfig`] builds one tower-http layer applied to the whole
//! router.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};

use crate::utils::get_env_with_prefix;

/// CORS configuration for Lockgate applications.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    /// Whether CORS is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Allowed origins. Use `["*"]` to allow all origins (not recommended
    /// for production).
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Allowed HTTP methods.
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    /// Allowed request headers. Use `["*"]` to allow all headers.
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    /// Whether to allow credentials (cookies, authorization headers).
    #[serde(default)]
    pub allow_credentials: bool,

    /// Maximum age for preflight caching, in seconds.
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,
}

fn default_enabled() -> bool {
    false
}

fn default_allowed_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
}

fn default_allowed_headers() -> Vec<String> {
    vec![
        "authorization".to_string(),
        "content-type".to_string(),
        "x-request-id".to_string(),
    ]
}

fn default_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            // Empty origins by default: CORS stays off until explicitly
            // configured.
            allowed_origins: Vec::new(),
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
            allow_credentials: false,
            max_age_seconds: default_max_age(),
        }
    }
}

impl CorsConfig {
    /// Permissive configuration for development. Not for production.
    pub fn permissive() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "PATCH".to_string(),
                "DELETE".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec!["*".to_string()],
            allow_credentials: false,
            max_age_seconds: 3600,
        }
    }

    /// Restrictive configuration with an explicit origin list.
    pub fn restrictive(allowed_origins: Vec<String>) -> Self {
        Self {
            enabled: true,
            allowed_origins,
            allowed_methods: default_allowed_methods(),
            allowed_headers: vec!["authorization".to_string(), "content-type".to_string()],
            allow_credentials: true,
            max_age_seconds: 3600,
        }
    }

    /// Load CORS configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(enabled) = get_env_with_prefix("CORS_ENABLED") {
            config.enabled = enabled.parse().unwrap_or(false);
        }
        if let Some(origins) = get_env_with_prefix("CORS_ALLOWED_ORIGINS") {
            config.allowed_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(methods) = get_env_with_prefix("CORS_ALLOWED_METHODS") {
            config.allowed_methods = methods.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(headers) = get_env_with_prefix("CORS_ALLOWED_HEADERS") {
            config.allowed_headers = headers.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(credentials) = get_env_with_prefix("CORS_ALLOW_CREDENTIALS") {
            config.allow_credentials = credentials.parse().unwrap_or(false);
        }
        if let Some(max_age) = get_env_with_prefix("CORS_MAX_AGE") {
            if let Ok(val) = max_age.parse() {
                config.max_age_seconds = val;
            }
        }

        config
    }
}

/// Build a tower-http [`CorsLayer`] from a [`CorsConfig`].
///
/// Returns `None` when CORS is disabled so the caller can skip the layer
/// entirely.
pub fn build_cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    if !config.enabled {
        return None;
    }

    let mut layer = CorsLayer::new();

    if config.allowed_origins.len() == 1 && config.allowed_origins[0] == "*" {
        layer = layer.allow_origin(Any);
    } else if !config.allowed_origins.is_empty() {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer = layer.allow_origin(origins);
    }

    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    if !methods.is_empty() {
        layer = layer.allow_methods(methods);
    }

    if config.allowed_headers.len() == 1 && config.allowed_headers[0] == "*" {
        layer = layer.allow_headers(Any);
    } else {
        let headers: Vec<_> = config
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        if !headers.is_empty() {
            layer = layer.allow_headers(headers);
        }
    }

    if config.allow_credentials {
        layer = layer.allow_credentials(true);
    }

    layer = layer.max_age(Duration::from_secs(config.max_age_seconds));

    Some(layer)
}
