//! Lockgate - account lifecycle backend for SaaS products
//!
//! Lockgate glues together the account lifecycle around a single access
//! decision evaluator: free-trial provisioning, Stripe subscription
//! management (checkout, cancel, reactivate, customer portal, webhooks), and
//! synchronization of a third-party tool workspace account with the user's
//! entitlement state.
//!
//! # Architecture
//!
//! - **Access**: [`access::evaluate`] is the one place access is decided: a
//!   pure function over a subscription snapshot, a trial snapshot, and the
//!   returning-user flag.
//! - **Billing**: Stripe state is mirrored locally via webhooks; managers
//!   are generic over a storage trait and client traits with mocks for tests
//!   and [`billing::LiveStripeClient`] for production.
//! - **Trials**: application-owned records with one-directional transitions
//!   and a deleted-email registry enforcing one trial per email.
//! - **Provisioning**: the tool vendor's account is created and toggled to
//!   match the verdict, never ahead of it.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lockgate::{self, AppState, ConfigBuilder, RuntimeSettings, Settings};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     lockgate::init_tracing();
//!
//!     let config = ConfigBuilder::new().from_env().build();
//!     let state = AppState {
//!         auth: my_auth_provider(),
//!         billing: my_billing_store(),
//!         trials: my_trial_store(),
//!         stripe: my_stripe_client(),
//!         tool: my_tool_client(),
//!         settings: RuntimeSettings::new(Settings::from_env()),
//!         webhook_secret: webhook_secret(),
//!     };
//!
//!     let router = lockgate::router(state, &config);
//!     lockgate::serve(&config, router).await
//! }
//! ```

pub mod access;
pub mod account;
pub mod auth;
pub mod billing;
mod config;
pub mod cors;
mod error;
pub mod health;
mod http;
mod middleware;
pub mod provisioner;
pub mod trial;
mod utils;

pub use access::{
    AccessType, AccessVerdict, ProtectionLevel, SubscriptionSnapshot, SubscriptionStanding,
    TrialSnapshot, TrialStatus, evaluate,
};
pub use account::{AccountIdentity, AccountRef};
pub use auth::{AuthProvider, AuthUser, OptionalAuth, TokenExtractor};
pub use config::{
    Config, ConfigBuilder, LoggingConfig, RuntimeSettings, ServerConfig, Settings,
};
pub use cors::CorsConfig;
pub use error::{ErrorResponse, LockgateError, Result};
pub use health::{HealthResponse, HealthStatus};
pub use http::{ApiResponse, AppState, JsonResponse, NoContentResponse, router, serve};
pub use provisioner::{
    LiveToolClient, LiveToolClientConfig, ToolAccount, ToolAccountClient, ToolAccountManager,
    ToolSyncOutcome,
};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults.
///
/// Call early in `main()`, before building the app.
///
/// # Environment Variables
///
/// - `RUST_LOG`: log level filter (e.g. "info", "lockgate=debug")
/// - `LOCKGATE_LOG_JSON`: set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("LOCKGATE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing from a [`Config`].
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::new(&config.logging.level);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
