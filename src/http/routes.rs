//! The application router and request handlers.
//!
//! One router, one middleware stack, one [`AppState`] carrying the injected
//! collaborators (stores, clients, auth provider, settings handle). Every
//! handler that needs an access decision goes through
//! [`crate::access::evaluate`] on freshly loaded records.

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::access::{self, AccessVerdict};
use crate::account::AccountIdentity;
use crate::auth::{AuthProvider, AuthUser};
use crate::billing::error::BillingError;
use crate::billing::{
    BillingStore, CheckoutConfig, CheckoutManager, FullStripeClient, PortalConfig, PortalManager,
    SubscriptionManager, WebhookHandler, WebhookOutcome,
};
use crate::config::{Config, RuntimeSettings};
use crate::error::Result;
use crate::http::response::ApiResponse;
use crate::provisioner::{ToolAccount, ToolAccountClient, ToolAccountManager, ToolSyncOutcome};
use crate::trial::storage::TrialRecord;
use crate::trial::{TrialConfig, TrialManager, TrialStore};
use crate::utils::unix_timestamp;

/// Injected collaborators shared by all handlers.
#[derive(Clone)]
pub struct AppState<P, BS, TS, SC, TC>
where
    P: AuthProvider,
    BS: BillingStore + Clone + Send + Sync + 'static,
    TS: TrialStore + Clone + Send + Sync + 'static,
    SC: FullStripeClient + Clone + Send + Sync + 'static,
    TC: ToolAccountClient + Clone + Send + Sync + 'static,
{
    pub auth: P,
    pub billing: BS,
    pub trials: TS,
    pub stripe: SC,
    pub tool: TC,
    pub settings: RuntimeSettings,
    pub webhook_secret: SecretString,
}

/// Build the application router with the shared middleware stack applied.
pub fn router<P, BS, TS, SC, TC>(state: AppState<P, BS, TS, SC, TC>, config: &Config) -> Router
where
    P: AuthProvider,
    BS: BillingStore + Clone + Send + Sync + 'static,
    TS: TrialStore + Clone + Send + Sync + 'static,
    SC: FullStripeClient + Clone + Send + Sync + 'static,
    TC: ToolAccountClient + Clone + Send + Sync + 'static,
{
    let auth = state.auth.clone();

    let router = Router::new()
        .route("/health", get(crate::health::liveness))
        .route("/access", get(access_verdict::<P, BS, TS, SC, TC>))
        .route("/trial/start", post(start_trial::<P, BS, TS, SC, TC>))
        .route("/billing/checkout", post(create_checkout::<P, BS, TS, SC, TC>))
        .route("/billing/cancel", post(cancel_subscription::<P, BS, TS, SC, TC>))
        .route(
            "/billing/reactivate",
            post(reactivate_subscription::<P, BS, TS, SC, TC>),
        )
        .route("/billing/portal", post(create_portal::<P, BS, TS, SC, TC>))
        .route("/billing/webhook", post(stripe_webhook::<P, BS, TS, SC, TC>))
        .route(
            "/tool-account/provision",
            post(provision_tool_account::<P, BS, TS, SC, TC>),
        )
        .route(
            "/tool-account/sync",
            post(sync_tool_account::<P, BS, TS, SC, TC>),
        )
        .layer(Extension(auth))
        .with_state(state);

    crate::middleware::apply(router, config)
}

/// Bind and serve the router per the server config.
pub async fn serve(config: &Config, router: Router) -> std::io::Result<()> {
    let addr = config
        .server
        .addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Lockgate listening");
    axum::serve(listener, router).await
}

/// Load records and evaluate access for an account.
async fn compute_access<BS: BillingStore, TS: TrialStore>(
    billing: &BS,
    trials: &TS,
    account: &impl AccountIdentity,
) -> Result<(AccessVerdict, Option<TrialRecord>, Option<crate::billing::StoredSubscription>)> {
    let subscription = billing.get_subscription(account.account_id()).await?;
    let trial = trials.get_trial(account.account_id()).await?;
    let returning = trials.was_email_deleted(account.email()).await?;

    let now = unix_timestamp();
    let sub_snapshot = subscription.as_ref().map(|s| s.access_snapshot());
    let trial_snapshot = trial.as_ref().map(|t| t.access_snapshot(now));

    let verdict = access::evaluate(sub_snapshot.as_ref(), trial_snapshot.as_ref(), returning);
    Ok((verdict, trial, subscription))
}

/// Access verdict plus the record context the UI renders.
#[derive(Debug, Serialize)]
pub struct AccessReport {
    #[serde(flatten)]
    pub verdict: AccessVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_days_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_at_period_end: Option<bool>,
}

async fn access_verdict<P, BS, TS, SC, TC>(
    State(state): State<AppState<P, BS, TS, SC, TC>>,
    AuthUser(user): AuthUser<P>,
) -> Result<ApiResponse<AccessReport>>
where
    P: AuthProvider,
    BS: BillingStore + Clone + Send + Sync + 'static,
    TS: TrialStore + Clone + Send + Sync + 'static,
    SC: FullStripeClient + Clone + Send + Sync + 'static,
    TC: ToolAccountClient + Clone + Send + Sync + 'static,
{
    let (verdict, trial, subscription) =
        compute_access(&state.billing, &state.trials, &user).await?;

    let now = unix_timestamp();
    Ok(ApiResponse::success(AccessReport {
        verdict,
        trial_days_remaining: trial.as_ref().map(|t| t.days_remaining(now)),
        current_period_end: subscription.as_ref().map(|s| s.current_period_end),
        cancel_at_period_end: subscription.as_ref().map(|s| s.cancel_at_period_end),
    }))
}

async fn start_trial<P, BS, TS, SC, TC>(
    State(state): State<AppState<P, BS, TS, SC, TC>>,
    AuthUser(user): AuthUser<P>,
) -> Result<ApiResponse<TrialRecord>>
where
    P: AuthProvider,
    BS: BillingStore + Clone + Send + Sync + 'static,
    TS: TrialStore + Clone + Send + Sync + 'static,
    SC: FullStripeClient + Clone + Send + Sync + 'static,
    TC: ToolAccountClient + Clone + Send + Sync + 'static,
{
    let settings = state.settings.current();
    let manager = TrialManager::new(state.trials.clone(), TrialConfig::new(settings.trial_days));

    let record = manager.start_trial(&user).await?;
    Ok(ApiResponse::success_with_message(
        record,
        "Free trial started",
    ))
}

#[derive(Debug, Default, Deserialize)]
struct CheckoutRequest {
    price_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckoutResponse {
    session_id: String,
    url: String,
}

async fn create_checkout<P, BS, TS, SC, TC>(
    State(state): State<AppState<P, BS, TS, SC, TC>>,
    AuthUser(user): AuthUser<P>,
    Json(request): Json<CheckoutRequest>,
) -> Result<ApiResponse<CheckoutResponse>>
where
    P: AuthProvider,
    BS: BillingStore + Clone + Send + Sync + 'static,
    TS: TrialStore + Clone + Send + Sync + 'static,
    SC: FullStripeClient + Clone + Send + Sync + 'static,
    TC: ToolAccountClient + Clone + Send + Sync + 'static,
{
    let settings = state.settings.current();

    let price_id = request
        .price_id
        .or(settings.default_price_id)
        .ok_or(BillingError::NoPriceConfigured)?;

    let manager = CheckoutManager::new(
        state.billing.clone(),
        state.stripe.clone(),
        CheckoutConfig::new(settings.checkout_success_url, settings.checkout_cancel_url),
    );
    let session = manager
        .create_subscription_checkout(&user, &price_id)
        .await?;

    Ok(ApiResponse::success(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct CancelRequest {
    #[serde(default)]
    immediate: bool,
}

async fn cancel_subscription<P, BS, TS, SC, TC>(
    State(state): State<AppState<P, BS, TS, SC, TC>>,
    AuthUser(user): AuthUser<P>,
    Json(request): Json<CancelRequest>,
) -> Result<ApiResponse<()>>
where
    P: AuthProvider,
    BS: BillingStore + Clone + Send + Sync + 'static,
    TS: TrialStore + Clone + Send + Sync + 'static,
    SC: FullStripeClient + Clone + Send + Sync + 'static,
    TC: ToolAccountClient + Clone + Send + Sync + 'static,
{
    let manager = SubscriptionManager::new(state.billing.clone(), state.stripe.clone());
    manager
        .cancel_subscription(user.account_id(), request.immediate)
        .await?;

    let message = if request.immediate {
        "Subscription canceled"
    } else {
        "Subscription will cancel at period end"
    };
    Ok(ApiResponse::success_with_message((), message))
}

async fn reactivate_subscription<P, BS, TS, SC, TC>(
    State(state): State<AppState<P, BS, TS, SC, TC>>,
    AuthUser(user): AuthUser<P>,
) -> Result<ApiResponse<crate::billing::StoredSubscription>>
where
    P: AuthProvider,
    BS: BillingStore + Clone + Send + Sync + 'static,
    TS: TrialStore + Clone + Send + Sync + 'static,
    SC: FullStripeClient + Clone + Send + Sync + 'static,
    TC: ToolAccountClient + Clone + Send + Sync + 'static,
{
    let manager = SubscriptionManager::new(state.billing.clone(), state.stripe.clone());
    let subscription = manager.reactivate_subscription(user.account_id()).await?;

    Ok(ApiResponse::success_with_message(
        subscription,
        "Subscription reactivated",
    ))
}

#[derive(Debug, Default, Deserialize)]
struct PortalRequest {
    return_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct PortalResponse {
    session_id: String,
    url: String,
}

async fn create_portal<P, BS, TS, SC, TC>(
    State(state): State<AppState<P, BS, TS, SC, TC>>,
    AuthUser(user): AuthUser<P>,
    Json(request): Json<PortalRequest>,
) -> Result<ApiResponse<PortalResponse>>
where
    P: AuthProvider,
    BS: BillingStore + Clone + Send + Sync + 'static,
    TS: TrialStore + Clone + Send + Sync + 'static,
    SC: FullStripeClient + Clone + Send + Sync + 'static,
    TC: ToolAccountClient + Clone + Send + Sync + 'static,
{
    let settings = state.settings.current();
    let return_url = request
        .return_url
        .unwrap_or(settings.portal_return_url);

    let manager = PortalManager::new(
        state.billing.clone(),
        state.stripe.clone(),
        PortalConfig::new(),
    );
    let session = manager
        .create_portal_session(user.account_id(), &return_url)
        .await?;

    Ok(ApiResponse::success(PortalResponse {
        session_id: session.id,
        url: session.url,
    }))
}

async fn stripe_webhook<P, BS, TS, SC, TC>(
    State(state): State<AppState<P, BS, TS, SC, TC>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<&'static str>>
where
    P: AuthProvider,
    BS: BillingStore + Clone + Send + Sync + 'static,
    TS: TrialStore + Clone + Send + Sync + 'static,
    SC: FullStripeClient + Clone + Send + Sync + 'static,
    TC: ToolAccountClient + Clone + Send + Sync + 'static,
{
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            crate::error::LockgateError::bad_request("Missing Stripe-Signature header")
        })?;

    let handler = WebhookHandler::new(
        state.billing.clone(),
        state.trials.clone(),
        state.webhook_secret.clone(),
    );

    let event = handler.verify_signature(&body, signature)?;
    let outcome = handler.handle_event(event).await?;

    let label = match outcome {
        WebhookOutcome::Processed => "processed",
        WebhookOutcome::Ignored => "ignored",
        WebhookOutcome::AlreadyProcessed => "already_processed",
    };
    Ok(ApiResponse::success(label))
}

#[derive(Debug, Deserialize)]
struct ProvisionRequest {
    password: String,
}

async fn provision_tool_account<P, BS, TS, SC, TC>(
    State(state): State<AppState<P, BS, TS, SC, TC>>,
    AuthUser(user): AuthUser<P>,
    Json(request): Json<ProvisionRequest>,
) -> Result<ApiResponse<ToolAccount>>
where
    P: AuthProvider,
    BS: BillingStore + Clone + Send + Sync + 'static,
    TS: TrialStore + Clone + Send + Sync + 'static,
    SC: FullStripeClient + Clone + Send + Sync + 'static,
    TC: ToolAccountClient + Clone + Send + Sync + 'static,
{
    let (verdict, _, _) = compute_access(&state.billing, &state.trials, &user).await?;

    let manager = ToolAccountManager::new(state.tool.clone());
    let account = manager
        .ensure_account(&user, &verdict, &request.password)
        .await?;

    Ok(ApiResponse::success(account))
}

#[derive(Debug, Serialize)]
struct ToolSyncResponse {
    outcome: ToolSyncOutcome,
    has_access: bool,
}

async fn sync_tool_account<P, BS, TS, SC, TC>(
    State(state): State<AppState<P, BS, TS, SC, TC>>,
    AuthUser(user): AuthUser<P>,
) -> Result<ApiResponse<ToolSyncResponse>>
where
    P: AuthProvider,
    BS: BillingStore + Clone + Send + Sync + 'static,
    TS: TrialStore + Clone + Send + Sync + 'static,
    SC: FullStripeClient + Clone + Send + Sync + 'static,
    TC: ToolAccountClient + Clone + Send + Sync + 'static,
{
    let (verdict, _, _) = compute_access(&state.billing, &state.trials, &user).await?;

    let manager = ToolAccountManager::new(state.tool.clone());
    let outcome = manager.sync(&user, &verdict).await?;

    Ok(ApiResponse::success(ToolSyncResponse {
        outcome,
        has_access: verdict.has_access,
    }))
}
