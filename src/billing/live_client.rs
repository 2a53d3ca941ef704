//! Live Stripe client.
//!
//! Production implementation of the billing client traits with retry logic,
//! secure API key handling, and error mapping.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use super::checkout::{CheckoutSession, CreateCheckoutSessionRequest, StripeCheckoutClient};
use super::customer::{CreateCustomerRequest, StripeClient};
use super::error::BillingError;
use super::portal::{CreatePortalSessionRequest, PortalFlow, PortalSession, StripePortalClient};
use super::subscription::{
    StripeSubscriptionClient, StripeSubscriptionData, SubscriptionMetadata,
};
use crate::error::Result;

/// Metadata key for the account ID.
const META_ACCOUNT_ID: &str = "account_id";
/// Metadata key for the account email.
const META_EMAIL: &str = "email";

/// Configuration for the live Stripe client.
#[derive(Debug, Clone)]
pub struct LiveStripeClientConfig {
    /// Maximum retry attempts for transient failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for LiveStripeClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            timeout_seconds: 30,
        }
    }
}

/// Error returned when API key validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidApiKeyError {
    pub reason: String,
}

impl std::fmt::Display for InvalidApiKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid Stripe API key: {}", self.reason)
    }
}

impl std::error::Error for InvalidApiKeyError {}

/// Validate a Stripe secret/restricted key format before use.
fn validate_api_key(key: &str) -> std::result::Result<(), InvalidApiKeyError> {
    const MIN_KEY_LENGTH: usize = 20;

    if key.is_empty() {
        return Err(InvalidApiKeyError {
            reason: "API key cannot be empty".to_string(),
        });
    }

    if key.len() < MIN_KEY_LENGTH {
        return Err(InvalidApiKeyError {
            reason: format!("API key too short (minimum {} characters)", MIN_KEY_LENGTH),
        });
    }

    let valid_prefixes = ["sk_test_", "sk_live_", "rk_test_", "rk_live_"];
    if !valid_prefixes.iter().any(|prefix| key.starts_with(prefix)) {
        return Err(InvalidApiKeyError {
            reason: "API key must start with sk_test_, sk_live_, rk_test_, or rk_live_"
                .to_string(),
        });
    }

    Ok(())
}

#[inline]
fn parse_customer_id(id: &str) -> Result<stripe::CustomerId> {
    id.parse()
        .map_err(|_| crate::error::LockgateError::bad_request(format!("Invalid customer ID: {}", id)))
}

#[inline]
fn parse_subscription_id(id: &str) -> Result<stripe::SubscriptionId> {
    id.parse().map_err(|_| {
        crate::error::LockgateError::bad_request(format!("Invalid subscription ID: {}", id))
    })
}

/// Live Stripe client for production use.
///
/// Holds the API key in a [`SecretString`], retries transient failures with
/// exponential backoff, and attaches idempotency keys to mutating calls.
#[derive(Clone)]
pub struct LiveStripeClient {
    client: stripe::Client,
    config: LiveStripeClientConfig,
    api_key: SecretString,
}

impl LiveStripeClient {
    /// Create a new live Stripe client.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key format is invalid.
    pub fn new(
        api_key: impl Into<SecretString>,
        config: LiveStripeClientConfig,
    ) -> std::result::Result<Self, InvalidApiKeyError> {
        let api_key: SecretString = api_key.into();
        validate_api_key(api_key.expose_secret())?;

        let client = stripe::Client::new(api_key.expose_secret().as_str()).with_app_info(
            "lockgate".to_string(),
            Some(env!("CARGO_PKG_VERSION").to_string()),
            Some("https://github.com/lockgate-rs/lockgate".to_string()),
        );

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    /// Create a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key format is invalid.
    pub fn with_default_config(
        api_key: impl Into<SecretString>,
    ) -> std::result::Result<Self, InvalidApiKeyError> {
        Self::new(api_key, LiveStripeClientConfig::default())
    }

    /// Whether the client holds a test-mode key.
    #[must_use]
    pub fn is_test_mode(&self) -> bool {
        let key = self.api_key.expose_secret();
        key.starts_with("sk_test_") || key.starts_with("rk_test_")
    }

    #[inline]
    fn idempotent_client(&self, operation: &str) -> stripe::Client {
        let key = format!("{}_{}", operation, uuid::Uuid::new_v4());
        self.client
            .clone()
            .with_strategy(stripe::RequestStrategy::Idempotent(key))
    }
}

// Debug must not expose the API key.
impl std::fmt::Debug for LiveStripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStripeClient")
            .field("config", &self.config)
            .field("is_test_mode", &self.is_test_mode())
            .finish_non_exhaustive()
    }
}

/// Execute a Stripe call with timeout and retry on 429/5xx/timeouts.
async fn with_retry<T, F, Fut>(
    config: &LiveStripeClientConfig,
    operation: &str,
    operation_fn: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, stripe::StripeError>>,
{
    let timeout_duration = Duration::from_secs(config.timeout_seconds);
    let mut attempts = 0;

    loop {
        let result = tokio::time::timeout(timeout_duration, operation_fn()).await;

        match result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                if !is_retryable_error(&e) || attempts >= config.max_retries {
                    return Err(map_stripe_error(e, operation));
                }

                let delay = backoff_delay(attempts, config);
                tracing::warn!(
                    operation = operation,
                    attempt = attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying Stripe API call after transient error"
                );
                tokio::time::sleep(delay).await;
                attempts += 1;
            }
            Err(_timeout) => {
                if attempts >= config.max_retries {
                    return Err(BillingError::StripeApiError {
                        operation: operation.to_string(),
                        message: format!(
                            "Request timed out after {} seconds",
                            config.timeout_seconds
                        ),
                        code: None,
                        http_status: Some(408),
                    }
                    .into());
                }

                tracing::warn!(
                    operation = operation,
                    attempt = attempts + 1,
                    timeout_seconds = config.timeout_seconds,
                    "Stripe API request timed out, retrying"
                );
                tokio::time::sleep(backoff_delay(attempts, config)).await;
                attempts += 1;
            }
        }
    }
}

#[inline]
fn is_retryable_error(error: &stripe::StripeError) -> bool {
    match error {
        stripe::StripeError::Stripe(request_error) => {
            let status = request_error.http_status;
            status == 429 || (500..600).contains(&status)
        }
        stripe::StripeError::Timeout => true,
        _ => false,
    }
}

/// Exponential backoff with jitter (0-25% of the delay).
#[inline]
fn backoff_delay(attempt: u32, config: &LiveStripeClientConfig) -> Duration {
    let delay_ms = config
        .base_delay_ms
        .saturating_mul(2_u64.saturating_pow(attempt))
        .min(config.max_delay_ms);

    let jitter = if delay_ms > 0 {
        fastrand::u64(0..=delay_ms / 4)
    } else {
        0
    };
    Duration::from_millis(delay_ms.saturating_add(jitter))
}

/// Map Stripe errors to billing errors.
fn map_stripe_error(error: stripe::StripeError, operation: &str) -> crate::error::LockgateError {
    match error {
        stripe::StripeError::Stripe(request_error) => {
            let http_status = request_error.http_status;
            let message = request_error
                .message
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string());
            let code = request_error.code.as_ref().map(|c| format!("{c:?}"));

            BillingError::StripeApiError {
                operation: operation.to_string(),
                message,
                code,
                http_status: Some(http_status),
            }
            .into()
        }
        stripe::StripeError::QueryStringSerialize(e) => BillingError::Internal {
            message: format!("Failed to serialize request: {e}"),
        }
        .into(),
        stripe::StripeError::JSONSerialize(e) => BillingError::Internal {
            message: format!("Failed to serialize JSON: {e}"),
        }
        .into(),
        stripe::StripeError::UnsupportedVersion => BillingError::Internal {
            message: "Unsupported Stripe API version".to_string(),
        }
        .into(),
        stripe::StripeError::ClientError(msg) => BillingError::Internal {
            message: format!("HTTP client error: {msg}"),
        }
        .into(),
        stripe::StripeError::Timeout => BillingError::StripeApiError {
            operation: operation.to_string(),
            message: "Request timed out".to_string(),
            code: None,
            http_status: Some(408),
        }
        .into(),
    }
}

#[async_trait]
impl StripeClient for LiveStripeClient {
    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String> {
        let client = self.idempotent_client("create_customer");

        let mut params = stripe::CreateCustomer::new();
        params.email = Some(&request.email);
        if let Some(ref name) = request.name {
            params.name = Some(name);
        }

        let mut meta = std::collections::HashMap::new();
        meta.insert(META_ACCOUNT_ID.to_string(), request.metadata.account_id.clone());
        meta.insert(META_EMAIL.to_string(), request.metadata.email.clone());
        params.metadata = Some(meta);

        let customer = with_retry(&self.config, "create_customer", || {
            let client = client.clone();
            let params = params.clone();
            async move { stripe::Customer::create(&client, params).await }
        })
        .await?;

        Ok(customer.id.to_string())
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<()> {
        let customer_id = parse_customer_id(customer_id)?;

        with_retry(&self.config, "delete_customer", || {
            let client = self.client.clone();
            let customer_id = customer_id.clone();
            async move { stripe::Customer::delete(&client, &customer_id).await }
        })
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StripeCheckoutClient for LiveStripeClient {
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        let client = self.idempotent_client("create_checkout_session");
        let customer_id = parse_customer_id(&request.customer_id)?;

        let mut params = stripe::CreateCheckoutSession::new();
        params.customer = Some(customer_id);
        params.mode = Some(stripe::CheckoutSessionMode::Subscription);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.allow_promotion_codes = Some(request.allow_promotion_codes);
        params.line_items = Some(vec![stripe::CreateCheckoutSessionLineItems {
            price: Some(request.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);

        // Stamp the account onto the subscription so webhooks can route it.
        let mut meta = std::collections::HashMap::new();
        meta.insert(META_ACCOUNT_ID.to_string(), request.account_id.clone());
        meta.insert(META_EMAIL.to_string(), request.email.clone());

        let mut subscription_data = stripe::CreateCheckoutSessionSubscriptionData {
            metadata: Some(meta),
            ..Default::default()
        };
        if let Some(trial_days) = request.trial_period_days {
            subscription_data.trial_period_days = Some(trial_days);
        }
        params.subscription_data = Some(subscription_data);

        let session = with_retry(&self.config, "create_checkout_session", || {
            let client = client.clone();
            let params = params.clone();
            async move { stripe::CheckoutSession::create(&client, params).await }
        })
        .await?;

        Ok(CheckoutSession {
            id: session.id.to_string(),
            url: session.url.ok_or_else(|| {
                crate::error::LockgateError::internal("Checkout session URL missing")
            })?,
        })
    }
}

#[async_trait]
impl StripeSubscriptionClient for LiveStripeClient {
    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        let sub_id = parse_subscription_id(subscription_id)?;

        with_retry(&self.config, "cancel_subscription", || {
            let client = self.client.clone();
            let sub_id = sub_id.clone();
            async move {
                stripe::Subscription::cancel(&client, &sub_id, stripe::CancelSubscription::default())
                    .await
            }
        })
        .await?;

        Ok(())
    }

    async fn cancel_subscription_at_period_end(&self, subscription_id: &str) -> Result<()> {
        let client = self.idempotent_client("cancel_subscription_at_period_end");
        let sub_id = parse_subscription_id(subscription_id)?;

        let mut params = stripe::UpdateSubscription::new();
        params.cancel_at_period_end = Some(true);

        with_retry(&self.config, "cancel_subscription_at_period_end", || {
            let client = client.clone();
            let sub_id = sub_id.clone();
            let params = params.clone();
            async move { stripe::Subscription::update(&client, &sub_id, params).await }
        })
        .await?;

        Ok(())
    }

    async fn resume_subscription(&self, subscription_id: &str) -> Result<()> {
        let client = self.idempotent_client("resume_subscription");
        let sub_id = parse_subscription_id(subscription_id)?;

        let mut params = stripe::UpdateSubscription::new();
        params.cancel_at_period_end = Some(false);

        with_retry(&self.config, "resume_subscription", || {
            let client = client.clone();
            let sub_id = sub_id.clone();
            let params = params.clone();
            async move { stripe::Subscription::update(&client, &sub_id, params).await }
        })
        .await?;

        Ok(())
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscriptionData> {
        let sub_id = parse_subscription_id(subscription_id)?;

        let subscription = with_retry(&self.config, "get_subscription", || {
            let client = self.client.clone();
            let sub_id = sub_id.clone();
            async move { stripe::Subscription::retrieve(&client, &sub_id, &[]).await }
        })
        .await?;

        Ok(map_subscription_to_data(subscription))
    }
}

/// Map a Stripe subscription object to the internal wire type.
fn map_subscription_to_data(sub: stripe::Subscription) -> StripeSubscriptionData {
    let status = match sub.status {
        stripe::SubscriptionStatus::Active => "active",
        stripe::SubscriptionStatus::Canceled => "canceled",
        stripe::SubscriptionStatus::Incomplete => "incomplete",
        stripe::SubscriptionStatus::IncompleteExpired => "incomplete_expired",
        stripe::SubscriptionStatus::PastDue => "past_due",
        stripe::SubscriptionStatus::Trialing => "trialing",
        stripe::SubscriptionStatus::Unpaid => "unpaid",
        stripe::SubscriptionStatus::Paused => "paused",
    };

    let customer_id = match &sub.customer {
        stripe::Expandable::Id(id) => id.to_string(),
        stripe::Expandable::Object(c) => c.id.to_string(),
    };

    let price_id = sub
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref())
        .map(|price| price.id.to_string())
        .unwrap_or_default();

    let metadata = SubscriptionMetadata {
        account_id: sub.metadata.get(META_ACCOUNT_ID).cloned(),
        email: sub.metadata.get(META_EMAIL).cloned(),
    };

    StripeSubscriptionData {
        id: sub.id.to_string(),
        customer_id,
        price_id,
        status: status.to_string(),
        current_period_start: sub.current_period_start as u64,
        current_period_end: sub.current_period_end as u64,
        trial_end: sub.trial_end.map(|t| t as u64),
        cancel_at_period_end: sub.cancel_at_period_end,
        metadata,
    }
}

#[async_trait]
impl StripePortalClient for LiveStripeClient {
    async fn create_portal_session(
        &self,
        request: CreatePortalSessionRequest,
    ) -> Result<PortalSession> {
        let customer_id = parse_customer_id(&request.customer_id)?;

        let mut params = stripe::CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(&request.return_url);
        if let Some(ref config_id) = request.configuration_id {
            params.configuration = Some(config_id.as_str());
        }

        let session = with_retry(&self.config, "create_portal_session", || {
            let client = self.client.clone();
            let params = params.clone();
            async move { stripe::BillingPortalSession::create(&client, params).await }
        })
        .await?;

        Ok(PortalSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }

    async fn create_portal_session_with_flow(
        &self,
        request: CreatePortalSessionRequest,
        flow: PortalFlow,
    ) -> Result<PortalSession> {
        let customer_id = parse_customer_id(&request.customer_id)?;

        let mut params = stripe::CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(&request.return_url);
        if let Some(ref config_id) = request.configuration_id {
            params.configuration = Some(config_id.as_str());
        }

        let flow_data = match flow {
            PortalFlow::PaymentMethodUpdate => stripe::CreateBillingPortalSessionFlowData {
                type_: stripe::CreateBillingPortalSessionFlowDataType::PaymentMethodUpdate,
                ..Default::default()
            },
            PortalFlow::SubscriptionCancel { subscription_id } => {
                stripe::CreateBillingPortalSessionFlowData {
                    type_: stripe::CreateBillingPortalSessionFlowDataType::SubscriptionCancel,
                    subscription_cancel: Some(
                        stripe::CreateBillingPortalSessionFlowDataSubscriptionCancel {
                            subscription: subscription_id,
                            ..Default::default()
                        },
                    ),
                    ..Default::default()
                }
            }
        };
        params.flow_data = Some(flow_data);

        let session = with_retry(&self.config, "create_portal_session_with_flow", || {
            let client = self.client.clone();
            let params = params.clone();
            async move { stripe::BillingPortalSession::create(&client, params).await }
        })
        .await?;

        Ok(PortalSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_api_key_valid() {
        assert!(validate_api_key("sk_test_1234567890abcdef").is_ok());
        assert!(validate_api_key("sk_live_1234567890abcdef").is_ok());
        assert!(validate_api_key("rk_test_1234567890abcdef").is_ok());
        assert!(validate_api_key("rk_live_1234567890abcdef").is_ok());
    }

    #[test]
    fn test_validate_api_key_invalid() {
        assert!(validate_api_key("").is_err());
        assert!(validate_api_key("invalid_key").is_err());
        assert!(validate_api_key("sk_test_short").is_err());
        // Publishable keys cannot perform these operations.
        assert!(validate_api_key("pk_test_1234567890abcdef").is_err());
    }

    #[test]
    fn test_is_test_mode() {
        let client =
            LiveStripeClient::with_default_config("sk_test_12345678901234567890".to_string())
                .unwrap();
        assert!(client.is_test_mode());

        let client =
            LiveStripeClient::with_default_config("sk_live_12345678901234567890".to_string())
                .unwrap();
        assert!(!client.is_test_mode());
    }

    #[test]
    fn test_debug_does_not_expose_key() {
        let client =
            LiveStripeClient::with_default_config("sk_test_12345678901234567890".to_string())
                .unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk_test_12345678901234567890"));
    }

    #[test]
    fn test_backoff_delay_is_bounded() {
        let config = LiveStripeClientConfig {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 2_000,
            timeout_seconds: 30,
        };

        for attempt in 0..10 {
            let delay = backoff_delay(attempt, &config);
            // Cap plus 25% jitter.
            assert!(delay <= Duration::from_millis(2_500));
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable_error(&stripe::StripeError::Timeout));
        assert!(!is_retryable_error(&stripe::StripeError::ClientError(
            "bad".to_string()
        )));
    }
}
