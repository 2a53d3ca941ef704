//! Stripe webhook handling.
//!
//! Verifies signatures, deduplicates events, and syncs subscription state
//! into the mirror. Subscription activation also marks the account's free
//! trial as converted, which is how the trial record learns about payment.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::error::BillingError;
use super::storage::BillingStore;
use super::subscription::{
    StripeSubscriptionClient, StripeSubscriptionData, SubscriptionManager, SubscriptionMetadata,
};
use crate::error::Result;
use crate::trial::{TrialConfig, TrialManager, TrialStore};

/// Maximum accepted age of a webhook timestamp, in seconds.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Webhook handler for Stripe events.
///
/// The webhook secret is held in a [`SecretString`] so it never shows up in
/// debug output or logs.
pub struct WebhookHandler<S: BillingStore, T: TrialStore> {
    billing: S,
    trials: T,
    webhook_secret: SecretString,
}

impl<S, T> WebhookHandler<S, T>
where
    S: BillingStore + Clone,
    T: TrialStore + Clone,
{
    #[must_use]
    pub fn new(billing: S, trials: T, webhook_secret: impl Into<SecretString>) -> Self {
        Self {
            billing,
            trials,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify the `Stripe-Signature` header against the raw payload and
    /// parse the event.
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent> {
        let sig_parts = parse_signature_header(signature)?;

        let now = crate::utils::unix_timestamp() as i64;
        let age = (now - sig_parts.timestamp).abs();
        if age > TIMESTAMP_TOLERANCE_SECS {
            return Err(BillingError::WebhookTimestampExpired { age_seconds: age }.into());
        }

        let signed_payload = format!(
            "{}.{}",
            sig_parts.timestamp,
            String::from_utf8_lossy(payload)
        );
        let expected_sig = compute_signature(
            self.webhook_secret.expose_secret(),
            signed_payload.as_bytes(),
        )?;

        let expected_bytes = hex::decode(&expected_sig).map_err(|_| {
            crate::error::LockgateError::internal("Hex encode produced undecodable output")
        })?;
        let provided_bytes = hex::decode(&sig_parts.signature)
            .map_err(|_| BillingError::InvalidWebhookSignature)?;

        if expected_bytes.ct_eq(&provided_bytes).unwrap_u8() != 1 {
            return Err(BillingError::InvalidWebhookSignature.into());
        }

        let event: WebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse webhook payload");
            BillingError::InvalidWebhookPayload {
                message: "malformed JSON payload".to_string(),
            }
        })?;

        Ok(event)
    }

    /// Process a verified webhook event.
    ///
    /// Idempotent: a previously seen event ID short-circuits.
    pub async fn handle_event(&self, event: WebhookEvent) -> Result<WebhookOutcome> {
        if self.billing.is_event_processed(&event.id).await? {
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let outcome = match event.event_type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(&event)?,
            "customer.subscription.created" | "customer.subscription.updated" => {
                self.handle_subscription_updated(&event).await?
            }
            "customer.subscription.deleted" => self.handle_subscription_deleted(&event).await?,
            "invoice.payment_failed" => {
                // The subscription.updated event carries the past_due state;
                // this one exists for notification hooks.
                tracing::warn!(event_id = %event.id, "Invoice payment failed");
                WebhookOutcome::Processed
            }
            _ => WebhookOutcome::Ignored,
        };

        if !matches!(outcome, WebhookOutcome::Ignored) {
            self.billing.mark_event_processed(&event.id).await?;
        }

        Ok(outcome)
    }

    fn handle_checkout_completed(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let has_subscription = event
            .data
            .object
            .get("subscription")
            .and_then(|v| v.as_str())
            .is_some();

        // Non-subscription checkouts (one-time payments) are not ours.
        // The subscription.created event does the actual syncing.
        if has_subscription {
            Ok(WebhookOutcome::Processed)
        } else {
            Ok(WebhookOutcome::Ignored)
        }
    }

    async fn handle_subscription_updated(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let data = parse_subscription_data(&event.data.object)?;
        let grants_access = matches!(data.status.as_str(), "active" | "trialing");

        let manager = SubscriptionManager::new(self.billing.clone(), NullSubscriptionClient);
        let account_id = manager.sync_from_stripe(data).await?;

        // A subscription taking over ends the free trial for good.
        if grants_access {
            let trials = TrialManager::new(self.trials.clone(), TrialConfig::default());
            trials.mark_converted(&account_id).await?;
        }

        Ok(WebhookOutcome::Processed)
    }

    async fn handle_subscription_deleted(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let subscription_id = event
            .data
            .object
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BillingError::InvalidWebhookPayload {
                message: "missing subscription ID".to_string(),
            })?;

        let manager = SubscriptionManager::new(self.billing.clone(), NullSubscriptionClient);
        manager.delete_subscription(subscription_id).await?;

        Ok(WebhookOutcome::Processed)
    }
}

/// Parse subscription data from a webhook payload.
fn parse_subscription_data(object: &serde_json::Value) -> Result<StripeSubscriptionData> {
    let obj = object
        .as_object()
        .ok_or_else(|| BillingError::InvalidWebhookPayload {
            message: "subscription data is not an object".to_string(),
        })?;

    let id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BillingError::InvalidWebhookPayload {
            message: "missing subscription ID".to_string(),
        })?
        .to_string();

    let customer_id = obj
        .get("customer")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BillingError::InvalidWebhookPayload {
            message: "missing customer ID".to_string(),
        })?
        .to_string();

    // Absent status parses fail-closed downstream, not as a grant.
    let status = obj
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let price_id = obj
        .get("items")
        .and_then(|v| v.get("data"))
        .and_then(|v| v.as_array())
        .and_then(|items| items.first())
        .and_then(|item| item.get("price"))
        .and_then(|price| price.get("id"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let metadata = obj
        .get("metadata")
        .and_then(|v| v.as_object())
        .map(|m| SubscriptionMetadata {
            account_id: m
                .get("account_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            email: m.get("email").and_then(|v| v.as_str()).map(String::from),
        })
        .unwrap_or_default();

    Ok(StripeSubscriptionData {
        id,
        customer_id,
        price_id,
        status,
        current_period_start: obj
            .get("current_period_start")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        current_period_end: obj
            .get("current_period_end")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        trial_end: obj.get("trial_end").and_then(|v| v.as_u64()),
        cancel_at_period_end: obj
            .get("cancel_at_period_end")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        metadata,
    })
}

/// Parsed webhook event.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookEvent {
    /// Event ID.
    pub id: String,
    /// Event type, e.g. `customer.subscription.updated`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    pub data: WebhookEventData,
    /// When the event was created.
    pub created: u64,
}

/// Webhook event payload.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookEventData {
    /// The object that triggered the event.
    pub object: serde_json::Value,
}

/// Outcome of webhook processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event was processed.
    Processed,
    /// Event was not relevant.
    Ignored,
    /// Event ID was seen before.
    AlreadyProcessed,
}

struct SignatureParts {
    timestamp: i64,
    signature: String,
}

/// Parse the `Stripe-Signature` header (`t=...,v1=...`).
fn parse_signature_header(header: &str) -> Result<SignatureParts> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let (key, value) =
            part.split_once('=')
                .ok_or_else(|| BillingError::InvalidWebhookPayload {
                    message: "invalid signature header format".to_string(),
                })?;

        match key.trim() {
            "t" => timestamp = value.parse().ok(),
            "v1" => signature = Some(value.to_string()),
            // Other schemes are ignored.
            _ => {}
        }
    }

    Ok(SignatureParts {
        timestamp: timestamp.ok_or(BillingError::InvalidWebhookSignature)?,
        signature: signature.ok_or(BillingError::InvalidWebhookSignature)?,
    })
}

/// Compute the hex HMAC-SHA256 signature of a payload.
fn compute_signature(secret: &str, payload: &[u8]) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| crate::error::LockgateError::internal("HMAC key error"))?;
    mac.update(payload);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Subscription client stub for webhook-driven sync, which never calls the
/// Stripe API.
#[derive(Clone)]
struct NullSubscriptionClient;

#[async_trait]
impl StripeSubscriptionClient for NullSubscriptionClient {
    async fn cancel_subscription(&self, _subscription_id: &str) -> Result<()> {
        Ok(())
    }

    async fn cancel_subscription_at_period_end(&self, _subscription_id: &str) -> Result<()> {
        Ok(())
    }

    async fn resume_subscription(&self, _subscription_id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscriptionData> {
        Err(crate::error::LockgateError::internal(format!(
            "Webhook sync must not fetch subscriptions ({})",
            subscription_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::TrialStatus;
    use crate::billing::storage::test::InMemoryBillingStore;
    use crate::trial::storage::TrialRecord;
    use crate::trial::storage::test::InMemoryTrialStore;

    const SECRET: &str = "whsec_test_secret";

    fn handler() -> (
        WebhookHandler<InMemoryBillingStore, InMemoryTrialStore>,
        InMemoryBillingStore,
        InMemoryTrialStore,
    ) {
        let billing = InMemoryBillingStore::new();
        let trials = InMemoryTrialStore::new();
        let handler = WebhookHandler::new(billing.clone(), trials.clone(), SECRET.to_string());
        (handler, billing, trials)
    }

    fn subscription_event(event_type: &str, status: &str) -> WebhookEvent {
        let object = serde_json::json!({
            "id": "sub_123",
            "customer": "cus_123",
            "status": status,
            "current_period_start": 1_700_000_000u64,
            "current_period_end": 1_702_592_000u64,
            "cancel_at_period_end": false,
            "items": {"data": [{"price": {"id": "price_monthly"}}]},
            "metadata": {"account_id": "user-1", "email": "dana@example.com"},
        });

        WebhookEvent {
            id: format!("evt_{}_{}", event_type, status),
            event_type: event_type.to_string(),
            data: WebhookEventData { object },
            created: 1_700_000_000,
        }
    }

    fn sign(payload: &[u8], timestamp: i64, secret: &str) -> String {
        let signed = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let sig = compute_signature(secret, signed.as_bytes()).unwrap();
        format!("t={},v1={}", timestamp, sig)
    }

    #[test]
    fn test_verify_signature_round_trip() {
        let (handler, _, _) = handler();
        let payload = serde_json::to_vec(&serde_json::json!({
            "id": "evt_1",
            "type": "customer.subscription.updated",
            "data": {"object": {}},
            "created": 1_700_000_000u64,
        }))
        .unwrap();

        let now = crate::utils::unix_timestamp() as i64;
        let header = sign(&payload, now, SECRET);

        let event = handler.verify_signature(&payload, &header).unwrap();
        assert_eq!(event.id, "evt_1");
    }

    #[test]
    fn test_verify_signature_rejects_wrong_secret() {
        let (handler, _, _) = handler();
        let payload = b"{}".to_vec();

        let now = crate::utils::unix_timestamp() as i64;
        let header = sign(&payload, now, "whsec_other_secret");

        assert!(handler.verify_signature(&payload, &header).is_err());
    }

    #[test]
    fn test_verify_signature_rejects_old_timestamp() {
        let (handler, _, _) = handler();
        let payload = b"{}".to_vec();

        let stale = crate::utils::unix_timestamp() as i64 - 600;
        let header = sign(&payload, stale, SECRET);

        assert!(handler.verify_signature(&payload, &header).is_err());
    }

    #[test]
    fn test_verify_signature_rejects_tampered_payload() {
        let (handler, _, _) = handler();
        let payload = b"{\"id\":\"evt_1\"}".to_vec();

        let now = crate::utils::unix_timestamp() as i64;
        let header = sign(&payload, now, SECRET);

        let tampered = b"{\"id\":\"evt_2\"}".to_vec();
        assert!(handler.verify_signature(&tampered, &header).is_err());
    }

    #[test]
    fn test_verify_signature_rejects_malformed_header() {
        let (handler, _, _) = handler();
        assert!(handler.verify_signature(b"{}", "no-equals-signs").is_err());
        assert!(handler.verify_signature(b"{}", "t=123").is_err());
        assert!(handler.verify_signature(b"{}", "v1=abcd").is_err());
    }

    #[tokio::test]
    async fn test_subscription_created_syncs_mirror() {
        let (handler, billing, _) = handler();

        let outcome = handler
            .handle_event(subscription_event("customer.subscription.created", "active"))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let sub = billing.get_subscription("user-1").await.unwrap().unwrap();
        assert!(sub.is_active());
        assert_eq!(sub.price_id, "price_monthly");
    }

    #[tokio::test]
    async fn test_subscription_activation_converts_trial() {
        let (handler, _, trials) = handler();

        let record = TrialRecord {
            account_id: "user-1".to_string(),
            email: "dana@example.com".to_string(),
            status: TrialStatus::Active,
            started_at: 1_700_000_000,
            trial_end: 1_700_604_800,
            updated_at: 1_700_000_000,
        };
        trials.save_trial(&record).await.unwrap();

        handler
            .handle_event(subscription_event("customer.subscription.created", "active"))
            .await
            .unwrap();

        let trial = trials.get_trial("user-1").await.unwrap().unwrap();
        assert_eq!(trial.status, TrialStatus::ConvertedToPaid);
    }

    #[tokio::test]
    async fn test_canceled_subscription_does_not_convert_trial() {
        let (handler, _, trials) = handler();

        let record = TrialRecord {
            account_id: "user-1".to_string(),
            email: "dana@example.com".to_string(),
            status: TrialStatus::Active,
            started_at: 1_700_000_000,
            trial_end: 1_700_604_800,
            updated_at: 1_700_000_000,
        };
        trials.save_trial(&record).await.unwrap();

        handler
            .handle_event(subscription_event(
                "customer.subscription.updated",
                "canceled",
            ))
            .await
            .unwrap();

        let trial = trials.get_trial("user-1").await.unwrap().unwrap();
        assert_eq!(trial.status, TrialStatus::Active);
    }

    #[tokio::test]
    async fn test_event_idempotency() {
        let (handler, billing, _) = handler();

        let event = subscription_event("customer.subscription.created", "active");
        let first = handler.handle_event(event.clone()).await.unwrap();
        assert_eq!(first, WebhookOutcome::Processed);

        let second = handler.handle_event(event).await.unwrap();
        assert_eq!(second, WebhookOutcome::AlreadyProcessed);

        assert_eq!(billing.processed_events().len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_deleted_removes_mirror() {
        let (handler, billing, _) = handler();

        handler
            .handle_event(subscription_event("customer.subscription.created", "active"))
            .await
            .unwrap();
        assert!(billing.get_subscription("user-1").await.unwrap().is_some());

        let delete_event = WebhookEvent {
            id: "evt_deleted".to_string(),
            event_type: "customer.subscription.deleted".to_string(),
            data: WebhookEventData {
                object: serde_json::json!({"id": "sub_123"}),
            },
            created: 1_700_000_001,
        };
        handler.handle_event(delete_event).await.unwrap();

        assert!(billing.get_subscription("user-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_events_are_ignored_and_not_marked() {
        let (handler, billing, _) = handler();

        let event = WebhookEvent {
            id: "evt_misc".to_string(),
            event_type: "customer.updated".to_string(),
            data: WebhookEventData {
                object: serde_json::json!({}),
            },
            created: 1_700_000_000,
        };

        let outcome = handler.handle_event(event).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
        assert!(billing.processed_events().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_completed_without_subscription_is_ignored() {
        let (handler, _, _) = handler();

        let event = WebhookEvent {
            id: "evt_checkout".to_string(),
            event_type: "checkout.session.completed".to_string(),
            data: WebhookEventData {
                object: serde_json::json!({"id": "cs_1", "mode": "payment"}),
            },
            created: 1_700_000_000,
        };

        let outcome = handler.handle_event(event).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    #[test]
    fn test_parse_subscription_data_requires_core_fields() {
        assert!(parse_subscription_data(&serde_json::json!({"customer": "cus_1"})).is_err());
        assert!(parse_subscription_data(&serde_json::json!({"id": "sub_1"})).is_err());
        assert!(parse_subscription_data(&serde_json::json!("not an object")).is_err());

        let minimal = parse_subscription_data(&serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
        }))
        .unwrap();
        // Missing status stays empty and parses fail-closed downstream.
        assert_eq!(minimal.status, "");
        assert_eq!(minimal.price_id, "");
    }
}
