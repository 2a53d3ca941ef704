//! Storage trait for billing data.
//!
//! The subscription record is owned by Stripe; this store holds a read-only
//! mirror synced via webhooks, plus the customer link and webhook-event
//! idempotency markers. Implement the trait against your database; an
//! in-memory implementation is provided for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::access::{SubscriptionSnapshot, SubscriptionStanding};
use crate::error::Result;

/// Trait for storing billing data.
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Get the Stripe customer ID linked to an account.
    async fn get_stripe_customer_id(&self, account_id: &str) -> Result<Option<String>>;

    /// Link an account to a Stripe customer.
    async fn set_stripe_customer_id(
        &self,
        account_id: &str,
        email: &str,
        customer_id: &str,
    ) -> Result<()>;

    /// Get the mirrored subscription for an account.
    async fn get_subscription(&self, account_id: &str) -> Result<Option<StoredSubscription>>;

    /// Save or update the mirrored subscription.
    async fn save_subscription(
        &self,
        account_id: &str,
        subscription: &StoredSubscription,
    ) -> Result<()>;

    /// Delete the mirrored subscription.
    async fn delete_subscription(&self, account_id: &str) -> Result<()>;

    /// Find the account holding a given Stripe subscription.
    async fn get_subscription_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<(String, StoredSubscription)>>;

    /// Check whether a webhook event has already been processed.
    async fn is_event_processed(&self, event_id: &str) -> Result<bool>;

    /// Mark a webhook event as processed.
    async fn mark_event_processed(&self, event_id: &str) -> Result<()>;

    /// Clean up old processed-event markers (default: no-op).
    async fn cleanup_old_events(&self, _older_than_days: u32) -> Result<usize> {
        Ok(0)
    }
}

/// Mirrored subscription state, synced from Stripe via webhooks so access
/// checks never call the Stripe API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSubscription {
    /// Stripe subscription ID.
    pub stripe_subscription_id: String,
    /// Stripe customer ID.
    pub stripe_customer_id: String,
    /// Stripe price the subscription is on.
    pub price_id: String,
    /// Subscription status.
    pub status: SubscriptionStatus,
    /// Current billing period start (Unix timestamp).
    pub current_period_start: u64,
    /// Current billing period end (Unix timestamp).
    pub current_period_end: u64,
    /// Trial end timestamp, if the subscription started with a Stripe trial.
    pub trial_end: Option<u64>,
    /// Whether the subscription will cancel at period end.
    pub cancel_at_period_end: bool,
    /// Last sync timestamp.
    pub updated_at: u64,
}

impl StoredSubscription {
    /// Whether the subscription grants access (active or trialing).
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }

    #[must_use]
    pub fn is_trialing(&self) -> bool {
        self.status == SubscriptionStatus::Trialing
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.status == SubscriptionStatus::Canceled
    }

    /// Whether the subscription is scheduled to cancel at period end.
    #[must_use]
    pub fn will_cancel(&self) -> bool {
        self.cancel_at_period_end
    }

    /// Reduce the mirror to the evaluator's vocabulary.
    ///
    /// Statuses outside active/trialing/canceled (past due, unpaid,
    /// incomplete, paused) collapse to `None`: they grant nothing.
    #[must_use]
    pub fn access_snapshot(&self) -> SubscriptionSnapshot {
        let standing = match self.status {
            SubscriptionStatus::Active => SubscriptionStanding::Active,
            SubscriptionStatus::Trialing => SubscriptionStanding::Trialing,
            SubscriptionStatus::Canceled => SubscriptionStanding::Canceled,
            _ => SubscriptionStanding::None,
        };

        SubscriptionSnapshot {
            standing,
            cancel_at_period_end: self.cancel_at_period_end,
            current_period_end: self.current_period_end,
        }
    }
}

/// Stripe subscription status as mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Paused,
    Unpaid,
}

impl SubscriptionStatus {
    /// Parse from a Stripe status string. Unknown statuses are treated as
    /// canceled so they never grant access.
    #[must_use]
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "paused" => Self::Paused,
            "unpaid" => Self::Unpaid,
            _ => Self::Canceled,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
            Self::Unpaid => "unpaid",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// In-memory billing store for tests.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// In-memory billing store. Wraps data in `Arc` for cheap cloning.
    #[derive(Default, Clone)]
    pub struct InMemoryBillingStore {
        inner: Arc<InMemoryBillingStoreInner>,
    }

    #[derive(Default)]
    struct InMemoryBillingStoreInner {
        customers: RwLock<HashMap<String, CustomerRecord>>,
        subscriptions: RwLock<HashMap<String, StoredSubscription>>,
        processed_events: RwLock<HashMap<String, u64>>,
    }

    #[derive(Clone)]
    struct CustomerRecord {
        #[allow(dead_code)]
        email: String,
        stripe_customer_id: String,
    }

    impl InMemoryBillingStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All processed event IDs, for assertions.
        pub fn processed_events(&self) -> Vec<String> {
            self.inner
                .processed_events
                .read()
                .unwrap()
                .keys()
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl BillingStore for InMemoryBillingStore {
        async fn get_stripe_customer_id(&self, account_id: &str) -> Result<Option<String>> {
            Ok(self
                .inner
                .customers
                .read()
                .unwrap()
                .get(account_id)
                .map(|r| r.stripe_customer_id.clone()))
        }

        async fn set_stripe_customer_id(
            &self,
            account_id: &str,
            email: &str,
            customer_id: &str,
        ) -> Result<()> {
            self.inner.customers.write().unwrap().insert(
                account_id.to_string(),
                CustomerRecord {
                    email: email.to_string(),
                    stripe_customer_id: customer_id.to_string(),
                },
            );
            Ok(())
        }

        async fn get_subscription(&self, account_id: &str) -> Result<Option<StoredSubscription>> {
            Ok(self
                .inner
                .subscriptions
                .read()
                .unwrap()
                .get(account_id)
                .cloned())
        }

        async fn save_subscription(
            &self,
            account_id: &str,
            subscription: &StoredSubscription,
        ) -> Result<()> {
            self.inner
                .subscriptions
                .write()
                .unwrap()
                .insert(account_id.to_string(), subscription.clone());
            Ok(())
        }

        async fn delete_subscription(&self, account_id: &str) -> Result<()> {
            self.inner
                .subscriptions
                .write()
                .unwrap()
                .remove(account_id);
            Ok(())
        }

        async fn get_subscription_by_stripe_id(
            &self,
            stripe_subscription_id: &str,
        ) -> Result<Option<(String, StoredSubscription)>> {
            let subs = self.inner.subscriptions.read().unwrap();
            for (account_id, sub) in subs.iter() {
                if sub.stripe_subscription_id == stripe_subscription_id {
                    return Ok(Some((account_id.clone(), sub.clone())));
                }
            }
            Ok(None)
        }

        async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
            Ok(self
                .inner
                .processed_events
                .read()
                .unwrap()
                .contains_key(event_id))
        }

        async fn mark_event_processed(&self, event_id: &str) -> Result<()> {
            let now = crate::utils::unix_timestamp();
            self.inner
                .processed_events
                .write()
                .unwrap()
                .insert(event_id.to_string(), now);
            Ok(())
        }

        async fn cleanup_old_events(&self, older_than_days: u32) -> Result<usize> {
            let now = crate::utils::unix_timestamp();
            let cutoff = now.saturating_sub(u64::from(older_than_days) * 86400);
            let mut events = self.inner.processed_events.write().unwrap();
            let initial_len = events.len();
            events.retain(|_, &mut timestamp| timestamp >= cutoff);
            Ok(initial_len - events.len())
        }
    }
}
