//! Subscription lifecycle management.
//!
//! Handles cancellation, reactivation, and syncing mirror state from Stripe
//! webhooks. Subscription creation goes through checkout
//! (see [`super::checkout`]).

use async_trait::async_trait;

use super::error::BillingError;
use super::storage::{BillingStore, StoredSubscription, SubscriptionStatus};
use crate::error::Result;

/// Subscription management operations.
pub struct SubscriptionManager<S: BillingStore, C: StripeSubscriptionClient> {
    store: S,
    client: C,
}

impl<S: BillingStore, C: StripeSubscriptionClient> SubscriptionManager<S, C> {
    #[must_use]
    pub fn new(store: S, client: C) -> Self {
        Self { store, client }
    }

    /// Get the mirrored subscription for an account.
    pub async fn get_subscription(&self, account_id: &str) -> Result<Option<StoredSubscription>> {
        self.store.get_subscription(account_id).await
    }

    /// Whether the account has an active (or trialing) subscription.
    pub async fn has_active_subscription(&self, account_id: &str) -> Result<bool> {
        match self.store.get_subscription(account_id).await? {
            Some(sub) => Ok(sub.is_active()),
            None => Ok(false),
        }
    }

    /// Cancel the account's subscription.
    ///
    /// By default the subscription cancels at the end of the current billing
    /// period, so access runs out rather than stopping abruptly. Set
    /// `immediate` to cancel right away.
    pub async fn cancel_subscription(&self, account_id: &str, immediate: bool) -> Result<()> {
        let sub = self
            .store
            .get_subscription(account_id)
            .await?
            .ok_or_else(|| BillingError::NoSubscription {
                account_id: account_id.to_string(),
            })?;

        if immediate {
            self.client
                .cancel_subscription(&sub.stripe_subscription_id)
                .await?;
        } else {
            self.client
                .cancel_subscription_at_period_end(&sub.stripe_subscription_id)
                .await?;
        }

        // Update the mirror now for immediate feedback; the webhook will
        // confirm the same state shortly after.
        let mut updated = sub;
        if immediate {
            updated.status = SubscriptionStatus::Canceled;
        } else {
            updated.cancel_at_period_end = true;
        }
        updated.updated_at = crate::utils::unix_timestamp();
        self.store.save_subscription(account_id, &updated).await?;

        Ok(())
    }

    /// Reactivate a subscription that was scheduled to cancel at period end.
    pub async fn reactivate_subscription(&self, account_id: &str) -> Result<StoredSubscription> {
        let sub = self
            .store
            .get_subscription(account_id)
            .await?
            .ok_or_else(|| BillingError::NoSubscription {
                account_id: account_id.to_string(),
            })?;

        if !sub.cancel_at_period_end {
            return Err(BillingError::SubscriptionNotCancelling {
                account_id: account_id.to_string(),
            }
            .into());
        }

        self.client
            .resume_subscription(&sub.stripe_subscription_id)
            .await?;

        let mut updated = sub;
        updated.cancel_at_period_end = false;
        updated.updated_at = crate::utils::unix_timestamp();
        self.store.save_subscription(account_id, &updated).await?;

        Ok(updated)
    }

    /// Sync mirror state from a Stripe subscription payload.
    ///
    /// Called by the webhook handler. The account is resolved through the
    /// existing mirror first, then through the payload's metadata for brand
    /// new subscriptions.
    pub async fn sync_from_stripe(&self, data: StripeSubscriptionData) -> Result<String> {
        let account_id = match self
            .store
            .get_subscription_by_stripe_id(&data.id)
            .await?
        {
            Some((id, _)) => id,
            None => data.metadata.account_id.clone().ok_or_else(|| {
                crate::error::LockgateError::bad_request(
                    "Subscription payload missing account_id metadata",
                )
            })?,
        };

        let stored = StoredSubscription {
            stripe_subscription_id: data.id,
            stripe_customer_id: data.customer_id,
            price_id: data.price_id,
            status: SubscriptionStatus::from_stripe(&data.status),
            current_period_start: data.current_period_start,
            current_period_end: data.current_period_end,
            trial_end: data.trial_end,
            cancel_at_period_end: data.cancel_at_period_end,
            updated_at: crate::utils::unix_timestamp(),
        };

        self.store.save_subscription(&account_id, &stored).await?;
        Ok(account_id)
    }

    /// Remove the mirror record (subscription deleted in Stripe).
    pub async fn delete_subscription(&self, stripe_subscription_id: &str) -> Result<()> {
        if let Some((account_id, _)) = self
            .store
            .get_subscription_by_stripe_id(stripe_subscription_id)
            .await?
        {
            self.store.delete_subscription(&account_id).await?;
        }
        Ok(())
    }

    /// Refresh the mirror from Stripe.
    ///
    /// Use when fresh data is required, e.g. before an irreversible decision
    /// or after a suspected missed webhook.
    pub async fn refresh_from_stripe(
        &self,
        account_id: &str,
    ) -> Result<Option<StoredSubscription>> {
        let stored = match self.store.get_subscription(account_id).await? {
            Some(sub) => sub,
            None => return Ok(None),
        };

        let data = self
            .client
            .get_subscription(&stored.stripe_subscription_id)
            .await?;
        self.sync_from_stripe(data).await?;

        self.store.get_subscription(account_id).await
    }
}

/// Stripe subscription data from a webhook or API response.
#[derive(Debug, Clone)]
pub struct StripeSubscriptionData {
    pub id: String,
    pub customer_id: String,
    pub price_id: String,
    /// Raw status string, parsed fail-closed by the mirror.
    pub status: String,
    pub current_period_start: u64,
    pub current_period_end: u64,
    pub trial_end: Option<u64>,
    pub cancel_at_period_end: bool,
    pub metadata: SubscriptionMetadata,
}

/// Metadata attached to Stripe subscriptions at checkout.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionMetadata {
    pub account_id: Option<String>,
    pub email: Option<String>,
}

/// Trait for Stripe subscription operations.
#[async_trait]
pub trait StripeSubscriptionClient: Send + Sync {
    /// Cancel a subscription immediately.
    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()>;

    /// Schedule a subscription to cancel at period end.
    async fn cancel_subscription_at_period_end(&self, subscription_id: &str) -> Result<()>;

    /// Undo a pending cancellation.
    async fn resume_subscription(&self, subscription_id: &str) -> Result<()>;

    /// Fetch subscription details from Stripe.
    async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscriptionData>;
}

/// Mock Stripe subscription client for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// Mock subscription client backed by a map of subscription payloads.
    #[derive(Default, Clone)]
    pub struct MockStripeSubscriptionClient {
        subscriptions: Arc<RwLock<HashMap<String, StripeSubscriptionData>>>,
    }

    impl MockStripeSubscriptionClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a subscription payload.
        pub fn add_subscription(&self, data: StripeSubscriptionData) {
            self.subscriptions
                .write()
                .unwrap()
                .insert(data.id.clone(), data);
        }
    }

    fn missing(subscription_id: &str) -> crate::error::LockgateError {
        crate::error::LockgateError::not_found(format!(
            "Subscription not found: {}",
            subscription_id
        ))
    }

    #[async_trait]
    impl StripeSubscriptionClient for MockStripeSubscriptionClient {
        async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
            let mut subs = self.subscriptions.write().unwrap();
            let sub = subs
                .get_mut(subscription_id)
                .ok_or_else(|| missing(subscription_id))?;
            sub.status = "canceled".to_string();
            Ok(())
        }

        async fn cancel_subscription_at_period_end(&self, subscription_id: &str) -> Result<()> {
            let mut subs = self.subscriptions.write().unwrap();
            let sub = subs
                .get_mut(subscription_id)
                .ok_or_else(|| missing(subscription_id))?;
            sub.cancel_at_period_end = true;
            Ok(())
        }

        async fn resume_subscription(&self, subscription_id: &str) -> Result<()> {
            let mut subs = self.subscriptions.write().unwrap();
            let sub = subs
                .get_mut(subscription_id)
                .ok_or_else(|| missing(subscription_id))?;
            sub.cancel_at_period_end = false;
            Ok(())
        }

        async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscriptionData> {
            self.subscriptions
                .read()
                .unwrap()
                .get(subscription_id)
                .cloned()
                .ok_or_else(|| missing(subscription_id))
        }
    }
}
