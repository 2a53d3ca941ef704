//! Stripe Checkout session creation.
//!
//! Subscriptions are started through Checkout: the handler creates a session
//! and redirects the user to Stripe; the webhook syncs the resulting
//! subscription back into the mirror.

use async_trait::async_trait;

use super::customer::{CustomerManager, StripeClient};
use super::storage::BillingStore;
use crate::account::AccountIdentity;
use crate::error::Result;

/// Checkout session management.
pub struct CheckoutManager<S: BillingStore, C: StripeClient + StripeCheckoutClient> {
    store: S,
    client: C,
    config: CheckoutConfig,
}

impl<S, C> CheckoutManager<S, C>
where
    S: BillingStore + Clone,
    C: StripeClient + StripeCheckoutClient + Clone,
{
    #[must_use]
    pub fn new(store: S, client: C, config: CheckoutConfig) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    /// Create a subscription checkout session for an account.
    ///
    /// Ensures a Stripe customer exists first, then opens a session in
    /// subscription mode with the account stamped into the metadata so the
    /// webhook can route the resulting subscription.
    pub async fn create_subscription_checkout(
        &self,
        account: &impl AccountIdentity,
        price_id: &str,
    ) -> Result<CheckoutSession> {
        let customers = CustomerManager::new(self.store.clone(), self.client.clone());
        let customer_id = customers.get_or_create_customer(account).await?;

        let session = self
            .client
            .create_checkout_session(CreateCheckoutSessionRequest {
                customer_id,
                price_id: price_id.to_string(),
                success_url: self.config.success_url.clone(),
                cancel_url: self.config.cancel_url.clone(),
                allow_promotion_codes: self.config.allow_promotion_codes,
                trial_period_days: self.config.trial_period_days,
                account_id: account.account_id().to_string(),
                email: account.email().to_string(),
            })
            .await?;

        Ok(session)
    }
}

/// Configuration for checkout sessions.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Redirect target after a completed purchase.
    pub success_url: String,
    /// Redirect target after an abandoned purchase.
    pub cancel_url: String,
    /// Whether promotion codes can be entered at checkout.
    pub allow_promotion_codes: bool,
    /// Stripe-side trial days to attach to new subscriptions, if any.
    pub trial_period_days: Option<u32>,
}

impl CheckoutConfig {
    #[must_use]
    pub fn new(success_url: impl Into<String>, cancel_url: impl Into<String>) -> Self {
        Self {
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
            allow_promotion_codes: false,
            trial_period_days: None,
        }
    }

    #[must_use]
    pub fn allow_promotion_codes(mut self, allow: bool) -> Self {
        self.allow_promotion_codes = allow;
        self
    }

    #[must_use]
    pub fn trial_period_days(mut self, days: u32) -> Self {
        self.trial_period_days = Some(days);
        self
    }
}

/// A created checkout session.
#[derive(Debug, Clone)]
#[must_use]
pub struct CheckoutSession {
    /// Stripe checkout session ID.
    pub id: String,
    /// URL to redirect the customer to.
    pub url: String,
}

/// Request to create a checkout session.
#[derive(Debug, Clone)]
pub struct CreateCheckoutSessionRequest {
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub allow_promotion_codes: bool,
    pub trial_period_days: Option<u32>,
    /// Account metadata stamped onto the subscription.
    pub account_id: String,
    pub email: String,
}

/// Trait for Stripe Checkout operations.
#[async_trait]
pub trait StripeCheckoutClient: Send + Sync {
    /// Create a checkout session in subscription mode.
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession>;
}

/// Mock checkout client for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, RwLock};

    /// Mock checkout client that records requests.
    #[derive(Default, Clone)]
    pub struct MockStripeCheckoutClient {
        counter: Arc<AtomicU64>,
        requests: Arc<RwLock<Vec<CreateCheckoutSessionRequest>>>,
    }

    impl MockStripeCheckoutClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Requests seen so far, for assertions.
        pub fn requests(&self) -> Vec<CreateCheckoutSessionRequest> {
            self.requests.read().unwrap().clone()
        }
    }

    #[async_trait]
    impl StripeCheckoutClient for MockStripeCheckoutClient {
        async fn create_checkout_session(
            &self,
            request: CreateCheckoutSessionRequest,
        ) -> Result<CheckoutSession> {
            let id = format!("cs_test_{}", self.counter.fetch_add(1, Ordering::SeqCst));
            self.requests.write().unwrap().push(request);
            Ok(CheckoutSession {
                id: id.clone(),
                url: format!("https://checkout.stripe.com/c/pay/{}", id),
            })
        }
    }

    /// Mock implementing every Stripe client trait, for wiring whole apps in
    /// tests.
    #[derive(Default, Clone)]
    pub struct MockFullStripeClient {
        pub customers: crate::billing::customer::test::MockStripeClient,
        pub checkout: MockStripeCheckoutClient,
        pub subscriptions: crate::billing::subscription::test::MockStripeSubscriptionClient,
        pub portal: crate::billing::portal::test::MockStripePortalClient,
    }

    impl MockFullStripeClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl crate::billing::customer::StripeClient for MockFullStripeClient {
        async fn create_customer(
            &self,
            request: crate::billing::customer::CreateCustomerRequest,
        ) -> Result<String> {
            self.customers.create_customer(request).await
        }

        async fn delete_customer(&self, customer_id: &str) -> Result<()> {
            self.customers.delete_customer(customer_id).await
        }
    }

    #[async_trait]
    impl StripeCheckoutClient for MockFullStripeClient {
        async fn create_checkout_session(
            &self,
            request: CreateCheckoutSessionRequest,
        ) -> Result<CheckoutSession> {
            self.checkout.create_checkout_session(request).await
        }
    }

    #[async_trait]
    impl crate::billing::subscription::StripeSubscriptionClient for MockFullStripeClient {
        async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
            self.subscriptions.cancel_subscription(subscription_id).await
        }

        async fn cancel_subscription_at_period_end(&self, subscription_id: &str) -> Result<()> {
            self.subscriptions
                .cancel_subscription_at_period_end(subscription_id)
                .await
        }

        async fn resume_subscription(&self, subscription_id: &str) -> Result<()> {
            self.subscriptions.resume_subscription(subscription_id).await
        }

        async fn get_subscription(
            &self,
            subscription_id: &str,
        ) -> Result<crate::billing::subscription::StripeSubscriptionData> {
            self.subscriptions.get_subscription(subscription_id).await
        }
    }

    #[async_trait]
    impl crate::billing::portal::StripePortalClient for MockFullStripeClient {
        async fn create_portal_session(
            &self,
            request: crate::billing::portal::CreatePortalSessionRequest,
        ) -> Result<crate::billing::portal::PortalSession> {
            self.portal.create_portal_session(request).await
        }

        async fn create_portal_session_with_flow(
            &self,
            request: crate::billing::portal::CreatePortalSessionRequest,
            flow: crate::billing::portal::PortalFlow,
        ) -> Result<crate::billing::portal::PortalSession> {
            self.portal
                .create_portal_session_with_flow(request, flow)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::MockFullStripeClient;
    use super::*;
    use crate::account::AccountRef;
    use crate::billing::storage::test::InMemoryBillingStore;

    #[tokio::test]
    async fn test_create_subscription_checkout() {
        let store = InMemoryBillingStore::new();
        let client = MockFullStripeClient::new();
        let config = CheckoutConfig::new(
            "https://app.example.com/success",
            "https://app.example.com/cancel",
        );
        let manager = CheckoutManager::new(store.clone(), client.clone(), config);

        let account = AccountRef::new("user-1", "dana@example.com");
        let session = manager
            .create_subscription_checkout(&account, "price_monthly")
            .await
            .unwrap();

        assert!(session.id.starts_with("cs_test_"));
        assert!(session.url.contains("checkout.stripe.com"));

        // A customer was created and linked as a side effect.
        assert!(store
            .get_stripe_customer_id("user-1")
            .await
            .unwrap()
            .is_some());

        let requests = client.checkout.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].price_id, "price_monthly");
        assert_eq!(requests[0].account_id, "user-1");
        assert_eq!(requests[0].email, "dana@example.com");
    }

    #[tokio::test]
    async fn test_checkout_reuses_existing_customer() {
        let store = InMemoryBillingStore::new();
        store
            .set_stripe_customer_id("user-1", "dana@example.com", "cus_existing")
            .await
            .unwrap();

        let client = MockFullStripeClient::new();
        let config = CheckoutConfig::new("https://s.example.com", "https://c.example.com")
            .trial_period_days(14);
        let manager = CheckoutManager::new(store, client.clone(), config);

        let account = AccountRef::new("user-1", "dana@example.com");
        manager
            .create_subscription_checkout(&account, "price_annual")
            .await
            .unwrap();

        // No new Stripe customer was created.
        assert!(client.customers.customers().is_empty());

        let requests = client.checkout.requests();
        assert_eq!(requests[0].customer_id, "cus_existing");
        assert_eq!(requests[0].trial_period_days, Some(14));
    }
}
