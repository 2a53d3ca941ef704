//! Stripe Customer Portal session management.
//!
//! The portal is where customers self-serve payment methods and
//! cancellation; Lockgate only creates the session and hands back the URL.

use async_trait::async_trait;

use super::error::BillingError;
use super::storage::BillingStore;
use crate::error::Result;

/// Customer Portal session management.
pub struct PortalManager<S: BillingStore, C: StripePortalClient> {
    store: S,
    client: C,
    config: PortalConfig,
}

impl<S: BillingStore, C: StripePortalClient> PortalManager<S, C> {
    #[must_use]
    pub fn new(store: S, client: C, config: PortalConfig) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    /// Create a portal session for an account.
    pub async fn create_portal_session(
        &self,
        account_id: &str,
        return_url: &str,
    ) -> Result<PortalSession> {
        let customer_id = self.customer_id(account_id).await?;

        self.client
            .create_portal_session(CreatePortalSessionRequest {
                customer_id,
                return_url: return_url.to_string(),
                configuration_id: self.config.configuration_id.clone(),
            })
            .await
    }

    /// Create a portal session opening on a specific flow.
    pub async fn create_portal_session_with_flow(
        &self,
        account_id: &str,
        return_url: &str,
        flow: PortalFlow,
    ) -> Result<PortalSession> {
        let customer_id = self.customer_id(account_id).await?;

        self.client
            .create_portal_session_with_flow(
                CreatePortalSessionRequest {
                    customer_id,
                    return_url: return_url.to_string(),
                    configuration_id: self.config.configuration_id.clone(),
                },
                flow,
            )
            .await
    }

    async fn customer_id(&self, account_id: &str) -> Result<String> {
        self.store
            .get_stripe_customer_id(account_id)
            .await?
            .ok_or_else(|| {
                BillingError::NoCustomer {
                    account_id: account_id.to_string(),
                }
                .into()
            })
    }
}

/// Configuration for the customer portal.
#[derive(Debug, Clone, Default)]
pub struct PortalConfig {
    /// Stripe portal configuration ID; the default configuration when unset.
    pub configuration_id: Option<String>,
}

impl PortalConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn configuration_id(mut self, id: impl Into<String>) -> Self {
        self.configuration_id = Some(id.into());
        self
    }
}

/// A created portal session.
#[derive(Debug, Clone)]
#[must_use]
pub struct PortalSession {
    pub id: String,
    /// URL to redirect the customer to.
    pub url: String,
}

/// Request to create a portal session.
#[derive(Debug, Clone)]
pub struct CreatePortalSessionRequest {
    pub customer_id: String,
    pub return_url: String,
    pub configuration_id: Option<String>,
}

/// Portal flows for landing the customer on a specific page.
#[derive(Debug, Clone)]
pub enum PortalFlow {
    /// Update payment method.
    PaymentMethodUpdate,
    /// Cancel a subscription.
    SubscriptionCancel { subscription_id: String },
}

impl PortalFlow {
    #[must_use]
    pub fn flow_type(&self) -> &'static str {
        match self {
            Self::PaymentMethodUpdate => "payment_method_update",
            Self::SubscriptionCancel { .. } => "subscription_cancel",
        }
    }
}

/// Trait for Stripe customer portal operations.
#[async_trait]
pub trait StripePortalClient: Send + Sync {
    async fn create_portal_session(
        &self,
        request: CreatePortalSessionRequest,
    ) -> Result<PortalSession>;

    async fn create_portal_session_with_flow(
        &self,
        request: CreatePortalSessionRequest,
        flow: PortalFlow,
    ) -> Result<PortalSession>;
}

/// Mock portal client for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Mock portal client.
    #[derive(Default, Clone)]
    pub struct MockStripePortalClient {
        session_counter: Arc<AtomicU64>,
    }

    impl MockStripePortalClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn next_session(&self) -> PortalSession {
            let id = format!(
                "bps_test_{}",
                self.session_counter.fetch_add(1, Ordering::SeqCst)
            );
            PortalSession {
                id: id.clone(),
                url: format!("https://billing.stripe.com/p/session/{}", id),
            }
        }
    }

    #[async_trait]
    impl StripePortalClient for MockStripePortalClient {
        async fn create_portal_session(
            &self,
            _request: CreatePortalSessionRequest,
        ) -> Result<PortalSession> {
            Ok(self.next_session())
        }

        async fn create_portal_session_with_flow(
            &self,
            _request: CreatePortalSessionRequest,
            _flow: PortalFlow,
        ) -> Result<PortalSession> {
            Ok(self.next_session())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::MockStripePortalClient;
    use super::*;
    use crate::billing::storage::test::InMemoryBillingStore;

    #[tokio::test]
    async fn test_create_portal_session() {
        let store = InMemoryBillingStore::new();
        store
            .set_stripe_customer_id("user-1", "dana@example.com", "cus_123")
            .await
            .unwrap();

        let manager = PortalManager::new(store, MockStripePortalClient::new(), PortalConfig::new());

        let session = manager
            .create_portal_session("user-1", "https://app.example.com/account")
            .await
            .unwrap();

        assert!(session.id.starts_with("bps_test_"));
        assert!(session.url.contains("billing.stripe.com"));
    }

    #[tokio::test]
    async fn test_portal_requires_linked_customer() {
        let store = InMemoryBillingStore::new();
        let manager = PortalManager::new(store, MockStripePortalClient::new(), PortalConfig::new());

        let result = manager
            .create_portal_session("nobody", "https://app.example.com/account")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_portal_with_cancel_flow() {
        let store = InMemoryBillingStore::new();
        store
            .set_stripe_customer_id("user-1", "dana@example.com", "cus_123")
            .await
            .unwrap();

        let manager = PortalManager::new(store, MockStripePortalClient::new(), PortalConfig::new());

        let session = manager
            .create_portal_session_with_flow(
                "user-1",
                "https://app.example.com/account",
                PortalFlow::SubscriptionCancel {
                    subscription_id: "sub_123".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(!session.url.is_empty());
    }

    #[test]
    fn test_flow_type_strings() {
        assert_eq!(
            PortalFlow::PaymentMethodUpdate.flow_type(),
            "payment_method_update"
        );
        assert_eq!(
            PortalFlow::SubscriptionCancel {
                subscription_id: "sub_1".to_string()
            }
            .flow_type(),
            "subscription_cancel"
        );
    }
}
