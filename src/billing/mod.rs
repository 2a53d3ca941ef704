//! Billing module for Stripe-based subscriptions.
//!
//! Mirrors subscription state from Stripe into local storage, creates
//! checkout and customer-portal sessions, and processes webhooks. Managers
//! are generic over a [`BillingStore`] and the Stripe client traits; mock
//! clients live beside each trait for tests, and [`LiveStripeClient`] is the
//! production implementation.

pub mod checkout;
pub mod customer;
pub mod error;
pub mod live_client;
pub mod portal;
pub mod storage;
pub mod subscription;
pub mod webhook;

pub use checkout::{
    CheckoutConfig, CheckoutManager, CheckoutSession, CreateCheckoutSessionRequest,
    StripeCheckoutClient,
};
pub use customer::{CreateCustomerRequest, CustomerManager, CustomerMetadata, StripeClient};
pub use error::BillingError;
pub use live_client::{InvalidApiKeyError, LiveStripeClient, LiveStripeClientConfig};
pub use portal::{
    CreatePortalSessionRequest, PortalConfig, PortalFlow, PortalManager, PortalSession,
    StripePortalClient,
};
pub use storage::{BillingStore, StoredSubscription, SubscriptionStatus};
pub use subscription::{
    StripeSubscriptionClient, StripeSubscriptionData, SubscriptionManager, SubscriptionMetadata,
};
pub use webhook::{WebhookEvent, WebhookEventData, WebhookHandler, WebhookOutcome};

#[cfg(any(test, feature = "test-support"))]
pub use checkout::test::{MockFullStripeClient, MockStripeCheckoutClient};
#[cfg(any(test, feature = "test-support"))]
pub use customer::test::MockStripeClient;
#[cfg(any(test, feature = "test-support"))]
pub use portal::test::MockStripePortalClient;
#[cfg(any(test, feature = "test-support"))]
pub use storage::test::InMemoryBillingStore;
#[cfg(any(test, feature = "test-support"))]
pub use subscription::test::MockStripeSubscriptionClient;

/// A Stripe client that supports every billing operation Lockgate performs.
///
/// Blanket-implemented for any type that implements the four client traits;
/// [`LiveStripeClient`] is one such type.
pub trait FullStripeClient:
    StripeClient + StripeCheckoutClient + StripeSubscriptionClient + StripePortalClient
{
}

impl<T> FullStripeClient for T where
    T: StripeClient + StripeCheckoutClient + StripeSubscriptionClient + StripePortalClient
{
}
