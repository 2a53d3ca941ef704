//! Customer management for Stripe billing.
//!
//! Creates Stripe customers and links them to accounts.

use async_trait::async_trait;

use super::storage::BillingStore;
use crate::account::AccountIdentity;
use crate::error::Result;

/// Customer management operations.
pub struct CustomerManager<S: BillingStore, C: StripeClient> {
    store: S,
    client: C,
}

impl<S: BillingStore, C: StripeClient> CustomerManager<S, C> {
    #[must_use]
    pub fn new(store: S, client: C) -> Self {
        Self { store, client }
    }

    /// Get the Stripe customer ID for an account, creating one if needed.
    pub async fn get_or_create_customer(&self, account: &impl AccountIdentity) -> Result<String> {
        if let Some(customer_id) = self
            .store
            .get_stripe_customer_id(account.account_id())
            .await?
        {
            return Ok(customer_id);
        }

        let customer_id = self
            .client
            .create_customer(CreateCustomerRequest {
                email: account.email().to_string(),
                name: account.display_name().map(String::from),
                metadata: CustomerMetadata {
                    account_id: account.account_id().to_string(),
                    email: account.email().to_string(),
                },
            })
            .await?;

        self.store
            .set_stripe_customer_id(account.account_id(), account.email(), &customer_id)
            .await?;

        Ok(customer_id)
    }

    /// Get the Stripe customer ID without creating one.
    pub async fn get_customer_id(&self, account_id: &str) -> Result<Option<String>> {
        self.store.get_stripe_customer_id(account_id).await
    }

    /// Delete the Stripe customer for an account, if one is linked.
    ///
    /// Used during account deletion; the store record removal is left to the
    /// store implementation's cascade.
    pub async fn delete_customer(&self, account_id: &str) -> Result<()> {
        if let Some(customer_id) = self.store.get_stripe_customer_id(account_id).await? {
            self.client.delete_customer(&customer_id).await?;
        }
        Ok(())
    }
}

/// Request to create a Stripe customer.
#[derive(Debug, Clone)]
pub struct CreateCustomerRequest {
    pub email: String,
    pub name: Option<String>,
    pub metadata: CustomerMetadata,
}

/// Metadata attached to Stripe customers so webhooks can find the account.
#[derive(Debug, Clone)]
pub struct CustomerMetadata {
    pub account_id: String,
    pub email: String,
}

/// Trait for Stripe customer operations.
#[async_trait]
pub trait StripeClient: Send + Sync {
    /// Create a new customer in Stripe, returning its ID.
    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String>;

    /// Delete a customer from Stripe.
    async fn delete_customer(&self, customer_id: &str) -> Result<()>;
}

/// Mock Stripe customer client for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, RwLock};

    /// Mock customer client.
    #[derive(Default, Clone)]
    pub struct MockStripeClient {
        counter: Arc<AtomicU64>,
        customers: Arc<RwLock<HashMap<String, String>>>,
    }

    impl MockStripeClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Created customers as (customer_id, email) pairs.
        pub fn customers(&self) -> Vec<(String, String)> {
            self.customers
                .read()
                .unwrap()
                .iter()
                .map(|(id, email)| (id.clone(), email.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl StripeClient for MockStripeClient {
        async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String> {
            let id = format!("cus_test_{}", self.counter.fetch_add(1, Ordering::SeqCst));
            self.customers
                .write()
                .unwrap()
                .insert(id.clone(), request.email);
            Ok(id)
        }

        async fn delete_customer(&self, customer_id: &str) -> Result<()> {
            self.customers.write().unwrap().remove(customer_id);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::MockStripeClient;
    use super::*;
    use crate::account::AccountRef;
    use crate::billing::storage::test::InMemoryBillingStore;

    #[tokio::test]
    async fn test_get_or_create_creates_once() {
        let store = InMemoryBillingStore::new();
        let client = MockStripeClient::new();
        let manager = CustomerManager::new(store, client.clone());

        let account = AccountRef::new("user-1", "dana@example.com");

        let first = manager.get_or_create_customer(&account).await.unwrap();
        let second = manager.get_or_create_customer(&account).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.customers().len(), 1);
    }

    #[tokio::test]
    async fn test_get_customer_id_without_create() {
        let store = InMemoryBillingStore::new();
        let client = MockStripeClient::new();
        let manager = CustomerManager::new(store, client);

        assert!(manager.get_customer_id("user-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_customer() {
        let store = InMemoryBillingStore::new();
        let client = MockStripeClient::new();
        let manager = CustomerManager::new(store, client.clone());

        let account = AccountRef::new("user-1", "dana@example.com");
        manager.get_or_create_customer(&account).await.unwrap();
        assert_eq!(client.customers().len(), 1);

        manager.delete_customer("user-1").await.unwrap();
        assert!(client.customers().is_empty());

        // Deleting with no linked customer is a no-op.
        manager.delete_customer("user-2").await.unwrap();
    }
}
