//! Tool workspace account provisioning.
//!
//! The third-party tool vendor owns its accounts; Lockgate creates them,
//! flips them active or inactive to match the access verdict, and checks
//! credentials against the vendor's login endpoint. Everything is gated on
//! the verdict computed by [`crate::access::evaluate`]; no code here decides
//! access on its own.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::access::AccessVerdict;
use crate::account::AccountIdentity;
use crate::error::{LockgateError, Result};

/// A tool workspace account as the vendor reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAccount {
    pub id: String,
    pub email: String,
    pub active: bool,
}

/// Request to create a tool account.
#[derive(Debug, Clone, Serialize)]
pub struct CreateToolAccountRequest {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub password: String,
}

/// Outcome of a tool-account sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSyncOutcome {
    /// The vendor account was switched on.
    Activated,
    /// The vendor account was switched off.
    Deactivated,
    /// The vendor account already matched the verdict.
    InSync,
    /// No vendor account exists for this email.
    Missing,
}

/// Trait for the tool vendor's account API.
#[async_trait]
pub trait ToolAccountClient: Send + Sync {
    /// Create a workspace account.
    async fn create_account(&self, request: CreateToolAccountRequest) -> Result<ToolAccount>;

    /// Look up an account by email.
    async fn find_account(&self, email: &str) -> Result<Option<ToolAccount>>;

    /// Activate or deactivate an account.
    async fn set_active(&self, email: &str, active: bool) -> Result<()>;

    /// Check credentials against the vendor's login endpoint.
    async fn verify_login(&self, email: &str, password: &str) -> Result<bool>;
}

/// Tool-account operations, gated on the access verdict.
pub struct ToolAccountManager<C: ToolAccountClient> {
    client: C,
}

impl<C: ToolAccountClient> ToolAccountManager<C> {
    #[must_use]
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Provision a tool account for an account with qualifying access.
    ///
    /// Refused outright when the verdict blocks tool-account creation. An
    /// existing inactive account is reactivated instead of duplicated.
    pub async fn ensure_account(
        &self,
        account: &impl AccountIdentity,
        verdict: &AccessVerdict,
        password: &str,
    ) -> Result<ToolAccount> {
        if !verdict.can_create_tool_account {
            return Err(LockgateError::forbidden(
                "Account is not eligible for a tool workspace",
            ));
        }

        if let Some(mut existing) = self.client.find_account(account.email()).await? {
            if !existing.active {
                self.client.set_active(account.email(), true).await?;
                existing.active = true;
            }
            return Ok(existing);
        }

        let created = self
            .client
            .create_account(CreateToolAccountRequest {
                email: account.email().to_string(),
                username: account.display_name().map(String::from),
                password: password.to_string(),
            })
            .await?;

        tracing::info!(account_id = %account.account_id(), "Tool workspace account created");
        Ok(created)
    }

    /// Align the vendor account's active flag with the verdict.
    pub async fn sync(
        &self,
        account: &impl AccountIdentity,
        verdict: &AccessVerdict,
    ) -> Result<ToolSyncOutcome> {
        let Some(existing) = self.client.find_account(account.email()).await? else {
            return Ok(ToolSyncOutcome::Missing);
        };

        if existing.active == verdict.has_access {
            return Ok(ToolSyncOutcome::InSync);
        }

        self.client
            .set_active(account.email(), verdict.has_access)
            .await?;

        let outcome = if verdict.has_access {
            ToolSyncOutcome::Activated
        } else {
            ToolSyncOutcome::Deactivated
        };
        tracing::info!(
            account_id = %account.account_id(),
            outcome = ?outcome,
            "Tool workspace account synced"
        );
        Ok(outcome)
    }

    /// Check credentials against the vendor's login endpoint.
    pub async fn verify_login(&self, email: &str, password: &str) -> Result<bool> {
        self.client.verify_login(email, password).await
    }
}

/// Configuration for the live tool-vendor client.
#[derive(Debug, Clone)]
pub struct LiveToolClientConfig {
    /// Maximum retry attempts for 5xx responses.
    pub max_retries: u32,
    /// Base delay for backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for LiveToolClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            timeout_seconds: 15,
        }
    }
}

/// Production client for the tool vendor's HTTP API.
///
/// Authenticates with a service key held in a [`SecretString`]; retries 5xx
/// responses with the same bounded-backoff discipline as the Stripe client.
#[derive(Clone)]
pub struct LiveToolClient {
    http: reqwest::Client,
    base_url: String,
    service_key: SecretString,
    config: LiveToolClientConfig,
}

#[derive(Debug, Deserialize)]
struct ToolUserPayload {
    id: String,
    email: String,
    active: bool,
}

impl From<ToolUserPayload> for ToolAccount {
    fn from(payload: ToolUserPayload) -> Self {
        Self {
            id: payload.id,
            email: payload.email,
            active: payload.active,
        }
    }
}

impl LiveToolClient {
    /// Create a client against the vendor API at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<SecretString>,
        config: LiveToolClientConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LockgateError::internal(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, retrying 5xx responses.
    async fn send_with_retry<F>(&self, operation: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempts = 0;
        loop {
            let response = build()
                .bearer_auth(self.service_key.expose_secret())
                .send()
                .await?;

            if response.status().is_server_error() && attempts < self.config.max_retries {
                let delay = Duration::from_millis(
                    self.config
                        .base_delay_ms
                        .saturating_mul(2_u64.saturating_pow(attempts)),
                );
                tracing::warn!(
                    operation = operation,
                    status = response.status().as_u16(),
                    attempt = attempts + 1,
                    "Tool API returned server error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempts += 1;
                continue;
            }

            return Ok(response);
        }
    }
}

impl std::fmt::Debug for LiveToolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveToolClient")
            .field("base_url", &self.base_url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolAccountClient for LiveToolClient {
    async fn create_account(&self, request: CreateToolAccountRequest) -> Result<ToolAccount> {
        let response = self
            .send_with_retry("create_account", || {
                self.http.post(self.url("/api/v1/users")).json(&request)
            })
            .await?;

        let response = response.error_for_status()?;
        let payload: ToolUserPayload = response.json().await?;
        Ok(payload.into())
    }

    async fn find_account(&self, email: &str) -> Result<Option<ToolAccount>> {
        let response = self
            .send_with_retry("find_account", || {
                self.http
                    .get(self.url("/api/v1/users/by-email"))
                    .query(&[("email", email)])
            })
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response.error_for_status()?;
        let payload: ToolUserPayload = response.json().await?;
        Ok(Some(payload.into()))
    }

    async fn set_active(&self, email: &str, active: bool) -> Result<()> {
        let body = serde_json::json!({ "email": email, "active": active });
        let response = self
            .send_with_retry("set_active", || {
                self.http
                    .patch(self.url("/api/v1/users/active"))
                    .json(&body)
            })
            .await?;

        response.error_for_status()?;
        Ok(())
    }

    async fn verify_login(&self, email: &str, password: &str) -> Result<bool> {
        let body = serde_json::json!({ "email": email, "password": password });
        let response = self
            .send_with_retry("verify_login", || {
                self.http.post(self.url("/api/v1/login")).json(&body)
            })
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => Ok(false),
            _ => {
                response.error_for_status()?;
                Ok(false)
            }
        }
    }
}

/// Mock tool-vendor client for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, RwLock};

    /// In-memory tool-vendor client.
    #[derive(Default, Clone)]
    pub struct MockToolClient {
        counter: Arc<AtomicU64>,
        accounts: Arc<RwLock<HashMap<String, ToolAccount>>>,
        passwords: Arc<RwLock<HashMap<String, String>>>,
    }

    impl MockToolClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All vendor accounts, for assertions.
        pub fn accounts(&self) -> Vec<ToolAccount> {
            self.accounts.read().unwrap().values().cloned().collect()
        }
    }

    #[async_trait]
    impl ToolAccountClient for MockToolClient {
        async fn create_account(&self, request: CreateToolAccountRequest) -> Result<ToolAccount> {
            let account = ToolAccount {
                id: format!("tool_{}", self.counter.fetch_add(1, Ordering::SeqCst)),
                email: request.email.clone(),
                active: true,
            };
            self.accounts
                .write()
                .unwrap()
                .insert(request.email.clone(), account.clone());
            self.passwords
                .write()
                .unwrap()
                .insert(request.email, request.password);
            Ok(account)
        }

        async fn find_account(&self, email: &str) -> Result<Option<ToolAccount>> {
            Ok(self.accounts.read().unwrap().get(email).cloned())
        }

        async fn set_active(&self, email: &str, active: bool) -> Result<()> {
            let mut accounts = self.accounts.write().unwrap();
            let account = accounts.get_mut(email).ok_or_else(|| {
                LockgateError::not_found(format!("Tool account not found: {}", email))
            })?;
            account.active = active;
            Ok(())
        }

        async fn verify_login(&self, email: &str, password: &str) -> Result<bool> {
            let accounts = self.accounts.read().unwrap();
            let passwords = self.passwords.read().unwrap();
            Ok(accounts.get(email).map(|a| a.active).unwrap_or(false)
                && passwords.get(email).map(String::as_str) == Some(password))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::MockToolClient;
    use super::*;
    use crate::access::evaluate;
    use crate::access::{SubscriptionSnapshot, SubscriptionStanding};
    use crate::account::AccountRef;

    fn account() -> AccountRef {
        AccountRef::new("user-1", "dana@example.com")
    }

    fn paid_verdict() -> AccessVerdict {
        let sub = SubscriptionSnapshot::new(SubscriptionStanding::Active);
        evaluate(Some(&sub), None, false)
    }

    fn denied_verdict() -> AccessVerdict {
        evaluate(None, None, false)
    }

    #[tokio::test]
    async fn test_ensure_account_requires_eligibility() {
        let client = MockToolClient::new();
        let manager = ToolAccountManager::new(client.clone());

        let result = manager
            .ensure_account(&account(), &denied_verdict(), "hunter2")
            .await;
        assert!(matches!(result, Err(LockgateError::Forbidden(_))));
        assert!(client.accounts().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_account_creates_once() {
        let client = MockToolClient::new();
        let manager = ToolAccountManager::new(client.clone());

        let first = manager
            .ensure_account(&account(), &paid_verdict(), "hunter2")
            .await
            .unwrap();
        assert!(first.active);

        let second = manager
            .ensure_account(&account(), &paid_verdict(), "hunter2")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(client.accounts().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_account_reactivates_inactive() {
        let client = MockToolClient::new();
        let manager = ToolAccountManager::new(client.clone());

        manager
            .ensure_account(&account(), &paid_verdict(), "hunter2")
            .await
            .unwrap();
        client.set_active("dana@example.com", false).await.unwrap();

        let revived = manager
            .ensure_account(&account(), &paid_verdict(), "hunter2")
            .await
            .unwrap();
        assert!(revived.active);
    }

    #[tokio::test]
    async fn test_sync_deactivates_on_lost_access() {
        let client = MockToolClient::new();
        let manager = ToolAccountManager::new(client.clone());

        manager
            .ensure_account(&account(), &paid_verdict(), "hunter2")
            .await
            .unwrap();

        let outcome = manager.sync(&account(), &denied_verdict()).await.unwrap();
        assert_eq!(outcome, ToolSyncOutcome::Deactivated);
        assert!(!client.accounts()[0].active);

        // Sync again: nothing to change.
        let outcome = manager.sync(&account(), &denied_verdict()).await.unwrap();
        assert_eq!(outcome, ToolSyncOutcome::InSync);

        // Access restored: reactivate.
        let outcome = manager.sync(&account(), &paid_verdict()).await.unwrap();
        assert_eq!(outcome, ToolSyncOutcome::Activated);
    }

    #[tokio::test]
    async fn test_sync_reports_missing_account() {
        let client = MockToolClient::new();
        let manager = ToolAccountManager::new(client);

        let outcome = manager.sync(&account(), &paid_verdict()).await.unwrap();
        assert_eq!(outcome, ToolSyncOutcome::Missing);
    }

    #[tokio::test]
    async fn test_verify_login() {
        let client = MockToolClient::new();
        let manager = ToolAccountManager::new(client);

        manager
            .ensure_account(&account(), &paid_verdict(), "hunter2")
            .await
            .unwrap();

        assert!(manager
            .verify_login("dana@example.com", "hunter2")
            .await
            .unwrap());
        assert!(!manager
            .verify_login("dana@example.com", "wrong")
            .await
            .unwrap());
        assert!(!manager
            .verify_login("nobody@example.com", "hunter2")
            .await
            .unwrap());
    }

    #[test]
    fn test_live_client_strips_trailing_slash() {
        let client = LiveToolClient::new(
            "https://tool.example.com/",
            "service-key-123".to_string(),
            LiveToolClientConfig::default(),
        )
        .unwrap();
        assert_eq!(
            client.url("/api/v1/login"),
            "https://tool.example.com/api/v1/login"
        );
    }

    #[test]
    fn test_live_client_debug_hides_key() {
        let client = LiveToolClient::new(
            "https://tool.example.com",
            "service-key-123".to_string(),
            LiveToolClientConfig::default(),
        )
        .unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("service-key-123"));
    }
}
