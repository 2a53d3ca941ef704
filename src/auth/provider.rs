use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::account::AccountIdentity;
use crate::error::Result;

/// Trait for authentication providers.
///
/// Implement this to plug in any bearer-token auth platform (Supabase,
/// Auth0, Clerk, custom JWT). The user type must expose an account identity
/// so handlers can key billing and trial state off it.
#[async_trait]
pub trait AuthProvider: Send + Sync + Clone + 'static {
    /// The verified token claims.
    type Claims: DeserializeOwned + Send + Sync;

    /// The authenticated user handed to handlers.
    type User: AccountIdentity + Send + Sync + Clone;

    /// Verify a bearer token and return the claims.
    async fn verify_token(&self, token: &str) -> Result<Self::Claims>;

    /// Load the user object from claims.
    async fn load_user(&self, claims: &Self::Claims) -> Result<Self::User>;

    /// Optional extra validation after loading (banned users, etc).
    async fn validate_user(&self, _user: &Self::User) -> Result<()> {
        Ok(())
    }
}

/// Static-token provider for tests.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use crate::account::AccountRef;
    use crate::error::LockgateError;

    /// Auth provider that accepts exactly one token and returns a fixed user.
    #[derive(Clone)]
    pub struct StaticTokenProvider {
        token: String,
        user: AccountRef,
    }

    impl StaticTokenProvider {
        #[must_use]
        pub fn new(token: impl Into<String>, user: AccountRef) -> Self {
            Self {
                token: token.into(),
                user,
            }
        }
    }

    #[async_trait]
    impl AuthProvider for StaticTokenProvider {
        type Claims = AccountRef;
        type User = AccountRef;

        async fn verify_token(&self, token: &str) -> Result<Self::Claims> {
            if token == self.token {
                Ok(self.user.clone())
            } else {
                Err(LockgateError::unauthorized("Invalid token"))
            }
        }

        async fn load_user(&self, claims: &Self::Claims) -> Result<Self::User> {
            Ok(claims.clone())
        }
    }
}
