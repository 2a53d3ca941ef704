use axum::{extract::FromRequestParts, http::request::Parts};
use std::future::Future;

use crate::auth::{provider::AuthProvider, token::TokenExtractor};
use crate::error::LockgateError;

/// Axum extractor for authenticated users.
///
/// Rejects the request with 401 when the token is missing or invalid. The
/// provider must be inserted into the router via `Extension`.
pub struct AuthUser<P: AuthProvider>(pub P::User);

impl<P, S> FromRequestParts<S> for AuthUser<P>
where
    P: AuthProvider,
    S: Send + Sync,
{
    type Rejection = LockgateError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        Box::pin(async move {
            let provider = parts
                .extensions
                .get::<P>()
                .ok_or_else(|| {
                    LockgateError::internal("Auth provider not found in request extensions")
                })?
                .clone();

            let token = TokenExtractor::from_header(parts)?;
            let claims = provider.verify_token(&token).await?;
            let user = provider.load_user(&claims).await?;
            provider.validate_user(&user).await?;

            Ok(AuthUser(user))
        })
    }
}

/// Axum extractor for optional authentication.
///
/// Yields `Some(user)` when a valid token is present, `None` otherwise;
/// never rejects.
pub struct OptionalAuth<P: AuthProvider>(pub Option<P::User>);

impl<P, S> FromRequestParts<S> for OptionalAuth<P>
where
    P: AuthProvider,
    S: Send + Sync,
{
    type Rejection = LockgateError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        Box::pin(async move {
            let provider = match parts.extensions.get::<P>() {
                Some(p) => p.clone(),
                None => return Ok(OptionalAuth(None)),
            };

            let token = match TokenExtractor::from_header(parts) {
                Ok(t) => t,
                Err(_) => return Ok(OptionalAuth(None)),
            };

            match provider.verify_token(&token).await {
                Ok(claims) => match provider.load_user(&claims).await {
                    Ok(user) => {
                        if provider.validate_user(&user).await.is_ok() {
                            Ok(OptionalAuth(Some(user)))
                        } else {
                            Ok(OptionalAuth(None))
                        }
                    }
                    Err(_) => Ok(OptionalAuth(None)),
                },
                Err(_) => Ok(OptionalAuth(None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountRef;
    use crate::auth::provider::test::StaticTokenProvider;
    use axum::http::Request;

    fn provider() -> StaticTokenProvider {
        StaticTokenProvider::new("good-token", AccountRef::new("user-1", "dana@example.com"))
    }

    fn parts(token: Option<&str>) -> Parts {
        let mut builder = Request::builder();
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let mut parts = builder.body(()).unwrap().into_parts().0;
        parts.extensions.insert(provider());
        parts
    }

    #[tokio::test]
    async fn test_auth_user_accepts_valid_token() {
        let mut parts = parts(Some("good-token"));
        let AuthUser(user) =
            AuthUser::<StaticTokenProvider>::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.id, "user-1");
    }

    #[tokio::test]
    async fn test_auth_user_rejects_bad_token() {
        let mut parts = parts(Some("bad-token"));
        let result = AuthUser::<StaticTokenProvider>::from_request_parts(&mut parts, &()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_auth_user_rejects_missing_token() {
        let mut parts = parts(None);
        let result = AuthUser::<StaticTokenProvider>::from_request_parts(&mut parts, &()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_optional_auth_yields_none_without_token() {
        let mut parts = parts(None);
        let OptionalAuth(user) =
            OptionalAuth::<StaticTokenProvider>::from_request_parts(&mut parts, &())
                .await
                .unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn test_optional_auth_yields_user_with_token() {
        let mut parts = parts(Some("good-token"));
        let OptionalAuth(user) =
            OptionalAuth::<StaticTokenProvider>::from_request_parts(&mut parts, &())
                .await
                .unwrap();
        assert_eq!(user.unwrap().id, "user-1");
    }
}
