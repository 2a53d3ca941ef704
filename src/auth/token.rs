use axum::http::request::Parts;

use crate::error::LockgateError;

/// Extracts bearer tokens from request headers.
pub struct TokenExtractor;

impl TokenExtractor {
    /// Extract the token from the `Authorization` header.
    pub fn from_header(parts: &Parts) -> Result<String, LockgateError> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| LockgateError::unauthorized("Missing authorization header"))?;

        if !auth_header.starts_with("Bearer ") {
            return Err(LockgateError::unauthorized(
                "Invalid authorization header format. Expected: Bearer <token>",
            ));
        }

        let token = auth_header.trim_start_matches("Bearer ").to_string();

        if token.is_empty() {
            return Err(LockgateError::unauthorized("Empty bearer token"));
        }

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_header(value: &str) -> Parts {
        let req = Request::builder()
            .header("authorization", value)
            .body(())
            .unwrap();
        req.into_parts().0
    }

    #[test]
    fn test_extract_valid_bearer_token() {
        let parts = parts_with_header("Bearer token_123");
        assert_eq!(TokenExtractor::from_header(&parts).unwrap(), "token_123");
    }

    #[test]
    fn test_missing_header_rejected() {
        let req = Request::builder().body(()).unwrap();
        let (parts, _) = req.into_parts();
        assert!(TokenExtractor::from_header(&parts).is_err());
    }

    #[test]
    fn test_non_bearer_scheme_rejected() {
        let parts = parts_with_header("Basic dXNlcjpwYXNz");
        assert!(TokenExtractor::from_header(&parts).is_err());
    }

    #[test]
    fn test_empty_token_rejected() {
        let parts = parts_with_header("Bearer ");
        assert!(TokenExtractor::from_header(&parts).is_err());
    }
}
