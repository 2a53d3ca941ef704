//! Billing-specific error types.
//!
//! Granular errors for billing operations, converted to [`LockgateError`]
//! for HTTP responses.

use std::fmt;

/// Billing-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    /// No subscription found for the account.
    NoSubscription { account_id: String },
    /// The subscription is not scheduled for cancellation, so there is
    /// nothing to reactivate.
    SubscriptionNotCancelling { account_id: String },
    /// No Stripe customer linked to the account.
    NoCustomer { account_id: String },
    /// No price available for checkout (none requested, none configured).
    NoPriceConfigured,

    /// Webhook signature is invalid.
    InvalidWebhookSignature,
    /// Webhook timestamp is too old (replay protection).
    WebhookTimestampExpired { age_seconds: i64 },
    /// Webhook event data is malformed.
    InvalidWebhookPayload { message: String },

    /// Stripe API returned an error.
    StripeApiError {
        operation: String,
        message: String,
        code: Option<String>,
        http_status: Option<u16>,
    },

    /// An unexpected internal error occurred.
    Internal { message: String },
}

impl fmt::Display for BillingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSubscription { account_id } => {
                write!(f, "No subscription found for '{}'", account_id)
            }
            Self::SubscriptionNotCancelling { account_id } => {
                write!(
                    f,
                    "Subscription for '{}' is not scheduled for cancellation",
                    account_id
                )
            }
            Self::NoCustomer { account_id } => {
                write!(f, "No Stripe customer found for '{}'", account_id)
            }
            Self::NoPriceConfigured => {
                write!(f, "No price requested and no default price configured")
            }
            Self::InvalidWebhookSignature => write!(f, "Invalid webhook signature"),
            Self::WebhookTimestampExpired { age_seconds } => {
                write!(f, "Webhook timestamp expired ({} seconds old)", age_seconds)
            }
            Self::InvalidWebhookPayload { message } => {
                write!(f, "Invalid webhook payload: {}", message)
            }
            Self::StripeApiError {
                operation,
                message,
                code,
                http_status,
            } => {
                write!(f, "Stripe API error during '{}': {}", operation, message)?;
                if let Some(code) = code {
                    write!(f, " (code: {})", code)?;
                }
                if let Some(status) = http_status {
                    write!(f, " [HTTP {}]", status)?;
                }
                Ok(())
            }
            Self::Internal { message } => write!(f, "Internal billing error: {}", message),
        }
    }
}

impl std::error::Error for BillingError {}

impl From<BillingError> for crate::error::LockgateError {
    fn from(err: BillingError) -> Self {
        match &err {
            BillingError::NoSubscription { .. } | BillingError::NoCustomer { .. } => {
                crate::error::LockgateError::NotFound(err.to_string())
            }

            BillingError::SubscriptionNotCancelling { .. }
            | BillingError::NoPriceConfigured
            | BillingError::InvalidWebhookSignature
            | BillingError::WebhookTimestampExpired { .. }
            | BillingError::InvalidWebhookPayload { .. } => {
                crate::error::LockgateError::BadRequest(err.to_string())
            }

            BillingError::Internal { .. } => {
                crate::error::LockgateError::Internal(err.to_string())
            }

            BillingError::StripeApiError { http_status, .. } => match http_status {
                Some(400..=499) => crate::error::LockgateError::BadRequest(err.to_string()),
                _ => crate::error::LockgateError::Internal(err.to_string()),
            },
        }
    }
}

impl BillingError {
    /// Whether the error is worth retrying (rate limit or upstream 5xx).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StripeApiError { http_status, .. } => {
                matches!(http_status, Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }
}
