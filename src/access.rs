//! The access decision evaluator.
//!
//! Merges a subscription snapshot, a trial snapshot, and the returning-user
//! flag into a single [`AccessVerdict`]. This is the one place access is
//! decided; handlers build the snapshots and consume the verdict, never
//! re-deriving access from raw records.
//!
//! The evaluator is a pure function: no storage, no clock, no side effects.
//! Whatever time sensitivity exists (trial days remaining) is baked into the
//! snapshot by the caller.

use serde::{Deserialize, Serialize};

/// Subscription standing as the evaluator sees it.
///
/// This is the evaluator's vocabulary, narrower than the full set of states
/// the billing mirror tracks. Statuses that grant nothing (past due, unpaid,
/// incomplete) map to `None` before they reach the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStanding {
    /// Paid and current.
    Active,
    /// In a Stripe-managed trial period.
    Trialing,
    /// Canceled and out of its paid period.
    Canceled,
    /// No qualifying subscription.
    None,
}

impl SubscriptionStanding {
    /// Parse a raw status string. Unrecognized values grant nothing.
    #[must_use]
    pub fn from_str(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::None,
        }
    }
}

/// Trial lifecycle status.
///
/// Transitions are one-directional: `Active` can become `Expired`,
/// `ConvertedToPaid`, or `ScheduledForDeletion`, and none of those ever go
/// back to `Active` without a new subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Trial is running.
    Active,
    /// Trial ran out without converting.
    Expired,
    /// Account cancellation queued the trial data for deletion.
    ScheduledForDeletion,
    /// Account without a qualifying trial.
    Standard,
    /// Trial ended because a paid subscription took over.
    ConvertedToPaid,
}

impl TrialStatus {
    /// Parse a raw status string. Unrecognized values grant nothing.
    #[must_use]
    pub fn from_str(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "expired" => Self::Expired,
            "scheduled_for_deletion" => Self::ScheduledForDeletion,
            "converted_to_paid" => Self::ConvertedToPaid,
            _ => Self::Standard,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::ScheduledForDeletion => "scheduled_for_deletion",
            Self::Standard => "standard",
            Self::ConvertedToPaid => "converted_to_paid",
        }
    }
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription input to the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub standing: SubscriptionStanding,
    /// Whether the subscription is scheduled to cancel at period end.
    pub cancel_at_period_end: bool,
    /// End of the current billing period (Unix timestamp).
    pub current_period_end: u64,
}

impl SubscriptionSnapshot {
    #[must_use]
    pub fn new(standing: SubscriptionStanding) -> Self {
        Self {
            standing,
            cancel_at_period_end: false,
            current_period_end: 0,
        }
    }
}

/// Trial input to the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialSnapshot {
    pub status: TrialStatus,
    /// Whole days of trial left, rounded up; 0 once the end date has passed.
    pub days_remaining: u32,
}

impl TrialSnapshot {
    #[must_use]
    pub fn new(status: TrialStatus, days_remaining: u32) -> Self {
        Self {
            status,
            days_remaining,
        }
    }
}

/// What kind of access the verdict grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    PaidSubscription,
    StripeTrial,
    FreeTrial,
    NoAccess,
}

/// How strongly the verdict should be enforced downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionLevel {
    /// Backed by a paid subscription.
    Protected,
    /// Backed by a running trial.
    Trial,
    /// Access exhausted; re-granting a trial is blocked.
    Expired,
    /// Nothing known about this account.
    None,
}

/// The normalized access verdict. Recomputed on every request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct AccessVerdict {
    pub has_access: bool,
    pub access_type: AccessType,
    pub can_create_tool_account: bool,
    pub protection_level: ProtectionLevel,
}

impl AccessVerdict {
    fn granted(access_type: AccessType, protection_level: ProtectionLevel) -> Self {
        Self {
            has_access: true,
            access_type,
            can_create_tool_account: true,
            protection_level,
        }
    }

    fn denied(protection_level: ProtectionLevel) -> Self {
        Self {
            has_access: false,
            access_type: AccessType::NoAccess,
            can_create_tool_account: false,
            protection_level,
        }
    }
}

/// Compute the access verdict for an account.
///
/// First matching rule wins:
///
/// 1. Active subscription, not cancelling: paid access.
/// 2. Active subscription, cancelling at period end: paid access runs until
///    the period ends; the tool account can still be created.
/// 3. Subscription in Stripe trial: full access.
/// 4. Application trial running, days left, and the email has no deleted
///    history: free-trial access.
/// 5. Returning user whose trial is expired or queued for deletion: locked
///    out, tool-account creation blocked.
/// 6. Anything else, including unrecognized input: no access.
///
/// Rule 4/5 ordering is the anti-abuse invariant: an email that already
/// burned its trial never gets another one; only a paid subscription
/// restores access.
pub fn evaluate(
    subscription: Option<&SubscriptionSnapshot>,
    trial: Option<&TrialSnapshot>,
    returning_user: bool,
) -> AccessVerdict {
    if let Some(sub) = subscription {
        match sub.standing {
            SubscriptionStanding::Active if !sub.cancel_at_period_end => {
                return AccessVerdict::granted(
                    AccessType::PaidSubscription,
                    ProtectionLevel::Protected,
                );
            }
            // Cancellation is scheduled but the paid period is still running.
            SubscriptionStanding::Active => {
                return AccessVerdict::granted(
                    AccessType::PaidSubscription,
                    ProtectionLevel::Protected,
                );
            }
            SubscriptionStanding::Trialing => {
                return AccessVerdict::granted(AccessType::StripeTrial, ProtectionLevel::Trial);
            }
            SubscriptionStanding::Canceled | SubscriptionStanding::None => {}
        }
    }

    if let Some(trial) = trial {
        if trial.status == TrialStatus::Active && trial.days_remaining > 0 && !returning_user {
            return AccessVerdict::granted(AccessType::FreeTrial, ProtectionLevel::Trial);
        }

        if returning_user
            && matches!(
                trial.status,
                TrialStatus::Expired | TrialStatus::ScheduledForDeletion
            )
        {
            return AccessVerdict::denied(ProtectionLevel::Expired);
        }
    }

    AccessVerdict::denied(ProtectionLevel::None)
}
