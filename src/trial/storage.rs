//! Storage trait for trial records and the deleted-email registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::access::{TrialSnapshot, TrialStatus};
use crate::error::Result;

/// Trait for storing trial state.
///
/// The deleted-email registry backs the returning-user flag: once an email
/// lands there, it stays. Implement against your database; an in-memory
/// implementation is provided for tests.
#[async_trait]
pub trait TrialStore: Send + Sync {
    /// Get the trial record for an account.
    async fn get_trial(&self, account_id: &str) -> Result<Option<TrialRecord>>;

    /// Save or update a trial record.
    async fn save_trial(&self, record: &TrialRecord) -> Result<()>;

    /// Delete a trial record.
    async fn delete_trial(&self, account_id: &str) -> Result<()>;

    /// Record that an account with this email was deleted.
    async fn record_deleted_email(&self, email: &str) -> Result<()>;

    /// Whether any prior account with this email was deleted.
    async fn was_email_deleted(&self, email: &str) -> Result<bool>;
}

/// A trial record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrialRecord {
    pub account_id: String,
    pub email: String,
    pub status: TrialStatus,
    /// When the trial started (Unix timestamp).
    pub started_at: u64,
    /// When the trial ends (Unix timestamp).
    pub trial_end: u64,
    /// Last modification timestamp.
    pub updated_at: u64,
}

impl TrialRecord {
    /// Whole days of trial left at `now`, rounded up so a trial keeps
    /// granting access through its final partial day.
    #[must_use]
    pub fn days_remaining(&self, now: u64) -> u32 {
        if now >= self.trial_end {
            return 0;
        }
        ((self.trial_end - now).div_ceil(86400)) as u32
    }

    /// The status as of `now`.
    ///
    /// `Active` past the end date reads as `Expired` without requiring a
    /// prior write; expiry is clock-driven and one-directional.
    #[must_use]
    pub fn effective_status(&self, now: u64) -> TrialStatus {
        if self.status == TrialStatus::Active && now >= self.trial_end {
            TrialStatus::Expired
        } else {
            self.status
        }
    }

    /// Reduce the record to the evaluator's input.
    #[must_use]
    pub fn access_snapshot(&self, now: u64) -> TrialSnapshot {
        TrialSnapshot {
            status: self.effective_status(now),
            days_remaining: self.days_remaining(now),
        }
    }
}

/// In-memory trial store for tests.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, RwLock};

    /// In-memory trial store. Emails are compared case-insensitively, the
    /// way the registry column is collated in production.
    #[derive(Default, Clone)]
    pub struct InMemoryTrialStore {
        inner: Arc<InMemoryTrialStoreInner>,
    }

    #[derive(Default)]
    struct InMemoryTrialStoreInner {
        trials: RwLock<HashMap<String, TrialRecord>>,
        deleted_emails: RwLock<HashSet<String>>,
    }

    impl InMemoryTrialStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn normalize(email: &str) -> String {
        email.trim().to_ascii_lowercase()
    }

    #[async_trait]
    impl TrialStore for InMemoryTrialStore {
        async fn get_trial(&self, account_id: &str) -> Result<Option<TrialRecord>> {
            Ok(self.inner.trials.read().unwrap().get(account_id).cloned())
        }

        async fn save_trial(&self, record: &TrialRecord) -> Result<()> {
            self.inner
                .trials
                .write()
                .unwrap()
                .insert(record.account_id.clone(), record.clone());
            Ok(())
        }

        async fn delete_trial(&self, account_id: &str) -> Result<()> {
            self.inner.trials.write().unwrap().remove(account_id);
            Ok(())
        }

        async fn record_deleted_email(&self, email: &str) -> Result<()> {
            self.inner
                .deleted_emails
                .write()
                .unwrap()
                .insert(normalize(email));
            Ok(())
        }

        async fn was_email_deleted(&self, email: &str) -> Result<bool> {
            Ok(self
                .inner
                .deleted_emails
                .read()
                .unwrap()
                .contains(&normalize(email)))
        }
    }
}
