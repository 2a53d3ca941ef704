//! Trial lifecycle operations.

use super::storage::{TrialRecord, TrialStore};
use crate::access::{TrialSnapshot, TrialStatus};
use crate::account::AccountIdentity;
use crate::error::{LockgateError, Result};
use crate::utils::unix_timestamp;

/// Configuration for trial provisioning.
#[derive(Debug, Clone)]
pub struct TrialConfig {
    /// Trial length in days.
    pub duration_days: u32,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self { duration_days: 7 }
    }
}

impl TrialConfig {
    #[must_use]
    pub fn new(duration_days: u32) -> Self {
        Self { duration_days }
    }
}

/// Trial lifecycle manager.
///
/// All transitions are one-directional: once a trial leaves `Active` it
/// never returns, and once an email enters the deleted registry it stays.
pub struct TrialManager<S: TrialStore> {
    store: S,
    config: TrialConfig,
}

impl<S: TrialStore> TrialManager<S> {
    #[must_use]
    pub fn new(store: S, config: TrialConfig) -> Self {
        Self { store, config }
    }

    /// Start a free trial for an account.
    ///
    /// One trial per email: returning users (any prior account with this
    /// email was deleted) are refused, as is an account that already holds
    /// a trial record of any status.
    pub async fn start_trial(&self, account: &impl AccountIdentity) -> Result<TrialRecord> {
        if self.store.was_email_deleted(account.email()).await? {
            return Err(LockgateError::forbidden(
                "Free trial already used for this email",
            ));
        }

        if self.store.get_trial(account.account_id()).await?.is_some() {
            return Err(LockgateError::bad_request(
                "Account already has a trial record",
            ));
        }

        let now = unix_timestamp();
        let record = TrialRecord {
            account_id: account.account_id().to_string(),
            email: account.email().to_string(),
            status: TrialStatus::Active,
            started_at: now,
            trial_end: now + u64::from(self.config.duration_days) * 86400,
            updated_at: now,
        };
        self.store.save_trial(&record).await?;

        tracing::info!(
            account_id = %record.account_id,
            trial_end = record.trial_end,
            "Free trial started"
        );

        Ok(record)
    }

    /// Get the trial record with its clock-effective status applied.
    pub async fn get_trial(&self, account_id: &str) -> Result<Option<TrialRecord>> {
        let record = self.store.get_trial(account_id).await?;
        Ok(record.map(|mut r| {
            r.status = r.effective_status(unix_timestamp());
            r
        }))
    }

    /// The evaluator input for an account's trial, if any.
    pub async fn access_snapshot(&self, account_id: &str) -> Result<Option<TrialSnapshot>> {
        let record = self.store.get_trial(account_id).await?;
        Ok(record.map(|r| r.access_snapshot(unix_timestamp())))
    }

    /// Mark the trial converted because a paid subscription took over.
    ///
    /// Idempotent; a missing record is fine (the account may never have had
    /// a free trial).
    pub async fn mark_converted(&self, account_id: &str) -> Result<()> {
        let Some(mut record) = self.store.get_trial(account_id).await? else {
            return Ok(());
        };

        if record.status == TrialStatus::ConvertedToPaid {
            return Ok(());
        }

        record.status = TrialStatus::ConvertedToPaid;
        record.updated_at = unix_timestamp();
        self.store.save_trial(&record).await?;

        tracing::info!(account_id = %account_id, "Trial converted to paid");
        Ok(())
    }

    /// Queue the trial data for deletion (account cancellation).
    pub async fn schedule_deletion(&self, account_id: &str) -> Result<()> {
        let Some(mut record) = self.store.get_trial(account_id).await? else {
            return Ok(());
        };

        if record.status == TrialStatus::ScheduledForDeletion {
            return Ok(());
        }

        record.status = TrialStatus::ScheduledForDeletion;
        record.updated_at = unix_timestamp();
        self.store.save_trial(&record).await?;

        tracing::info!(account_id = %account_id, "Trial scheduled for deletion");
        Ok(())
    }

    /// Record an account deletion.
    ///
    /// The email lands in the registry permanently, so a future signup with
    /// the same address is a returning user and gets no second trial.
    pub async fn mark_account_deleted(&self, account: &impl AccountIdentity) -> Result<()> {
        self.store.record_deleted_email(account.email()).await?;
        self.store.delete_trial(account.account_id()).await?;

        tracing::info!(account_id = %account.account_id(), "Account deletion recorded");
        Ok(())
    }

    /// Whether this email belongs to a returning user.
    pub async fn returning_user(&self, email: &str) -> Result<bool> {
        self.store.was_email_deleted(email).await
    }
}
