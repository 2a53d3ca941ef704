//! Free-trial lifecycle.
//!
//! Trials are application-owned: granted once per email, expired by the
//! clock, converted when a paid subscription takes over, and queued for
//! deletion on cancellation. Deleted accounts leave their email in a
//! registry that marks future signups as returning users.

pub mod manager;
pub mod storage;

pub use manager::{TrialConfig, TrialManager};
pub use storage::{TrialRecord, TrialStore};

#[cfg(any(test, feature = "test-support"))]
pub use storage::test::InMemoryTrialStore;

pub use crate::access::TrialStatus;
