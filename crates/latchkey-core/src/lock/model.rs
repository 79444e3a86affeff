//! Lease lock data model

use std::str::FromStr;

use latchkey_common::{DEFAULT_LEASE_DURATION_MS, DEFAULT_WAIT_BUDGET_MS, LOCK_KEY_SUFFIX};
use serde::{Deserialize, Serialize};

use crate::backoff::BackoffRange;
use crate::cancel::CancelSignal;
use crate::error::{LockError, Result};

/// What to do when a stored lease value does not parse as a timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptLeasePolicy {
    /// Report [`LockError::CorruptLeaseValue`] and leave the value alone
    #[default]
    Fail,
    /// Treat the value as stale and steal it through the usual compare step
    Overwrite,
}

impl FromStr for CorruptLeasePolicy {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(LockError::InvalidOptions(format!(
                "unknown corrupt lease policy: {other}"
            ))),
        }
    }
}

/// Lock-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOptions {
    /// How long an acquired lease stays valid before it may be stolen
    pub lease_duration_ms: i64,
    /// Total time an acquisition may spend retrying
    pub wait_budget_ms: i64,
    pub backoff: BackoffRange,
    pub corrupt_policy: CorruptLeasePolicy,
    /// Use the store's check-and-act operations when it offers them
    pub prefer_atomic: bool,
    /// Appended to resource identifiers to form store keys
    pub key_suffix: String,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
            wait_budget_ms: DEFAULT_WAIT_BUDGET_MS,
            backoff: BackoffRange::default(),
            corrupt_policy: CorruptLeasePolicy::default(),
            prefer_atomic: true,
            key_suffix: LOCK_KEY_SUFFIX.to_string(),
        }
    }
}

impl LockOptions {
    pub fn validate(&self) -> Result<()> {
        if self.lease_duration_ms <= 0 {
            return Err(LockError::InvalidOptions(format!(
                "lease duration must be positive, got {}",
                self.lease_duration_ms
            )));
        }
        self.backoff.validate()
    }
}

/// Per-call acquisition parameters
///
/// Unset fields fall back to the lock's [`LockOptions`].
#[derive(Debug, Clone, Default)]
pub struct AcquireRequest {
    pub resource_id: String,
    pub lease_duration_ms: Option<i64>,
    /// Zero or negative means a single attempt with no sleep
    pub wait_budget_ms: Option<i64>,
    /// Absolute epoch-millisecond deadline, checked against the lock's clock
    pub deadline_ms: Option<i64>,
    pub cancel: Option<CancelSignal>,
}

impl AcquireRequest {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            ..Default::default()
        }
    }

    pub fn lease_duration_ms(mut self, lease_duration_ms: i64) -> Self {
        self.lease_duration_ms = Some(lease_duration_ms);
        self
    }

    pub fn wait_budget_ms(mut self, wait_budget_ms: i64) -> Self {
        self.wait_budget_ms = Some(wait_budget_ms);
        self
    }

    pub fn deadline_ms(mut self, deadline_ms: i64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    pub fn cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl From<&str> for AcquireRequest {
    fn from(resource_id: &str) -> Self {
        Self::new(resource_id)
    }
}

impl From<String> for AcquireRequest {
    fn from(resource_id: String) -> Self {
        Self::new(resource_id)
    }
}

/// How a lease was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquirePath {
    /// The key was empty and set-if-absent created it
    Fresh,
    /// A stale lease was replaced
    Stolen,
}

impl AcquirePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stolen => "stolen",
        }
    }
}

/// Proof of a successful acquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrant {
    pub resource_id: String,
    pub key: String,
    /// Expiry written to the store; also the value a holder-checked release compares against
    pub expires_at_ms: i64,
    pub path: AcquirePath,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// Outcome of an acquisition that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Acquired(LeaseGrant),
    /// The wait budget ran out
    TimedOut { attempts: u32, waited_ms: i64 },
}

impl Acquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }

    pub fn grant(&self) -> Option<&LeaseGrant> {
        match self {
            Self::Acquired(grant) => Some(grant),
            Self::TimedOut { .. } => None,
        }
    }

    pub fn into_grant(self) -> Option<LeaseGrant> {
        match self {
            Self::Acquired(grant) => Some(grant),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Outcome of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// A live lease was deleted
    Deleted,
    /// The lease had already expired and was left for contenders to steal
    Expired,
    /// Nothing was stored under the key
    Absent,
    /// The stored lease was written by someone else
    NotOwner,
}

impl ReleaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::Expired => "expired",
            Self::Absent => "absent",
            Self::NotOwner => "not_owner",
        }
    }
}

/// Lock statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    /// Successful acquisitions
    pub total_acquisitions: u64,
    /// Acquisitions through set-if-absent
    pub fresh_acquisitions: u64,
    /// Acquisitions by stealing a stale lease
    pub steals: u64,
    /// Steal attempts beaten by another contender
    pub lost_steals: u64,
    /// Acquisitions that ran out of budget
    pub timeouts: u64,
    pub cancellations: u64,
    /// Releases that deleted the lease
    pub total_releases: u64,
    /// Releases that left the key alone
    pub skipped_releases: u64,
    pub store_errors: u64,
    pub corrupt_values: u64,
    /// Backoff sleeps across all acquisitions
    pub total_retries: u64,
}
