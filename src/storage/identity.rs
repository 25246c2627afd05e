//! Identity issuance for created rows.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Issues identities for rows created during a commit.
pub trait IdentityGenerator: Send + Sync + fmt::Debug {
    /// Returns an identity that has never been issued before.
    fn next_identity(&self) -> Uuid;
}

/// Random (v4) identities. The default for every backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdentities;

impl IdentityGenerator for RandomIdentities {
    fn next_identity(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Monotonic identities derived from a counter.
///
/// Deterministic, which makes plans and logs reproducible in tests.
#[derive(Debug)]
pub struct SequentialIdentities {
    next: AtomicU64,
}

impl SequentialIdentities {
    /// Starts issuing at `first`.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIdentities {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdentityGenerator for SequentialIdentities {
    fn next_identity(&self) -> Uuid {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Uuid::from_u128(u128::from(n))
    }
}
