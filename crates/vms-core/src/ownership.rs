//! ---
//! vms_section: "03-dispatch-runtime"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Context owner claim and data-plane ownership checks."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
//! The context owner is the last caller that claimed the bus for its
//! navigation context. Claims are advisory; whoever is entitled to claim is
//! decided by the platform permission layer before the claim reaches us.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Caller identity as reported by the platform IPC layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextOwner {
    pub uid: u32,
    pub pid: u32,
}

impl ContextOwner {
    pub const fn new(uid: u32, pid: u32) -> Self {
        Self { uid, pid }
    }

    fn pack(self) -> u64 {
        (u64::from(self.uid) << 32) | u64::from(self.pid)
    }

    fn unpack(packed: u64) -> Self {
        Self {
            uid: (packed >> 32) as u32,
            pid: packed as u32,
        }
    }
}

impl fmt::Display for ContextOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.uid, self.pid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OwnershipError {
    #[error("caller {caller} is not the context owner (owner: {})", describe(.owner))]
    UnauthorizedCaller {
        caller: ContextOwner,
        owner: Option<ContextOwner>,
    },
}

fn describe(owner: &Option<ContextOwner>) -> String {
    owner.map_or_else(|| "none".to_owned(), |owner| owner.to_string())
}

/// Lock-free holder of the current context owner.
///
/// The owner is overwritten by each claim and never cleared.
#[derive(Debug, Default)]
pub struct OwnershipGate {
    owner: AtomicU64,
    claimed: AtomicBool,
}

impl OwnershipGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `caller` as the owner, returning the previous one.
    pub fn claim(&self, caller: ContextOwner) -> Option<ContextOwner> {
        let previous = self.owner.swap(caller.pack(), Ordering::AcqRel);
        let had_owner = self.claimed.swap(true, Ordering::AcqRel);
        let previous = had_owner.then(|| ContextOwner::unpack(previous));
        info!(
            owner = %caller,
            previous = %describe(&previous),
            "context owner claimed"
        );
        previous
    }

    pub fn owner(&self) -> Option<ContextOwner> {
        if !self.claimed.load(Ordering::Acquire) {
            return None;
        }
        Some(ContextOwner::unpack(self.owner.load(Ordering::Acquire)))
    }

    /// Succeeds only for the current owner. Fails when nothing was claimed.
    pub fn check(&self, caller: ContextOwner) -> Result<(), OwnershipError> {
        let owner = self.owner();
        if owner == Some(caller) {
            Ok(())
        } else {
            Err(OwnershipError::UnauthorizedCaller { caller, owner })
        }
    }
}
