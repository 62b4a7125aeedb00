//! Applies replicated allocation requests to the local [`IdAllocationState`].
//!
//! Every member runs one state machine and feeds it the same commands in the
//! same command-index order, so every member grants the same ranges. Two
//! gates keep this deterministic under duplicate or racing delivery:
//!
//! 1. A command whose index is not above the last applied index is dropped.
//!    This is checked first and does not depend on the id type.
//! 2. A request whose start is not the current first unallocated id of its
//!    type lost a race and is rejected. Rejection leaves the state, including
//!    the last applied index, untouched.

use std::sync::{Mutex, MutexGuard, PoisonError};

use common::{DurableStateStorage, StateStorage, StateStorageConfig};
use tracing::debug;

use crate::error::Result;
use crate::model::{IdAllocation, IdRange, IdType};
use crate::serde::{IdAllocationStateMarshal, ReplicatedIdAllocationRequest};
use crate::state::IdAllocationState;

/// Result of applying a request with a fresh command index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    /// The requested range now belongs to the request's owner.
    Accepted(IdAllocation),
    /// Another request consumed the range first; retry from
    /// `first_unallocated`.
    Rejected { first_unallocated: u64 },
}

struct Inner {
    state: IdAllocationState,
    storage: Box<dyn StateStorage<IdAllocationState>>,
}

pub struct ReplicatedIdAllocationStateMachine {
    inner: Mutex<Inner>,
}

impl ReplicatedIdAllocationStateMachine {
    /// Creates a state machine resuming from the storage's recovered state.
    pub fn new(storage: Box<dyn StateStorage<IdAllocationState>>) -> Self {
        let state = storage.initial_state();
        Self {
            inner: Mutex::new(Inner { state, storage }),
        }
    }

    /// Creates a state machine journaled to the ping-pong files described by
    /// `config`, recovering any state they hold.
    pub fn open(config: &StateStorageConfig) -> Result<Self> {
        let storage = DurableStateStorage::open(config, IdAllocationStateMarshal)?;
        Ok(Self::new(Box::new(storage)))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `request` delivered at `command_index`.
    ///
    /// `callback` is invoked once with the outcome unless the index has
    /// already been seen, in which case the command is dropped silently.
    pub fn apply_command<F>(
        &self,
        request: &ReplicatedIdAllocationRequest,
        command_index: i64,
        callback: F,
    ) where
        F: FnOnce(AllocationOutcome),
    {
        let outcome = {
            let mut inner = self.lock();
            let last_applied = inner.state.last_applied_command_index();
            if command_index <= last_applied {
                debug!(
                    command_index,
                    last_applied, "ignoring already applied allocation command"
                );
                return;
            }

            let first_unallocated = inner.state.first_unallocated(request.id_type);
            if request.range_start != first_unallocated {
                debug!(
                    command_index,
                    id_type = %request.id_type,
                    owner = %request.owner,
                    requested = request.range_start,
                    first_unallocated,
                    "rejecting non-contiguous allocation request"
                );
                AllocationOutcome::Rejected { first_unallocated }
            } else if !inner
                .state
                .advance(request.id_type, request.range_length, command_index)
            {
                debug!(
                    command_index,
                    id_type = %request.id_type,
                    owner = %request.owner,
                    range_start = request.range_start,
                    range_length = request.range_length,
                    "rejecting allocation request past the end of the id space"
                );
                AllocationOutcome::Rejected { first_unallocated }
            } else {
                debug!(
                    command_index,
                    id_type = %request.id_type,
                    owner = %request.owner,
                    range_start = request.range_start,
                    range_length = request.range_length,
                    "applied allocation command"
                );
                AllocationOutcome::Accepted(IdAllocation::new(
                    IdRange::new(Vec::new(), request.range_start, request.range_length),
                    highest_id_before(request.range_start),
                    command_index,
                ))
            }
        };
        callback(outcome);
    }

    /// Next id not yet granted for `id_type`.
    pub fn first_unallocated(&self, id_type: IdType) -> u64 {
        self.lock().state.first_unallocated(id_type)
    }

    pub fn last_applied_index(&self) -> i64 {
        self.lock().state.last_applied_command_index()
    }

    /// Persists the current state.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock();
        let Inner { state, storage } = &mut *inner;
        storage.persist(state)?;
        Ok(())
    }

    /// Copy of the current state, for log compaction.
    pub fn snapshot(&self) -> IdAllocationState {
        self.lock().state.clone()
    }

    /// Replaces the state with `snapshot` if it is further ahead.
    ///
    /// Returns whether the snapshot was installed.
    pub fn install_snapshot(&self, snapshot: IdAllocationState) -> bool {
        let mut inner = self.lock();
        let current = inner.state.last_applied_command_index();
        if snapshot.last_applied_command_index() <= current {
            debug!(
                snapshot_index = snapshot.last_applied_command_index(),
                current, "ignoring stale id allocation snapshot"
            );
            return false;
        }
        inner.state = snapshot;
        true
    }
}

/// Highest id granted before `range_start`, or -1 if none was.
fn highest_id_before(range_start: u64) -> i64 {
    match range_start.checked_sub(1) {
        Some(highest) => i64::try_from(highest).unwrap_or(i64::MAX),
        None => -1,
    }
}
