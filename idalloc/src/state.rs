//! Replicated allocation counters.

use std::collections::BTreeMap;

use crate::model::IdType;

/// Command index meaning "nothing applied yet".
pub const NO_COMMAND_INDEX: i64 = -1;

/// Per-type allocation high-water marks plus the index of the last command
/// that changed them.
///
/// Owned by the [`ReplicatedIdAllocationStateMachine`](crate::state_machine::ReplicatedIdAllocationStateMachine);
/// everything else reads copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAllocationState {
    first_unallocated: BTreeMap<IdType, u64>,
    last_applied_command_index: i64,
}

impl Default for IdAllocationState {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocationState {
    pub fn new() -> Self {
        Self {
            first_unallocated: BTreeMap::new(),
            last_applied_command_index: NO_COMMAND_INDEX,
        }
    }

    pub(crate) fn from_parts(
        first_unallocated: BTreeMap<IdType, u64>,
        last_applied_command_index: i64,
    ) -> Self {
        Self {
            first_unallocated,
            last_applied_command_index,
        }
    }

    /// Next id not yet granted to any member for `id_type`.
    pub fn first_unallocated(&self, id_type: IdType) -> u64 {
        self.first_unallocated.get(&id_type).copied().unwrap_or(0)
    }

    pub fn last_applied_command_index(&self) -> i64 {
        self.last_applied_command_index
    }

    /// Types with a counter, in wire-id order.
    pub fn entries(&self) -> impl Iterator<Item = (IdType, u64)> + '_ {
        self.first_unallocated.iter().map(|(t, v)| (*t, *v))
    }

    /// Grants `length` ids of `id_type` at `command_index`.
    ///
    /// Leaves the state untouched and returns false if the grant would run
    /// past the end of the id space.
    pub(crate) fn advance(&mut self, id_type: IdType, length: u64, command_index: i64) -> bool {
        let Some(next) = self.first_unallocated(id_type).checked_add(length) else {
            return false;
        };
        self.first_unallocated.insert(id_type, next);
        self.last_applied_command_index = command_index;
        true
    }
}
