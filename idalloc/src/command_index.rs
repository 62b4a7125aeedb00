//! Tracks how far this member has applied the replicated log.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::state::NO_COMMAND_INDEX;

/// Highest replicated-log command index this member has applied, across
/// every kind of replicated content.
#[derive(Debug)]
pub struct CommandIndexTracker {
    applied: AtomicI64,
}

impl Default for CommandIndexTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandIndexTracker {
    pub fn new() -> Self {
        Self {
            applied: AtomicI64::new(NO_COMMAND_INDEX),
        }
    }

    /// Records that `index` has been applied. Never moves backwards.
    pub fn set_applied_command_index(&self, index: i64) {
        self.applied.fetch_max(index, Ordering::AcqRel);
    }

    pub fn applied_command_index(&self) -> i64 {
        self.applied.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_only_move_forward() {
        // given
        let tracker = CommandIndexTracker::new();

        // when
        tracker.set_applied_command_index(5);
        tracker.set_applied_command_index(3);

        // then
        assert_eq!(tracker.applied_command_index(), 5);
    }

    #[test]
    fn should_report_nothing_applied_initially() {
        assert_eq!(CommandIndexTracker::new().applied_command_index(), -1);
    }
}
