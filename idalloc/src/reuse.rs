//! Gate deciding whether locally freed ids may be handed out again.
//!
//! Freed ids are only safe to recycle on the leader, and only once it has
//! applied every command that was in the log when it took over. Before that,
//! a command from an earlier epoch still waiting to be applied could consume
//! the same id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use tracing::info;

use crate::command_index::CommandIndexTracker;
use crate::model::{LeaderInfo, MemberId};

/// Answers whether freed ids may currently be reused.
pub trait ReuseCondition: Send + Sync {
    fn is_satisfied(&self) -> bool;
}

/// Receives leader changes from the consensus layer.
pub trait LeaderListener: Send + Sync {
    fn on_leader_switch(&self, leader_info: LeaderInfo);
}

/// View of the consensus log needed when this member becomes leader.
pub trait LeadershipState: Send + Sync {
    /// Index of the last log entry appended before this member's current
    /// leadership began.
    fn last_log_index_before_we_became_leader(&self) -> i64;
}

/// Never allows reuse.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverReuse;

impl ReuseCondition for NeverReuse {
    fn is_satisfied(&self) -> bool {
        false
    }
}

/// One leadership epoch as seen by this member.
#[derive(Debug)]
struct Epoch {
    leader: Option<MemberId>,
    term: u64,
    /// Set only when this member is the leader.
    catch_up_index: Option<i64>,
    reusable: AtomicBool,
}

impl Epoch {
    fn unknown() -> Self {
        Self {
            leader: None,
            term: 0,
            catch_up_index: None,
            reusable: AtomicBool::new(false),
        }
    }
}

/// Leadership and catch-up aware [`ReuseCondition`].
///
/// Leader switches replace the whole epoch snapshot; polls load the current
/// snapshot and re-evaluate against the [`CommandIndexTracker`]. Once an
/// epoch has been found caught up it stays reusable until the next switch.
pub struct IdReusabilityCondition {
    my_self: MemberId,
    command_index_tracker: Arc<CommandIndexTracker>,
    leadership: Arc<dyn LeadershipState>,
    epoch: ArcSwap<Epoch>,
}

impl IdReusabilityCondition {
    pub fn new(
        my_self: MemberId,
        command_index_tracker: Arc<CommandIndexTracker>,
        leadership: Arc<dyn LeadershipState>,
    ) -> Self {
        Self {
            my_self,
            command_index_tracker,
            leadership,
            epoch: ArcSwap::from_pointee(Epoch::unknown()),
        }
    }

    /// Current leader as last reported, if any.
    pub fn leader(&self) -> Option<MemberId> {
        self.epoch.load().leader
    }
}

impl ReuseCondition for IdReusabilityCondition {
    fn is_satisfied(&self) -> bool {
        let epoch = self.epoch.load();
        if epoch.reusable.load(Ordering::Acquire) {
            return true;
        }
        let Some(catch_up_index) = epoch.catch_up_index else {
            return false;
        };
        if self.command_index_tracker.applied_command_index() >= catch_up_index {
            epoch.reusable.store(true, Ordering::Release);
            return true;
        }
        false
    }
}

impl LeaderListener for IdReusabilityCondition {
    fn on_leader_switch(&self, leader_info: LeaderInfo) {
        let is_self = leader_info.member_id == Some(self.my_self);
        let catch_up_index =
            is_self.then(|| self.leadership.last_log_index_before_we_became_leader());
        info!(
            leader = ?leader_info.member_id.map(|m| m.to_string()),
            term = leader_info.term,
            is_self,
            catch_up_index = ?catch_up_index,
            "leader switch, freed id reuse suspended"
        );
        self.epoch.store(Arc::new(Epoch {
            leader: leader_info.member_id,
            term: leader_info.term,
            catch_up_index,
            reusable: AtomicBool::new(false),
        }));
    }
}

impl std::fmt::Debug for IdReusabilityCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let epoch = self.epoch.load();
        f.debug_struct("IdReusabilityCondition")
            .field("my_self", &self.my_self)
            .field("leader", &epoch.leader)
            .field("term", &epoch.term)
            .field("catch_up_index", &epoch.catch_up_index)
            .finish()
    }
}
