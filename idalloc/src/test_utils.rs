//! In-memory replicated log for exercising several members in one process.
//!
//! Gated behind the `test-utils` feature.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use common::InMemoryStateStorage;

use crate::acquirer::ReplicatedIdRangeAcquirer;
use crate::command_index::CommandIndexTracker;
use crate::config::AllocationSizes;
use crate::dispatch::{CommandDispatcher, CommandOutcome};
use crate::error::{Error, Result};
use crate::model::MemberId;
use crate::replication::Replicator;
use crate::serde::ReplicatedContent;
use crate::state::IdAllocationState;
use crate::state_machine::ReplicatedIdAllocationStateMachine;

/// Injected failure that fires either once or on every call.
#[derive(Clone)]
enum Failure {
    Once(Error),
    Persistent(Error),
}

struct Member {
    id: MemberId,
    dispatcher: CommandDispatcher,
    tracker: Arc<CommandIndexTracker>,
}

#[derive(Default)]
struct Log {
    /// Committed content in index order; index `i` is at position `i`.
    entries: Vec<ReplicatedContent>,
    injected: VecDeque<ReplicatedContent>,
    duplicate_delivery: bool,
}

/// A totally ordered log shared by `n` members.
///
/// Every committed command gets the next index and is applied on every
/// member before `replicate` returns, which mirrors a cluster where all
/// members are caught up.
pub struct InMemoryCluster {
    members: Vec<Member>,
    log: Mutex<Log>,
    failure: ArcSwap<Option<Failure>>,
}

impl InMemoryCluster {
    pub fn new(size: usize) -> Arc<Self> {
        let members = (0..size)
            .map(|_| {
                let state_machine = Arc::new(ReplicatedIdAllocationStateMachine::new(Box::new(
                    InMemoryStateStorage::new(IdAllocationState::new()),
                )));
                let tracker = Arc::new(CommandIndexTracker::new());
                Member {
                    id: MemberId::random(),
                    dispatcher: CommandDispatcher::new(state_machine, tracker.clone()),
                    tracker,
                }
            })
            .collect();
        Arc::new(Self {
            members,
            log: Mutex::new(Log::default()),
            failure: ArcSwap::from_pointee(None),
        })
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn member_id(&self, member: usize) -> MemberId {
        self.members[member].id
    }

    pub fn state_machine(&self, member: usize) -> Arc<ReplicatedIdAllocationStateMachine> {
        self.members[member].dispatcher.id_allocation().clone()
    }

    pub fn command_index_tracker(&self, member: usize) -> Arc<CommandIndexTracker> {
        self.members[member].tracker.clone()
    }

    /// Replicator proposing on behalf of `member`.
    pub fn replicator(self: &Arc<Self>, member: usize) -> Arc<dyn Replicator> {
        Arc::new(MemberReplicator {
            cluster: self.clone(),
            member,
        })
    }

    pub fn acquirer(
        self: &Arc<Self>,
        member: usize,
        allocation_sizes: AllocationSizes,
    ) -> ReplicatedIdRangeAcquirer {
        ReplicatedIdRangeAcquirer::new(
            self.member_id(member),
            self.replicator(member),
            self.state_machine(member),
            allocation_sizes,
        )
    }

    /// Commits `content` ahead of whatever is replicated next.
    pub fn inject_before_next(&self, content: ReplicatedContent) {
        self.lock_log().injected.push_back(content);
    }

    /// When enabled every command is delivered twice under the same index.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.lock_log().duplicate_delivery = enabled;
    }

    pub fn fail_once(&self, error: Error) {
        self.failure.store(Arc::new(Some(Failure::Once(error))));
    }

    pub fn fail_always(&self, error: Error) {
        self.failure.store(Arc::new(Some(Failure::Persistent(error))));
    }

    pub fn clear_failure(&self) {
        self.failure.store(Arc::new(None));
    }

    /// Number of committed commands.
    pub fn log_len(&self) -> usize {
        self.lock_log().entries.len()
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_failure(&self) -> Result<()> {
        let guard = self.failure.load();
        match guard.as_ref() {
            None => Ok(()),
            Some(Failure::Persistent(err)) => Err(err.clone()),
            Some(Failure::Once(_)) => {
                let prev = self.failure.swap(Arc::new(None));
                match prev.as_ref() {
                    Some(Failure::Once(err)) => Err(err.clone()),
                    _ => Ok(()),
                }
            }
        }
    }

    fn commit(&self, log: &mut Log, proposer: usize, content: ReplicatedContent) -> Result<CommandOutcome> {
        let index = log.entries.len() as i64;
        let mut outcome = CommandOutcome::Ignored;
        let deliveries = if log.duplicate_delivery { 2 } else { 1 };
        for _ in 0..deliveries {
            for (i, member) in self.members.iter().enumerate() {
                let applied = member.dispatcher.dispatch(&content, index)?;
                if i == proposer && applied != CommandOutcome::Ignored {
                    outcome = applied;
                }
            }
        }
        log.entries.push(content);
        Ok(outcome)
    }

    fn replicate_from(&self, proposer: usize, content: ReplicatedContent) -> Result<CommandOutcome> {
        self.check_failure()?;
        let mut log = self.lock_log();
        while let Some(injected) = log.injected.pop_front() {
            self.commit(&mut log, proposer, injected)?;
        }
        self.commit(&mut log, proposer, content)
    }
}

struct MemberReplicator {
    cluster: Arc<InMemoryCluster>,
    member: usize,
}

#[async_trait]
impl Replicator for MemberReplicator {
    async fn replicate(&self, content: ReplicatedContent) -> Result<CommandOutcome> {
        // let other proposers interleave, as they would over a network
        tokio::task::yield_now().await;
        self.cluster.replicate_from(self.member, content)
    }
}
