//! Routes committed replicated content to the component that applies it.

use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::command_index::CommandIndexTracker;
use crate::error::Result;
use crate::serde::ReplicatedContent;
use crate::state_machine::{AllocationOutcome, ReplicatedIdAllocationStateMachine};

/// Effect of applying one command on one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Allocation(AllocationOutcome),
    /// A non-allocation command was applied.
    Applied,
    /// The command index had already been applied; nothing happened.
    Ignored,
}

/// Applies store transactions carried by the replicated log.
pub trait TransactionApplier: Send + Sync {
    fn apply(&self, payload: &Bytes, command_index: i64) -> Result<()>;
}

/// Dispatches each committed command by variant, then records its index.
pub struct CommandDispatcher {
    id_allocation: Arc<ReplicatedIdAllocationStateMachine>,
    transactions: Option<Arc<dyn TransactionApplier>>,
    command_index_tracker: Arc<CommandIndexTracker>,
}

impl CommandDispatcher {
    pub fn new(
        id_allocation: Arc<ReplicatedIdAllocationStateMachine>,
        command_index_tracker: Arc<CommandIndexTracker>,
    ) -> Self {
        Self {
            id_allocation,
            transactions: None,
            command_index_tracker,
        }
    }

    pub fn with_transaction_applier(mut self, applier: Arc<dyn TransactionApplier>) -> Self {
        self.transactions = Some(applier);
        self
    }

    pub fn id_allocation(&self) -> &Arc<ReplicatedIdAllocationStateMachine> {
        &self.id_allocation
    }

    pub fn dispatch(&self, content: &ReplicatedContent, command_index: i64) -> Result<CommandOutcome> {
        trace!(command_index, content_type = ?content.content_type(), "dispatching command");
        let outcome = match content {
            ReplicatedContent::IdAllocation(request) => {
                let mut outcome = CommandOutcome::Ignored;
                self.id_allocation
                    .apply_command(request, command_index, |result| {
                        outcome = CommandOutcome::Allocation(result)
                    });
                outcome
            }
            ReplicatedContent::Transaction(payload) => {
                if let Some(applier) = &self.transactions {
                    applier.apply(payload, command_index)?;
                }
                CommandOutcome::Applied
            }
            ReplicatedContent::NewLeaderBarrier => CommandOutcome::Applied,
        };
        self.command_index_tracker
            .set_applied_command_index(command_index);
        Ok(outcome)
    }
}
