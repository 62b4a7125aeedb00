//! Obtains id ranges from the cluster.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::AllocationSizes;
use crate::dispatch::CommandOutcome;
use crate::error::{Error, Result};
use crate::model::{IdAllocation, IdType, MemberId};
use crate::replication::Replicator;
use crate::serde::{ReplicatedContent, ReplicatedIdAllocationRequest};
use crate::state_machine::{AllocationOutcome, ReplicatedIdAllocationStateMachine};

/// Acquires ranges by replicating allocation requests.
///
/// Each request asks for the range starting at the local state machine's
/// first unallocated id. When a racing member wins that range the state
/// machine rejects the request and the acquirer tries again from the new
/// first unallocated id. Exactly one request wins each range because every
/// member applies commands in the same order.
pub struct ReplicatedIdRangeAcquirer {
    my_self: MemberId,
    replicator: Arc<dyn Replicator>,
    state_machine: Arc<ReplicatedIdAllocationStateMachine>,
    allocation_sizes: AllocationSizes,
}

impl ReplicatedIdRangeAcquirer {
    pub fn new(
        my_self: MemberId,
        replicator: Arc<dyn Replicator>,
        state_machine: Arc<ReplicatedIdAllocationStateMachine>,
        allocation_sizes: AllocationSizes,
    ) -> Self {
        Self {
            my_self,
            replicator,
            state_machine,
            allocation_sizes,
        }
    }

    /// Acquires the next range for `id_type`, retrying as long as other
    /// members win the race. Replication failures are returned as is.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn acquire_ids(&self, id_type: IdType) -> Result<IdAllocation> {
        let range_length = self.allocation_sizes.get(id_type);
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            let range_start = self.state_machine.first_unallocated(id_type);
            if range_start.checked_add(range_length).is_none() {
                return Err(Error::IdCapacityExceeded {
                    id_type,
                    max_id: id_type.max_id(),
                });
            }
            let request =
                ReplicatedIdAllocationRequest::new(self.my_self, id_type, range_start, range_length);

            match self
                .replicator
                .replicate(ReplicatedContent::IdAllocation(request))
                .await?
            {
                CommandOutcome::Allocation(AllocationOutcome::Accepted(allocation)) => {
                    debug!(
                        %id_type,
                        range = %allocation.range,
                        log_index = allocation.log_index,
                        attempts,
                        "acquired id range"
                    );
                    return Ok(allocation);
                }
                CommandOutcome::Allocation(AllocationOutcome::Rejected { first_unallocated }) => {
                    info!(
                        %id_type,
                        requested = range_start,
                        first_unallocated,
                        attempts,
                        "retrying id generation due to conflict"
                    );
                }
                CommandOutcome::Ignored => {
                    info!(%id_type, attempts, "allocation request was not applied, retrying");
                }
                CommandOutcome::Applied => {
                    return Err(Error::Internal(
                        "replicator returned a non-allocation outcome for an allocation request"
                            .to_string(),
                    ));
                }
            }
        }
    }
}
