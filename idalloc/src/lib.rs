//! Replicated identifier allocation.
//!
//! Members of a cluster agree on non-overlapping ranges of ids through the
//! replicated log, then hand out ids from those ranges locally.
//!
//! # Architecture
//!
//! ```text
//!  next_id ──▶ FreeIdFilteredIdGenerator ──▶ ReplicatedIdGenerator ──▶ ReplicatedIdRangeAcquirer
//!                     │                             │                            │
//!                     ▼                             ▼                            ▼ replicate
//!           IdReusabilityCondition               IdFile                     Replicator
//!                     │                                                          │ commit
//!                     ▼                                                          ▼
//!            CommandIndexTracker ◀──────────── CommandDispatcher ──▶ ReplicatedIdAllocationStateMachine
//!                                                                                │
//!                                                                                ▼
//!                                                                      DurableStateStorage
//! ```
//!
//! # Key Concepts
//!
//! - **ReplicatedIdAllocationStateMachine**: applies allocation requests in
//!   log order. Requests with an already applied index are dropped; requests
//!   that do not start at the first unallocated id are rejected.
//! - **ReplicatedIdRangeAcquirer**: proposes requests and retries after
//!   losing a race to another member.
//! - **ReplicatedIdGenerator**: serves ids from the current range, reusing
//!   freed ids first, and keeps its high id in an [`IdFile`](id_file::IdFile).
//! - **IdReusabilityCondition**: allows reuse of freed ids only on a leader
//!   that has applied everything logged before it took over.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use idalloc::{
//!     Config, IdType, ReplicatedIdAllocationStateMachine, ReplicatedIdRangeAcquirer,
//!     id_generator_factory,
//! };
//!
//! let config = Config::default();
//! let state_machine = Arc::new(ReplicatedIdAllocationStateMachine::open(&config.state)?);
//! let acquirer = Arc::new(ReplicatedIdRangeAcquirer::new(
//!     my_self,
//!     replicator,
//!     state_machine,
//!     config.allocation_sizes.clone(),
//! ));
//! let factory = id_generator_factory(&config, acquirer, reuse_condition);
//!
//! let nodes = factory.open(&store_dir.join("nodestore.db.id"), IdType::Node, 0)?;
//! let id = nodes.next_id().await?;
//! ```

mod acquirer;
mod command_index;
mod config;
mod dispatch;
mod error;
mod factory;
mod free_id_filter;
mod generator;
pub mod id_file;
mod model;
mod range;
mod replication;
mod reuse;
mod serde;
mod state;
mod state_machine;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use acquirer::ReplicatedIdRangeAcquirer;
pub use command_index::CommandIndexTracker;
pub use config::{AllocationSizes, Config, default_allocation_size};
pub use dispatch::{CommandDispatcher, CommandOutcome, TransactionApplier};
pub use error::{Error, Result};
pub use factory::{
    FreeIdFilteredIdGeneratorFactory, IdGeneratorFactory, ReplicatedIdGeneratorFactory,
    id_generator_factory,
};
pub use free_id_filter::FreeIdFilteredIdGenerator;
pub use generator::{IdGenerator, ReplicatedIdGenerator};
pub use model::{IdAllocation, IdRange, IdType, LeaderInfo, MemberId, VALUE_REPRESENTING_NULL};
pub use range::IdRangeIterator;
pub use replication::Replicator;
pub use reuse::{IdReusabilityCondition, LeaderListener, LeadershipState, NeverReuse, ReuseCondition};
pub use serde::{ContentType, IdAllocationStateMarshal, ReplicatedContent, ReplicatedIdAllocationRequest};
pub use state::{IdAllocationState, NO_COMMAND_INDEX};
pub use state_machine::{AllocationOutcome, ReplicatedIdAllocationStateMachine};
