//! Shared building blocks for the id allocation workspace.
//!
//! - [`serde`]: deserialization errors and bounded big-endian codec helpers.
//! - [`durable`]: a generic ping-pong journal for small pieces of state that
//!   must survive a crash, with recovery from a torn trailing write.

pub mod durable;
pub mod serde;

pub use durable::{
    DurableError, DurableResult, DurableStateStorage, InMemoryStateStorage, RecoveryStatus, Slot,
    StateMarshal, StateRecoveryManager, StateStorage, StateStorageConfig,
};
pub use serde::DeserializeError;
