//! Ping-pong persistence for small replicated state.
//!
//! State is journaled into one of two files ("slots"). Every write appends a
//! framed entry to the slot currently being written; after a configured
//! number of entries the storage truncates the other slot and continues there.
//! At any instant at least one slot holds a complete copy of the last
//! successfully persisted state, so a crash in the middle of a write never
//! loses the previous value.
//!
//! ```text
//!      slot A                 slot B
//! ┌──────────────┐      ┌──────────────┐
//! │ e1 e2 e3 ... │ ───▶ │ eN eN+1 ...  │ ───▶ (truncate A, continue in A)
//! └──────────────┘      └──────────────┘
//! ```
//!
//! Recovery ([`StateRecoveryManager`]) reads the longest valid prefix of each
//! slot and compares the last entries by the marshal's ordinal.

mod frame;
mod recovery;
mod storage;

use std::path::PathBuf;

use bytes::BytesMut;

use crate::serde::DeserializeError;

pub use frame::{EntryReader, ReadOutcome, encode_entry};
pub use recovery::{RecoveryStatus, StateRecoveryManager};
pub use storage::{DurableStateStorage, InMemoryStateStorage, StateStorage, StateStorageConfig};

/// Encodes and decodes one journaled state value.
///
/// The marshal only sees the entry payload; framing, checksums and torn-tail
/// detection are handled by the journal.
pub trait StateMarshal<S>: Send + Sync {
    /// State used to seed a freshly created slot.
    fn start_state(&self) -> S;

    /// Application-specific progress of a state. Recovery keeps the slot
    /// whose last entry has the greater ordinal.
    fn ordinal(&self, state: &S) -> i64;

    fn marshal(&self, state: &S, buf: &mut BytesMut);

    fn unmarshal(&self, buf: &mut &[u8]) -> Result<S, DeserializeError>;
}

/// One of the two alternating journal files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    pub(crate) fn suffix(self) -> &'static str {
        match self {
            Slot::A => "a",
            Slot::B => "b",
        }
    }
}

/// Error type for durable state operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurableError {
    /// Underlying file I/O failed.
    Io(String),
    /// Neither slot holds a single valid entry.
    NoRecoverableState(String),
    /// A fully written entry failed validation or decoding.
    Corrupt(String),
}

impl std::error::Error for DurableError {}

impl std::fmt::Display for DurableError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DurableError::Io(msg) => write!(f, "I/O error: {}", msg),
            DurableError::NoRecoverableState(msg) => write!(f, "no recoverable state: {}", msg),
            DurableError::Corrupt(msg) => write!(f, "corrupt journal: {}", msg),
        }
    }
}

impl DurableError {
    pub(crate) fn io(path: &std::path::Path, e: std::io::Error) -> Self {
        DurableError::Io(format!("{}: {}", path.display(), e))
    }
}

/// Result type alias for durable state operations.
pub type DurableResult<T> = std::result::Result<T, DurableError>;

/// Paths of the two slots for a journal called `name` inside `directory`.
pub fn slot_paths(directory: &std::path::Path, name: &str) -> [PathBuf; 2] {
    [Slot::A, Slot::B].map(|slot| directory.join(format!("{}.{}", name, slot.suffix())))
}
