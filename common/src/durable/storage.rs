use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::frame::encode_entry;
use super::recovery::StateRecoveryManager;
use super::{DurableError, DurableResult, Slot, StateMarshal, slot_paths};

/// Where and how a ping-pong journal is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateStorageConfig {
    /// Directory holding both slot files.
    pub directory: PathBuf,
    /// Base file name; the slots are `<name>.a` and `<name>.b`.
    pub name: String,
    /// Number of entries written to one slot before switching to the other.
    pub entries_before_rotation: u64,
}

impl Default for StateStorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data/cluster-state"),
            name: "state".to_string(),
            entries_before_rotation: 1000,
        }
    }
}

/// Persists successive versions of a piece of state.
pub trait StateStorage<S>: Send {
    /// The state found when the storage was opened.
    fn initial_state(&self) -> S;

    /// Durably records `state` as the newest version.
    fn persist(&mut self, state: &S) -> DurableResult<()>;
}

impl<S, M: StateMarshal<S> + ?Sized> StateMarshal<S> for &M {
    fn start_state(&self) -> S {
        (**self).start_state()
    }

    fn ordinal(&self, state: &S) -> i64 {
        (**self).ordinal(state)
    }

    fn marshal(&self, state: &S, buf: &mut BytesMut) {
        (**self).marshal(state, buf)
    }

    fn unmarshal(&self, buf: &mut &[u8]) -> Result<S, crate::DeserializeError> {
        (**self).unmarshal(buf)
    }
}

/// File-backed [`StateStorage`] alternating between two slots.
///
/// Opening recovers the newest state, then truncates the slot that does not
/// hold it and directs all further writes there. After
/// `entries_before_rotation` writes the roles of the two slots swap.
pub struct DurableStateStorage<S, M> {
    marshal: M,
    files: [PathBuf; 2],
    current: Slot,
    channel: File,
    entries_in_current: u64,
    entries_before_rotation: u64,
    initial_state: S,
}

impl<S, M> DurableStateStorage<S, M>
where
    S: Clone + Send,
    M: StateMarshal<S>,
{
    /// Opens (creating if needed) the journal described by `config`.
    ///
    /// Missing slot files are created holding the marshal's start state, so a
    /// brand new journal recovers to that state.
    pub fn open(config: &StateStorageConfig, marshal: M) -> DurableResult<Self> {
        std::fs::create_dir_all(&config.directory)
            .map_err(|e| DurableError::io(&config.directory, e))?;

        let files = slot_paths(&config.directory, &config.name);
        for file in &files {
            ensure_exists(file, &marshal)?;
        }

        let status = StateRecoveryManager::new(&marshal).recover(&files[0], &files[1])?;
        let current = status.active_slot();
        debug!(
            name = %config.name,
            active = %status.active_file().display(),
            ordinal = marshal.ordinal(status.recovered_state()),
            "recovered durable state"
        );
        let initial_state = status.into_recovered_state();
        let channel = reset_store_file(&files[current.index()])?;

        Ok(Self {
            marshal,
            files,
            current,
            channel,
            entries_in_current: 0,
            entries_before_rotation: config.entries_before_rotation.max(1),
            initial_state,
        })
    }

    /// Slot currently receiving writes.
    pub fn current_slot(&self) -> Slot {
        self.current
    }

    pub fn current_file(&self) -> &Path {
        &self.files[self.current.index()]
    }

    fn switch_store_file(&mut self) -> DurableResult<()> {
        let next = self.current.other();
        self.channel = reset_store_file(&self.files[next.index()])?;
        self.current = next;
        self.entries_in_current = 0;
        Ok(())
    }
}

impl<S, M> StateStorage<S> for DurableStateStorage<S, M>
where
    S: Clone + Send,
    M: StateMarshal<S>,
{
    fn initial_state(&self) -> S {
        self.initial_state.clone()
    }

    fn persist(&mut self, state: &S) -> DurableResult<()> {
        if self.entries_in_current >= self.entries_before_rotation {
            self.switch_store_file()?;
        }

        let mut buf = BytesMut::new();
        encode_entry(&self.marshal, state, &mut buf);
        let path = &self.files[self.current.index()];
        self.channel
            .write_all(&buf)
            .and_then(|_| self.channel.sync_data())
            .map_err(|e| DurableError::io(path, e))?;
        self.entries_in_current += 1;
        Ok(())
    }
}

fn ensure_exists<S, M: StateMarshal<S>>(file: &Path, marshal: &M) -> DurableResult<()> {
    if file.exists() {
        return Ok(());
    }
    let mut buf = BytesMut::new();
    encode_entry(marshal, &marshal.start_state(), &mut buf);
    write_synced(file, buf.freeze())
}

fn write_synced(file: &Path, data: Bytes) -> DurableResult<()> {
    let mut channel = File::create(file).map_err(|e| DurableError::io(file, e))?;
    channel
        .write_all(&data)
        .and_then(|_| channel.sync_all())
        .map_err(|e| DurableError::io(file, e))
}

fn reset_store_file(file: &Path) -> DurableResult<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(file)
        .map_err(|e| DurableError::io(file, e))
}

/// In-memory [`StateStorage`] for tests and ephemeral members.
pub struct InMemoryStateStorage<S> {
    state: S,
    persisted: u64,
}

impl<S: Clone + Send> InMemoryStateStorage<S> {
    pub fn new(initial_state: S) -> Self {
        Self {
            state: initial_state,
            persisted: 0,
        }
    }

    /// Number of successful `persist` calls.
    pub fn persist_count(&self) -> u64 {
        self.persisted
    }
}

impl<S: Clone + Send> StateStorage<S> for InMemoryStateStorage<S> {
    fn initial_state(&self) -> S {
        self.state.clone()
    }

    fn persist(&mut self, state: &S) -> DurableResult<()> {
        self.state = state.clone();
        self.persisted += 1;
        Ok(())
    }
}
