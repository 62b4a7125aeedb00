use std::path::{Path, PathBuf};

use tracing::warn;

use super::frame::{EntryReader, ReadOutcome};
use super::{DurableError, DurableResult, Slot, StateMarshal};

/// Outcome of recovering a ping-pong journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryStatus<S> {
    active: Slot,
    active_file: PathBuf,
    latest_file: PathBuf,
    recovered_state: S,
}

impl<S> RecoveryStatus<S> {
    /// The slot that should receive the next write: the one that does not
    /// hold the newest state.
    pub fn active_slot(&self) -> Slot {
        self.active
    }

    pub fn active_file(&self) -> &Path {
        &self.active_file
    }

    /// The file the recovered state was read from.
    pub fn latest_file(&self) -> &Path {
        &self.latest_file
    }

    pub fn recovered_state(&self) -> &S {
        &self.recovered_state
    }

    pub fn into_recovered_state(self) -> S {
        self.recovered_state
    }
}

/// Recovers the most recent valid state from a pair of alternating journals.
pub struct StateRecoveryManager<M> {
    marshal: M,
}

impl<M> StateRecoveryManager<M> {
    pub fn new(marshal: M) -> Self {
        Self { marshal }
    }

    /// Scans both files and picks the one whose last valid entry has the
    /// greater ordinal. On a tie slot B wins, so slot A is written next.
    ///
    /// # Errors
    ///
    /// Returns [`DurableError::NoRecoverableState`] if neither file holds a
    /// valid entry, and [`DurableError::Corrupt`] if an entry that is not the
    /// last one in its file fails validation.
    pub fn recover<S>(&self, file_a: &Path, file_b: &Path) -> DurableResult<RecoveryStatus<S>>
    where
        M: StateMarshal<S>,
    {
        let a = self.read_last_entry(file_a)?;
        let b = self.read_last_entry(file_b)?;

        let (latest, state) = match (a, b) {
            (None, None) => {
                return Err(DurableError::NoRecoverableState(format!(
                    "no valid entries in {} or {}",
                    file_a.display(),
                    file_b.display()
                )));
            }
            (Some(a), None) => (Slot::A, a),
            (None, Some(b)) => (Slot::B, b),
            (Some(a), Some(b)) => {
                if self.marshal.ordinal(&a) > self.marshal.ordinal(&b) {
                    (Slot::A, a)
                } else {
                    (Slot::B, b)
                }
            }
        };

        let path_of = |slot: Slot| match slot {
            Slot::A => file_a.to_path_buf(),
            Slot::B => file_b.to_path_buf(),
        };

        Ok(RecoveryStatus {
            active: latest.other(),
            active_file: path_of(latest.other()),
            latest_file: path_of(latest),
            recovered_state: state,
        })
    }

    fn read_last_entry<S>(&self, file: &Path) -> DurableResult<Option<S>>
    where
        M: StateMarshal<S>,
    {
        let data = match std::fs::read(file) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DurableError::io(file, e)),
        };

        let mut reader = EntryReader::new(&data);
        let mut last = None;
        loop {
            let outcome = reader
                .read_next(&self.marshal)
                .map_err(|e| match e {
                    DurableError::Corrupt(msg) => {
                        DurableError::Corrupt(format!("{}: {}", file.display(), msg))
                    }
                    other => other,
                })?;
            match outcome {
                ReadOutcome::Entry(state) => last = Some(state),
                ReadOutcome::EndOfStream => break,
                ReadOutcome::TornTail { offset, reason } => {
                    warn!(
                        file = %file.display(),
                        offset,
                        reason = %reason,
                        "ignoring torn tail of state journal"
                    );
                    break;
                }
            }
        }
        Ok(last)
    }
}
