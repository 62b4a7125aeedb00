//! Local id generators backed by cluster-granted ranges.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::acquirer::ReplicatedIdRangeAcquirer;
use crate::error::{Error, Result};
use crate::id_file::IdFile;
use crate::model::{IdAllocation, IdRange, IdType, VALUE_REPRESENTING_NULL};
use crate::range::IdRangeIterator;

/// Hands out ids of one type for one store file.
#[async_trait]
pub trait IdGenerator: Send + Sync {
    fn id_type(&self) -> IdType;

    async fn next_id(&self) -> Result<u64>;

    /// Returns up to `size` ids, locally freed ones first. May return fewer
    /// than `size` ids, but never none.
    async fn next_id_batch(&self, size: u64) -> Result<IdRange>;

    /// Makes `id` available to this generator again.
    async fn free_id(&self, id: u64) -> Result<()>;

    /// One past the highest id handed out so far.
    async fn high_id(&self) -> u64;

    async fn set_high_id(&self, high_id: u64) -> Result<()>;

    /// `high_id - 1`, or -1 when no id was ever handed out.
    async fn highest_possible_id_in_use(&self) -> i64;

    async fn number_of_ids_in_use(&self) -> u64;

    /// Number of freed ids waiting to be reused.
    async fn defrag_count(&self) -> u64;

    /// Persists the high id.
    async fn flush(&self) -> Result<()>;

    /// Persists the high id and freed ids and releases the id file.
    async fn close(&self) -> Result<()>;

    /// Whether [`close`](Self::close) has released the id file.
    fn is_closed(&self) -> bool;
}

/// Backlog of freed ids in free order, refusing duplicates.
#[derive(Default)]
struct FreedIds {
    queue: VecDeque<u64>,
    members: HashSet<u64>,
}

impl FreedIds {
    fn from_ids(ids: Vec<u64>) -> Self {
        let mut freed = Self::default();
        for id in ids {
            freed.push(id);
        }
        freed
    }

    /// Returns false if `id` is already waiting to be reused.
    fn push(&mut self, id: u64) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.queue.push_back(id);
        true
    }

    fn pop(&mut self) -> Option<u64> {
        let id = self.queue.pop_front()?;
        self.members.remove(&id);
        Some(id)
    }

    fn take(&mut self, count: usize) -> Vec<u64> {
        let ids: Vec<u64> = self.queue.drain(..count.min(self.queue.len())).collect();
        for id in &ids {
            self.members.remove(id);
        }
        ids
    }

    fn take_all(&mut self) -> Vec<u64> {
        self.members.clear();
        self.queue.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

struct GeneratorState {
    high_id: u64,
    iterator: IdRangeIterator,
    freed: FreedIds,
    file: Option<IdFile>,
}

impl GeneratorState {
    fn file(&mut self) -> Result<&mut IdFile> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::IllegalState("id generator is closed".to_string()))
    }

    fn burn(&mut self, id: u64) {
        self.high_id = self.high_id.max(id + 1);
    }
}

/// [`IdGenerator`] serving ids from ranges acquired through the cluster.
///
/// Locally freed ids are reused first, then the current range; when both
/// run dry a new range is acquired while holding the generator lock, so
/// concurrent callers wait for the same round trip rather than racing it.
pub struct ReplicatedIdGenerator {
    id_type: IdType,
    path: PathBuf,
    acquirer: Arc<ReplicatedIdRangeAcquirer>,
    state: Mutex<GeneratorState>,
    closed: AtomicBool,
}

impl ReplicatedIdGenerator {
    /// Opens the generator for `path`, creating the id file if needed.
    ///
    /// `min_high_id` is the high id recovered from the store itself; the
    /// generator never hands out ids below it from fresh ranges.
    pub fn open(
        path: &Path,
        id_type: IdType,
        min_high_id: u64,
        acquirer: Arc<ReplicatedIdRangeAcquirer>,
    ) -> Result<Self> {
        let (file, contents) = IdFile::open(path, min_high_id)?;
        Ok(Self {
            id_type,
            path: path.to_path_buf(),
            acquirer,
            state: Mutex::new(GeneratorState {
                high_id: contents.high_id,
                iterator: IdRangeIterator::empty(),
                freed: FreedIds::from_ids(contents.freed_ids),
                file: Some(file),
            }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_capacity(&self, last_id: u64) -> Result<()> {
        let max_id = self.id_type.max_id();
        if last_id > max_id {
            return Err(Error::IdCapacityExceeded {
                id_type: self.id_type,
                max_id,
            });
        }
        Ok(())
    }

    /// Acquires a range and makes it current.
    async fn switch_range(&self, state: &mut GeneratorState) -> Result<()> {
        state.file()?;
        let allocation = self.acquirer.acquire_ids(self.id_type).await?;
        let range = respecting_high_id(state.high_id, &allocation)?;
        debug!(
            id_type = %self.id_type,
            %range,
            highest_id_in_use = allocation.highest_id_in_use,
            high_id = state.high_id,
            "switching to new id range"
        );
        let persisted_high_id = range.range_end().max(state.high_id);
        state.iterator = IdRangeIterator::new(range);
        state.file()?.write_high_id(persisted_high_id)?;
        Ok(())
    }
}

/// Drops the part of `allocation` below the local high id.
///
/// Fails if nothing is left: the cluster granted ids this member has already
/// handed out, so the replicated and the local state have diverged.
fn respecting_high_id(high_id: u64, allocation: &IdAllocation) -> Result<IdRange> {
    let range = &allocation.range;
    let start = range.range_start().max(high_id);
    let skipped = start - range.range_start();
    if skipped >= range.range_length() {
        return Err(Error::IllegalState(format!(
            "IdAllocation state is probably corrupted or out of sync with the cluster. \
             Local high id is {} and allocation range is {} at log index {}",
            high_id, range, allocation.log_index
        )));
    }
    Ok(IdRange::new(
        range.defrag_ids().to_vec(),
        start,
        range.range_length() - skipped,
    ))
}

#[async_trait]
impl IdGenerator for ReplicatedIdGenerator {
    fn id_type(&self) -> IdType {
        self.id_type
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.file()?;
        if let Some(id) = state.freed.pop() {
            return Ok(id);
        }

        let mut id = state.iterator.next_id();
        while id == VALUE_REPRESENTING_NULL {
            self.switch_range(&mut state).await?;
            id = state.iterator.next_id();
        }
        self.check_capacity(id)?;
        state.burn(id);
        Ok(id)
    }

    async fn next_id_batch(&self, size: u64) -> Result<IdRange> {
        if size == 0 {
            return Err(Error::InvalidInput("batch size must be positive".to_string()));
        }
        let mut state = self.state.lock().await;
        state.file()?;

        let reused = (state.freed.len() as u64).min(size) as usize;
        let defrag_ids = state.freed.take(reused);
        let wanted = size - defrag_ids.len() as u64;
        if wanted == 0 {
            return Ok(IdRange::new(defrag_ids, 0, 0));
        }

        let (mut start, mut length) = state.iterator.next_id_batch(wanted);
        if length == 0 && defrag_ids.is_empty() {
            self.switch_range(&mut state).await?;
            (start, length) = state.iterator.next_id_batch(wanted);
        }
        if length > 0 {
            self.check_capacity(start + length - 1)?;
            state.burn(start + length - 1);
        }
        Ok(IdRange::new(defrag_ids, start, length))
    }

    async fn free_id(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.file()?;
        if id >= state.high_id {
            return Err(Error::InvalidInput(format!(
                "cannot free {} id {}: high id is {}",
                self.id_type, id, state.high_id
            )));
        }
        if !state.freed.push(id) {
            return Err(Error::InvalidInput(format!(
                "{} id {} is already freed",
                self.id_type, id
            )));
        }
        Ok(())
    }

    async fn high_id(&self) -> u64 {
        self.state.lock().await.high_id
    }

    async fn set_high_id(&self, high_id: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.file()?.write_high_id(high_id)?;
        state.high_id = high_id;
        Ok(())
    }

    async fn highest_possible_id_in_use(&self) -> i64 {
        self.state.lock().await.high_id as i64 - 1
    }

    async fn number_of_ids_in_use(&self) -> u64 {
        let state = self.state.lock().await;
        state.high_id.saturating_sub(state.freed.len() as u64)
    }

    async fn defrag_count(&self) -> u64 {
        self.state.lock().await.freed.len() as u64
    }

    async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let high_id = state.high_id;
        state.file()?.write_high_id(high_id)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(file) = state.file.take() else {
            return Ok(());
        };
        self.closed.store(true, Ordering::Release);
        let freed = state.freed.take_all();
        debug!(
            id_type = %self.id_type,
            high_id = state.high_id,
            freed = freed.len(),
            "closing id generator"
        );
        file.close(state.high_id, &freed)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocationSizes;
    use crate::id_file::read_id_file;
    use crate::test_utils::InMemoryCluster;

    fn open(
        cluster: &Arc<InMemoryCluster>,
        member: usize,
        path: &Path,
        id_type: IdType,
        min_high_id: u64,
        sizes: AllocationSizes,
    ) -> ReplicatedIdGenerator {
        let acquirer = Arc::new(cluster.acquirer(member, sizes));
        ReplicatedIdGenerator::open(path, id_type, min_high_id, acquirer).unwrap()
    }

    #[tokio::test]
    async fn should_hand_out_ids_from_acquired_range() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new(1);
        let generator = open(
            &cluster,
            0,
            &dir.path().join("node.id"),
            IdType::Node,
            0,
            AllocationSizes::default(),
        );

        // when
        let ids = [
            generator.next_id().await.unwrap(),
            generator.next_id().await.unwrap(),
            generator.next_id().await.unwrap(),
        ];

        // then
        assert_eq!(ids, [0, 1, 2]);
        assert_eq!(generator.high_id().await, 3);
        assert_eq!(cluster.log_len(), 1);
    }

    #[tokio::test]
    async fn should_acquire_new_range_when_exhausted() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new(2);
        let sizes = AllocationSizes::default().with(IdType::Node, 2);
        let mine = open(&cluster, 0, &dir.path().join("a.id"), IdType::Node, 0, sizes.clone());
        let theirs = open(&cluster, 1, &dir.path().join("b.id"), IdType::Node, 0, sizes);

        // when
        let first = mine.next_id().await.unwrap();
        let other = theirs.next_id().await.unwrap();
        let second = mine.next_id().await.unwrap();
        let third = mine.next_id().await.unwrap();

        // then
        assert_eq!((first, second, third), (0, 1, 4));
        assert_eq!(other, 2);
    }

    #[tokio::test]
    async fn should_reuse_freed_ids_first() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new(1);
        let generator = open(
            &cluster,
            0,
            &dir.path().join("node.id"),
            IdType::Node,
            0,
            AllocationSizes::default(),
        );
        for _ in 0..5 {
            generator.next_id().await.unwrap();
        }

        // when
        generator.free_id(3).await.unwrap();
        generator.free_id(1).await.unwrap();

        // then
        assert_eq!(generator.defrag_count().await, 2);
        assert_eq!(generator.number_of_ids_in_use().await, 3);
        assert_eq!(generator.next_id().await.unwrap(), 3);
        assert_eq!(generator.next_id().await.unwrap(), 1);
        assert_eq!(generator.next_id().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn should_reject_freeing_id_at_or_above_high_id() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new(1);
        let generator = open(
            &cluster,
            0,
            &dir.path().join("node.id"),
            IdType::Node,
            0,
            AllocationSizes::default(),
        );
        generator.next_id().await.unwrap();

        // when
        let result = generator.free_id(1).await;

        // then
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn should_reject_freeing_same_id_twice() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new(1);
        let generator = open(
            &cluster,
            0,
            &dir.path().join("node.id"),
            IdType::Node,
            0,
            AllocationSizes::default(),
        );
        for _ in 0..3 {
            generator.next_id().await.unwrap();
        }
        generator.free_id(1).await.unwrap();

        // when
        let result = generator.free_id(1).await;

        // then
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(generator.defrag_count().await, 1);
        assert_eq!(generator.next_id().await.unwrap(), 1);
        assert_eq!(generator.next_id().await.unwrap(), 3);
        generator.free_id(1).await.unwrap();
        assert_eq!(generator.defrag_count().await, 1);
    }

    #[tokio::test]
    async fn should_skip_ids_below_recovered_high_id() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new(1);
        let generator = open(
            &cluster,
            0,
            &dir.path().join("node.id"),
            IdType::Node,
            100,
            AllocationSizes::default(),
        );

        // when
        let id = generator.next_id().await.unwrap();

        // then
        assert_eq!(id, 100);
        assert_eq!(generator.high_id().await, 101);
    }

    #[tokio::test]
    async fn should_fail_when_cluster_range_is_entirely_below_high_id() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new(1);
        let generator = open(
            &cluster,
            0,
            &dir.path().join("node.id"),
            IdType::Node,
            5000,
            AllocationSizes::default(),
        );

        // when
        let result = generator.next_id().await;

        // then
        let Err(Error::IllegalState(message)) = result else {
            panic!("expected illegal state, got {:?}", result);
        };
        assert!(message.contains("out of sync with the cluster"));
    }

    #[test]
    fn should_keep_tail_of_partially_burned_range() {
        // given
        let allocation = IdAllocation::new(IdRange::new(vec![], 1000, 24), 999, 3);

        // when
        let range = respecting_high_id(1010, &allocation).unwrap();

        // then
        assert_eq!(range.range_start(), 1010);
        assert_eq!(range.range_length(), 14);
    }

    #[tokio::test]
    async fn should_fail_when_exceeding_max_id() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new(1);
        let max = IdType::RelationshipTypeToken.max_id();
        let generator = open(
            &cluster,
            0,
            &dir.path().join("rel-type.id"),
            IdType::RelationshipTypeToken,
            max,
            AllocationSizes::default().with(IdType::RelationshipTypeToken, max + 10),
        );

        // when
        let last = generator.next_id().await.unwrap();
        let result = generator.next_id().await;

        // then
        assert_eq!(last, max);
        assert!(matches!(
            result,
            Err(Error::IdCapacityExceeded {
                id_type: IdType::RelationshipTypeToken,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn should_return_batches_with_freed_ids_first() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new(1);
        let generator = open(
            &cluster,
            0,
            &dir.path().join("property.id"),
            IdType::Property,
            0,
            AllocationSizes::default().with(IdType::Property, 8),
        );
        generator.next_id().await.unwrap();
        generator.free_id(0).await.unwrap();

        // when
        let first = generator.next_id_batch(5).await.unwrap();
        let second = generator.next_id_batch(5).await.unwrap();
        let third = generator.next_id_batch(5).await.unwrap();

        // then
        assert_eq!(first, IdRange::new(vec![0], 1, 4));
        assert_eq!(second, IdRange::new(vec![], 5, 3));
        assert_eq!(third, IdRange::new(vec![], 8, 5));
        assert_eq!(generator.high_id().await, 13);
    }

    #[tokio::test]
    async fn should_persist_freed_ids_on_close_and_reuse_after_reopen() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.id");
        let cluster = InMemoryCluster::new(1);
        let generator = open(&cluster, 0, &path, IdType::Node, 0, AllocationSizes::default());
        for _ in 0..10 {
            generator.next_id().await.unwrap();
        }
        generator.free_id(7).await.unwrap();

        // when
        generator.close().await.unwrap();
        let contents = read_id_file(&path).unwrap();
        let reopened = open(&cluster, 0, &path, IdType::Node, 0, AllocationSizes::default());

        // then
        assert!(contents.clean);
        assert_eq!(contents.high_id, 10);
        assert_eq!(contents.freed_ids, vec![7]);
        assert_eq!(reopened.next_id().await.unwrap(), 7);
        assert_eq!(reopened.next_id().await.unwrap(), 1024);
    }

    #[tokio::test]
    async fn should_not_reissue_ids_after_crash() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.id");
        let cluster = InMemoryCluster::new(1);
        let generator = open(&cluster, 0, &path, IdType::Node, 0, AllocationSizes::default());
        generator.next_id().await.unwrap();
        generator.free_id(0).await.unwrap();
        // crash: never closed
        drop(generator);

        // when
        let reopened = open(&cluster, 0, &path, IdType::Node, 0, AllocationSizes::default());

        // then
        assert_eq!(reopened.defrag_count().await, 0);
        assert_eq!(reopened.high_id().await, 1024);
        assert_eq!(reopened.next_id().await.unwrap(), 1024);
    }

    #[tokio::test]
    async fn should_reject_use_after_close() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let cluster = InMemoryCluster::new(1);
        let generator = open(
            &cluster,
            0,
            &dir.path().join("node.id"),
            IdType::Node,
            0,
            AllocationSizes::default(),
        );
        generator.close().await.unwrap();

        // when
        let result = generator.next_id().await;

        // then
        assert!(matches!(result, Err(Error::IllegalState(_))));
        generator.close().await.unwrap();
    }
}
