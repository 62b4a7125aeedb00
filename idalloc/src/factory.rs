//! Factories owning the generators of one member.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::acquirer::ReplicatedIdRangeAcquirer;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::free_id_filter::FreeIdFilteredIdGenerator;
use crate::generator::{IdGenerator, ReplicatedIdGenerator};
use crate::id_file::IdFile;
use crate::model::IdType;
use crate::reuse::{NeverReuse, ReuseCondition};

/// Opens and tracks id generators, at most one per (file, id type).
pub trait IdGeneratorFactory: Send + Sync {
    /// Opens the generator for `path`, creating its id file if missing.
    /// Opening an already open (file, type) pair returns the same generator;
    /// once that generator is closed a new one is opened.
    fn open(&self, path: &Path, id_type: IdType, min_high_id: u64) -> Result<Arc<dyn IdGenerator>>;

    /// Creates a fresh id file at `path` holding `high_id` and no freed ids.
    fn create(&self, path: &Path, id_type: IdType, high_id: u64) -> Result<()>;

    /// The most recently opened generator for `id_type`.
    fn get(&self, id_type: IdType) -> Option<Arc<dyn IdGenerator>>;
}

#[derive(Default)]
struct Registry {
    by_file: HashMap<(PathBuf, IdType), Arc<dyn IdGenerator>>,
    by_type: HashMap<IdType, Arc<dyn IdGenerator>>,
}

impl Registry {
    /// The open generator for (`path`, `id_type`). Closed generators are
    /// treated as absent so the pair can be opened again.
    fn lookup(&self, path: &Path, id_type: IdType) -> Option<Arc<dyn IdGenerator>> {
        self.by_file
            .get(&(path.to_path_buf(), id_type))
            .filter(|generator| !generator.is_closed())
            .cloned()
    }

    fn register(&mut self, path: &Path, id_type: IdType, generator: Arc<dyn IdGenerator>) {
        self.by_file
            .insert((path.to_path_buf(), id_type), generator.clone());
        self.by_type.insert(id_type, generator);
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates [`ReplicatedIdGenerator`]s sharing one range acquirer.
pub struct ReplicatedIdGeneratorFactory {
    acquirer: Arc<ReplicatedIdRangeAcquirer>,
    registry: Mutex<Registry>,
}

impl ReplicatedIdGeneratorFactory {
    pub fn new(acquirer: Arc<ReplicatedIdRangeAcquirer>) -> Self {
        Self {
            acquirer,
            registry: Mutex::new(Registry::default()),
        }
    }
}

impl IdGeneratorFactory for ReplicatedIdGeneratorFactory {
    fn open(&self, path: &Path, id_type: IdType, min_high_id: u64) -> Result<Arc<dyn IdGenerator>> {
        let mut registry = lock(&self.registry);
        if let Some(existing) = registry.lookup(path, id_type) {
            return Ok(existing);
        }
        let generator: Arc<dyn IdGenerator> = Arc::new(ReplicatedIdGenerator::open(
            path,
            id_type,
            min_high_id,
            self.acquirer.clone(),
        )?);
        debug!(file = %path.display(), %id_type, "opened replicated id generator");
        registry.register(path, id_type, generator.clone());
        Ok(generator)
    }

    fn create(&self, path: &Path, id_type: IdType, high_id: u64) -> Result<()> {
        if lock(&self.registry).lookup(path, id_type).is_some() {
            return Err(Error::InvalidInput(format!(
                "id generator for {} is open on {}",
                id_type,
                path.display()
            )));
        }
        IdFile::create(path, high_id)
    }

    fn get(&self, id_type: IdType) -> Option<Arc<dyn IdGenerator>> {
        lock(&self.registry)
            .by_type
            .get(&id_type)
            .filter(|generator| !generator.is_closed())
            .cloned()
    }
}

/// Decorates the generators of another factory with a
/// [`FreeIdFilteredIdGenerator`].
pub struct FreeIdFilteredIdGeneratorFactory {
    delegate: Arc<dyn IdGeneratorFactory>,
    condition: Arc<dyn ReuseCondition>,
    registry: Mutex<Registry>,
}

impl FreeIdFilteredIdGeneratorFactory {
    pub fn new(delegate: Arc<dyn IdGeneratorFactory>, condition: Arc<dyn ReuseCondition>) -> Self {
        Self {
            delegate,
            condition,
            registry: Mutex::new(Registry::default()),
        }
    }
}

impl IdGeneratorFactory for FreeIdFilteredIdGeneratorFactory {
    fn open(&self, path: &Path, id_type: IdType, min_high_id: u64) -> Result<Arc<dyn IdGenerator>> {
        let mut registry = lock(&self.registry);
        if let Some(existing) = registry.lookup(path, id_type) {
            return Ok(existing);
        }
        let delegate = self.delegate.open(path, id_type, min_high_id)?;
        let generator: Arc<dyn IdGenerator> =
            Arc::new(FreeIdFilteredIdGenerator::new(delegate, self.condition.clone()));
        registry.register(path, id_type, generator.clone());
        Ok(generator)
    }

    fn create(&self, path: &Path, id_type: IdType, high_id: u64) -> Result<()> {
        self.delegate.create(path, id_type, high_id)
    }

    fn get(&self, id_type: IdType) -> Option<Arc<dyn IdGenerator>> {
        lock(&self.registry)
            .by_type
            .get(&id_type)
            .filter(|generator| !generator.is_closed())
            .cloned()
    }
}

/// Builds the generator factory for a member.
///
/// Freed ids are gated by `condition`, or never reused when
/// `config.reuse_freed_ids` is off.
pub fn id_generator_factory(
    config: &Config,
    acquirer: Arc<ReplicatedIdRangeAcquirer>,
    condition: Arc<dyn ReuseCondition>,
) -> Arc<dyn IdGeneratorFactory> {
    let condition: Arc<dyn ReuseCondition> = if config.reuse_freed_ids {
        condition
    } else {
        Arc::new(NeverReuse)
    };
    Arc::new(FreeIdFilteredIdGeneratorFactory::new(
        Arc::new(ReplicatedIdGeneratorFactory::new(acquirer)),
        condition,
    ))
}
