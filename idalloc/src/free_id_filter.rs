//! Gates freed-id reuse on a [`ReuseCondition`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::generator::IdGenerator;
use crate::model::{IdRange, IdType};
use crate::reuse::ReuseCondition;

/// Forwards `free_id` to the wrapped generator only while the reuse
/// condition holds. Ids freed at any other time are never reused.
pub struct FreeIdFilteredIdGenerator {
    delegate: Arc<dyn IdGenerator>,
    condition: Arc<dyn ReuseCondition>,
}

impl FreeIdFilteredIdGenerator {
    pub fn new(delegate: Arc<dyn IdGenerator>, condition: Arc<dyn ReuseCondition>) -> Self {
        Self {
            delegate,
            condition,
        }
    }
}

#[async_trait]
impl IdGenerator for FreeIdFilteredIdGenerator {
    fn id_type(&self) -> IdType {
        self.delegate.id_type()
    }

    async fn next_id(&self) -> Result<u64> {
        self.delegate.next_id().await
    }

    async fn next_id_batch(&self, size: u64) -> Result<IdRange> {
        self.delegate.next_id_batch(size).await
    }

    async fn free_id(&self, id: u64) -> Result<()> {
        if self.condition.is_satisfied() {
            return self.delegate.free_id(id).await;
        }
        warn!(id_type = %self.delegate.id_type(), id, "not reusing freed id");
        Ok(())
    }

    async fn high_id(&self) -> u64 {
        self.delegate.high_id().await
    }

    async fn set_high_id(&self, high_id: u64) -> Result<()> {
        self.delegate.set_high_id(high_id).await
    }

    async fn highest_possible_id_in_use(&self) -> i64 {
        self.delegate.highest_possible_id_in_use().await
    }

    async fn number_of_ids_in_use(&self) -> u64 {
        self.delegate.number_of_ids_in_use().await
    }

    async fn defrag_count(&self) -> u64 {
        self.delegate.defrag_count().await
    }

    async fn flush(&self) -> Result<()> {
        self.delegate.flush().await
    }

    async fn close(&self) -> Result<()> {
        self.delegate.close().await
    }

    fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }
}
