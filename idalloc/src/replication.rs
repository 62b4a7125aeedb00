use async_trait::async_trait;

use crate::dispatch::CommandOutcome;
use crate::error::Result;
use crate::serde::ReplicatedContent;

/// Proposes content to the replicated log.
///
/// Resolves once the content has been committed and applied on this member,
/// returning the local effect of applying it. Delivery to other members is
/// the implementation's concern.
#[async_trait]
pub trait Replicator: Send + Sync {
    async fn replicate(&self, content: ReplicatedContent) -> Result<CommandOutcome>;
}
