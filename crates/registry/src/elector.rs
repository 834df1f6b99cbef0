use crate::{RegistryError, SchemaRegistry};
use std::sync::{Arc, Weak};

/// Elects at most one leader among eligible nodes and reports changes to
/// the registry core via [`SchemaRegistry::on_leader_change`].
///
/// Correctness does not rest on the elector alone: the log transport fences
/// producer epochs, so a deposed leader's writes are rejected regardless of
/// how promptly it learns of its demotion.
#[async_trait::async_trait]
pub trait LeaderElector: Send + Sync + 'static {
    async fn init(&self) -> Result<(), RegistryError>;
    async fn close(&self);
}

/// Single-node election: the local node becomes leader immediately, if
/// eligible. Multi-node deployments supply an elector backed by their
/// coordination service.
pub struct StaticElector {
    registry: Weak<SchemaRegistry>,
    epoch: store::Epoch,
}

impl StaticElector {
    pub fn new(registry: &Arc<SchemaRegistry>, epoch: store::Epoch) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            epoch,
        }
    }
}

#[async_trait::async_trait]
impl LeaderElector for StaticElector {
    async fn init(&self) -> Result<(), RegistryError> {
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };
        if !registry.config.leader_eligibility {
            tracing::info!("node is not leader-eligible; remaining a follower");
            return Ok(());
        }
        let identity = registry.identity().clone();
        registry.on_leader_change(Some(identity), self.epoch).await
    }

    async fn close(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let _ = registry.on_leader_change(None, self.epoch).await;
        }
    }
}
