use crate::StoreError;
use models::SchemaValue;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Source of globally unique schema ids.
///
/// `init` runs after every leader transition which makes this node leader,
/// once its reader has caught up to the log tail. No id may be handed out
/// before then.
pub trait IdGenerator: Send + Sync + 'static {
    fn id(&self, schema: &SchemaValue) -> Result<i32, StoreError>;
    fn max_id(&self, schema: &SchemaValue) -> i32;
    /// Seed from the largest id observed in the caught-up cache.
    fn init(&self, observed_max: i32);
    /// Advance the sequence past an imported, caller-chosen id.
    fn ensure_at_least(&self, id: i32);
}

/// Monotonically increasing ids, one past the observed maximum.
pub struct IncrementalIdGenerator {
    max: AtomicI32,
    initialized: AtomicBool,
}

impl IncrementalIdGenerator {
    pub fn new() -> Self {
        Self {
            max: AtomicI32::new(0),
            initialized: AtomicBool::new(false),
        }
    }
}

impl Default for IncrementalIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for IncrementalIdGenerator {
    fn id(&self, _schema: &SchemaValue) -> Result<i32, StoreError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(StoreError::NotInitialized);
        }
        Ok(self.max.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn max_id(&self, _schema: &SchemaValue) -> i32 {
        self.max.load(Ordering::Acquire)
    }

    fn init(&self, observed_max: i32) {
        self.max.fetch_max(observed_max, Ordering::AcqRel);
        self.initialized.store(true, Ordering::Release);
    }

    fn ensure_at_least(&self, id: i32) {
        self.max.fetch_max(id, Ordering::AcqRel);
    }
}
