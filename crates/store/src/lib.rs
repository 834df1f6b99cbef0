mod cache;
mod id_generator;
mod serializer;
mod store;
mod transport;

pub use cache::{subject_versions_range, LookupCache, SchemaFingerprint, SchemaIdAndSubjects};
pub use id_generator::{IdGenerator, IncrementalIdGenerator};
pub use serializer::{JsonSerializer, Serializer};
pub use store::{LogStore, LogStoreOptions, StoreUpdateHandler};
pub use transport::{Epoch, LogRecord, LogTransport, MemoryLog};

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("this node is not the leader")]
    NotLeader,
    #[error("producer epoch {epoch} was fenced by newer epoch {latest}")]
    Fenced { epoch: Epoch, latest: Epoch },
    #[error("timed out after {0:?} waiting for the local log reader")]
    Timeout(Duration),
    #[error("record of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("failed to serialize or deserialize a log record")]
    Serialization(#[from] serde_json::Error),
    #[error("id generator has not been initialized on this node")]
    NotInitialized,
    #[error("log transport is unavailable: {0}")]
    Unavailable(String),
}
