use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("version {version} is not the next version of subject {subject}")]
    InvalidVersion { subject: String, version: i32 },
    #[error("schema is incompatible with an earlier schema: {}", .0.join("; "))]
    IncompatibleSchema(Vec<String>),
    #[error("operation not permitted: {0}")]
    OperationNotPermitted(String),
    #[error("schema is referenced by ids {0:?}")]
    ReferenceExists(Vec<i32>),
    #[error("serialized schema record of {size} bytes exceeds the {limit} byte limit")]
    SchemaTooLarge { size: usize, limit: usize },
    #[error("subject {0} was not found")]
    SubjectNotFound(String),
    #[error("version {version} of subject {subject} was not found")]
    VersionNotFound { subject: String, version: i32 },
    #[error("schema with id {0} was not found")]
    SchemaNotFound(i32),
    #[error("subject {0} must be soft-deleted before it is permanently deleted")]
    SubjectNotSoftDeleted(String),
    #[error("version {version} of subject {subject} must be soft-deleted before it is permanently deleted")]
    SchemaVersionNotSoftDeleted { subject: String, version: i32 },
    #[error("no leader is known; retry once an election completes")]
    UnknownLeader,
    #[error("this node is not the leader")]
    NotLeader,
    #[error("failed to forward the request to the leader: {0}")]
    RequestForwarding(String),
    #[error("the leader rejected the request with status {status} error code {code}: {message}")]
    Rest {
        status: u16,
        code: i32,
        message: String,
    },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("store failure: {0}")]
    Store(String),
    #[error("failed to reserve a fresh schema id within {0} attempts")]
    IdGeneration(u32),
    #[error("initialization failed: {0}")]
    Initialization(String),
}

impl From<store::StoreError> for RegistryError {
    fn from(err: store::StoreError) -> Self {
        use store::StoreError::*;
        match err {
            NotLeader | Fenced { .. } => RegistryError::NotLeader,
            Timeout(timeout) => RegistryError::Timeout(timeout),
            TooLarge { size, limit } => RegistryError::SchemaTooLarge { size, limit },
            NotInitialized => RegistryError::Store(err.to_string()),
            Serialization(_) | Unavailable(_) => RegistryError::Store(err.to_string()),
        }
    }
}

impl From<providers::ProviderError> for RegistryError {
    fn from(err: providers::ProviderError) -> Self {
        RegistryError::InvalidSchema(err.to_string())
    }
}
