mod compatibility;
mod config;
mod mode;
mod records;
mod schema;
mod subjects;

pub use compatibility::CompatibilityLevel;
pub use config::{Config, Metadata, Rule, RuleSet};
pub use mode::Mode;
pub use records::{
    ClearSubjectValue, ConfigValue, ContextValue, DeleteSubjectValue, ModeValue, RegistryKey,
    RegistryValue, SchemaValue,
};
pub use schema::{LookupFilter, RegisterRequest, Schema, SchemaReference};
pub use subjects::{
    context_of, QualifiedSubject, CONTEXT_DELIMITER, CONTEXT_PREFIX, CONTEXT_WILDCARD,
    DEFAULT_CONTEXT, DEFAULT_TENANT,
};

/// The smallest version a subject may hold.
pub const MIN_VERSION: i32 = 1;
/// Sentinel requesting the latest undeleted version of a subject.
pub const LATEST_VERSION: i32 = -1;
/// The largest representable version.
pub const MAX_VERSION: i32 = i32::MAX;
