use super::records::default_schema_type;
use super::{Metadata, RuleSet, SchemaValue};
use serde::{Deserialize, Serialize};

/// A named reference from one schema to a registered (subject, version).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaReference {
    /// The name by which the referencing schema imports this one,
    /// e.g. an Avro fullname or a Protobuf file path.
    pub name: String,
    pub subject: String,
    pub version: i32,
}

/// A client registration request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Caller-chosen id; requires IMPORT mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    /// Caller-chosen version; must match the next version outside IMPORT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<SchemaReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<RuleSet>,
    #[serde(default)]
    pub schema: String,
}

impl RegisterRequest {
    pub fn of(schema_type: &str, schema: &str) -> Self {
        Self {
            schema_type: Some(schema_type.to_string()),
            schema: schema.to_string(),
            ..Default::default()
        }
    }

    /// An empty request carries no type, no text, and no references. It asks
    /// the registry to copy the latest version forward with new metadata.
    pub fn is_empty_schema(&self) -> bool {
        self.schema.trim().is_empty() && self.schema_type.is_none() && self.references.is_empty()
    }
}

/// A materialized schema as returned from lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub subject: String,
    pub version: i32,
    pub id: i32,
    #[serde(default = "default_schema_type")]
    pub schema_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<SchemaReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<RuleSet>,
    pub schema: String,
}

impl From<SchemaValue> for Schema {
    fn from(v: SchemaValue) -> Self {
        Schema {
            subject: v.subject,
            version: v.version,
            id: v.id,
            schema_type: v.schema_type,
            references: v.references,
            metadata: v.metadata,
            rule_set: v.rule_set,
            schema: v.schema,
        }
    }
}

/// Whether lookups observe soft-deleted records.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LookupFilter {
    /// Soft-deleted records are invisible.
    Default,
    /// Soft-deleted records are returned; tombstones never are.
    IncludeDeleted,
}

impl LookupFilter {
    pub fn admits(&self, deleted: bool) -> bool {
        match self {
            LookupFilter::Default => !deleted,
            LookupFilter::IncludeDeleted => true,
        }
    }
}
