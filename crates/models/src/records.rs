use super::{Config, Metadata, Mode, RuleSet, SchemaReference};
use serde::{Deserialize, Serialize};

/// Key of a durable registry record.
///
/// The key is the log-compaction identity: equal keys overwrite, and a nil
/// value tombstones. Variant order (and field order within `Schema`) defines
/// the total order used by ranged scans, so all versions of one subject are
/// contiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "keytype")]
pub enum RegistryKey {
    /// Read-barrier sentinel; never materialized.
    #[serde(rename = "NOOP")]
    Noop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
    },
    /// Per-subject configuration, or global when `subject` is absent.
    #[serde(rename = "CONFIG")]
    Config {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
    },
    /// Per-subject mode, or global when `subject` is absent.
    #[serde(rename = "MODE")]
    Mode {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
    },
    /// Marker that a non-default context exists within a tenant.
    #[serde(rename = "CONTEXT")]
    Context { tenant: String, context: String },
    /// Cache-clearing event written on mode transitions into IMPORT.
    #[serde(rename = "CLEAR_SUBJECT")]
    ClearSubject { subject: String },
    /// Soft-delete watermark for an entire subject.
    #[serde(rename = "DELETE_SUBJECT")]
    DeleteSubject { subject: String },
    /// One registered schema version.
    #[serde(rename = "SCHEMA")]
    Schema { subject: String, version: i32 },
}

impl RegistryKey {
    pub fn schema(subject: impl Into<String>, version: i32) -> Self {
        RegistryKey::Schema {
            subject: subject.into(),
            version,
        }
    }

    /// The subject this key belongs to, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            RegistryKey::Noop { subject }
            | RegistryKey::Config { subject }
            | RegistryKey::Mode { subject } => subject.as_deref(),
            RegistryKey::Context { .. } => None,
            RegistryKey::ClearSubject { subject }
            | RegistryKey::DeleteSubject { subject }
            | RegistryKey::Schema { subject, .. } => Some(subject),
        }
    }
}

/// One registered schema version as durably recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaValue {
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
    /// Canonical schema text.
    pub schema: String,
    #[serde(default)]
    pub deleted: bool,
}

pub(crate) fn default_schema_type() -> String {
    "AVRO".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(flatten)]
    pub config: Config,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextValue {
    pub tenant: String,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSubjectValue {
    pub subject: String,
    /// Versions at or below this watermark are soft-deleted.
    pub version: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearSubjectValue {
    pub subject: String,
}

/// Value of a durable registry record. The discriminator mirrors the key's,
/// which lets either side of a record be decoded standalone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "keytype")]
pub enum RegistryValue {
    #[serde(rename = "NOOP")]
    Noop,
    #[serde(rename = "CONFIG")]
    Config(ConfigValue),
    #[serde(rename = "MODE")]
    Mode(ModeValue),
    #[serde(rename = "CONTEXT")]
    Context(ContextValue),
    #[serde(rename = "CLEAR_SUBJECT")]
    ClearSubject(ClearSubjectValue),
    #[serde(rename = "DELETE_SUBJECT")]
    DeleteSubject(DeleteSubjectValue),
    #[serde(rename = "SCHEMA")]
    Schema(SchemaValue),
}

impl RegistryValue {
    pub fn as_schema(&self) -> Option<&SchemaValue> {
        match self {
            RegistryValue::Schema(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_config(&self) -> Option<&ConfigValue> {
        match self {
            RegistryValue::Config(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_mode(&self) -> Option<&ModeValue> {
        match self {
            RegistryValue::Mode(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_order_groups_subject_versions() {
        let mut keys = vec![
            RegistryKey::schema("b", 2),
            RegistryKey::schema("a", 10),
            RegistryKey::Config { subject: None },
            RegistryKey::schema("a", 2),
            RegistryKey::Mode {
                subject: Some("a".to_string()),
            },
            RegistryKey::schema("b", 1),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                RegistryKey::Config { subject: None },
                RegistryKey::Mode {
                    subject: Some("a".to_string())
                },
                RegistryKey::schema("a", 2),
                RegistryKey::schema("a", 10),
                RegistryKey::schema("b", 1),
                RegistryKey::schema("b", 2),
            ]
        );
    }

    #[test]
    fn test_key_wire_form() {
        let key = RegistryKey::schema("orders-value", 3);
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"keytype": "SCHEMA", "subject": "orders-value", "version": 3})
        );
        let back: RegistryKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_schema_value_defaults() {
        let value: SchemaValue = serde_json::from_value(serde_json::json!({
            "subject": "s",
            "version": 1,
            "id": 7,
            "schema": "\"string\"",
        }))
        .unwrap();
        assert_eq!(value.schema_type, "AVRO");
        assert!(!value.deleted);
        assert!(value.references.is_empty());
    }
}
