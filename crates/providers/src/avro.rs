use crate::{canonical_json, ParseInput, ParsedSchema, ProviderError, SchemaProvider};
use apache_avro::schema_compatibility::SchemaCompatibility;
use models::{Metadata, RuleSet, SchemaReference};

pub const AVRO: &str = "AVRO";

pub struct AvroProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct AvroSchema {
    pub(crate) parsed: apache_avro::Schema,
    pub(crate) canonical: String,
    pub(crate) references: Vec<SchemaReference>,
    pub(crate) metadata: Option<Metadata>,
    pub(crate) rule_set: Option<RuleSet>,
}

impl AvroSchema {
    pub fn deep_equals(&self, other: &AvroSchema) -> bool {
        self.parsed == other.parsed
    }

    /// Can this schema read data written with `writer`?
    pub(crate) fn can_read(&self, writer: &AvroSchema) -> Vec<String> {
        match SchemaCompatibility::can_read(&writer.parsed, &self.parsed) {
            Ok(()) => Vec::new(),
            Err(err) => vec![err.to_string()],
        }
    }

    /// The schema with named references substituted by their definitions.
    pub(crate) fn resolved_string(&self) -> String {
        serde_json::to_value(&self.parsed)
            .map(|v| canonical_json(&v))
            .unwrap_or_else(|_| self.canonical.clone())
    }
}

impl SchemaProvider for AvroProvider {
    fn schema_type(&self) -> &'static str {
        AVRO
    }

    fn parse(&self, input: &ParseInput<'_>) -> Result<ParsedSchema, ProviderError> {
        let invalid = |detail: String| ProviderError::Invalid {
            schema_type: AVRO,
            detail,
        };

        // Referenced schemas parse first so named types resolve, in the
        // dependency order the caller resolved them.
        let mut texts: Vec<&str> = input
            .resolved_references
            .iter()
            .map(|(_, text)| text.as_str())
            .collect();
        texts.push(input.raw);

        let mut schemas =
            apache_avro::Schema::parse_list(&texts).map_err(|err| invalid(err.to_string()))?;
        let parsed = schemas
            .pop()
            .ok_or_else(|| invalid("empty schema".to_string()))?;

        // The canonical text preserves every attribute (defaults included);
        // only member order and whitespace are unified. Normalization
        // additionally re-renders from the resolved parse, unifying aliases
        // and attribute placement.
        let value: serde_json::Value =
            serde_json::from_str(input.raw).map_err(|err| invalid(err.to_string()))?;
        let canonical = if input.normalize {
            serde_json::to_value(&parsed)
                .map(|v| canonical_json(&v))
                .map_err(|err| invalid(err.to_string()))?
        } else {
            canonical_json(&value)
        };

        Ok(ParsedSchema::Avro(AvroSchema {
            parsed,
            canonical,
            references: input.references.to_vec(),
            metadata: None,
            rule_set: None,
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::CompatibilityLevel;
    use std::sync::Arc;

    fn parse(raw: &str) -> Arc<ParsedSchema> {
        Arc::new(
            AvroProvider
                .parse(&ParseInput {
                    raw,
                    references: &[],
                    resolved_references: &[],
                    is_new: true,
                    normalize: false,
                })
                .unwrap(),
        )
    }

    const RECORD_A: &str = r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"}]}"#;

    #[test]
    fn test_rejects_malformed_schema() {
        let err = AvroProvider
            .parse(&ParseInput {
                raw: r#"{"type": "record"}"#,
                references: &[],
                resolved_references: &[],
                is_new: true,
                normalize: false,
            })
            .unwrap_err();
        assert!(matches!(err, ProviderError::Invalid { .. }));
    }

    #[test]
    fn test_reference_resolution() {
        let referenced = r#"{"type":"record","name":"Inner","fields":[{"name":"x","type":"long"}]}"#;
        let referrer = r#"{"type":"record","name":"Outer","fields":[{"name":"inner","type":"Inner"}]}"#;

        // Unresolvable without the reference.
        assert!(AvroProvider
            .parse(&ParseInput {
                raw: referrer,
                references: &[],
                resolved_references: &[],
                is_new: true,
                normalize: false,
            })
            .is_err());

        let resolved = vec![("Inner".to_string(), referenced.to_string())];
        let parsed = AvroProvider
            .parse(&ParseInput {
                raw: referrer,
                references: &[],
                resolved_references: &resolved,
                is_new: true,
                normalize: false,
            })
            .unwrap();
        assert_eq!(parsed.schema_type(), AVRO);
    }

    #[test]
    fn test_backward_compatibility() {
        let base = parse(RECORD_A);

        // A new required field without a default cannot read old data.
        let incompatible = parse(
            r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"},{"name":"b","type":"string"}]}"#,
        );
        let errors = incompatible.is_compatible(CompatibilityLevel::Backward, &[base.clone()]);
        assert!(!errors.is_empty());

        // With a default it can.
        let compatible = parse(
            r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"},{"name":"b","type":"string","default":"x"}]}"#,
        );
        let errors = compatible.is_compatible(CompatibilityLevel::Backward, &[base]);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_transitive_checks_all_priors() {
        let v1 = parse(RECORD_A);
        let v2 = parse(
            r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"},{"name":"b","type":"string","default":"x"}]}"#,
        );

        // Dropping field `a` entirely: still readable with v2's data but the
        // check against v1 also passes backward (readers ignore unknown
        // fields), so exercise forward where it fails.
        let v3 = parse(r#"{"type":"record","name":"R","fields":[{"name":"b","type":"string"}]}"#);

        let errors =
            v3.is_compatible(CompatibilityLevel::FullTransitive, &[v2.clone(), v1.clone()]);
        assert!(!errors.is_empty());

        let errors = v2.is_compatible(CompatibilityLevel::FullTransitive, &[v1]);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_canonical_preserves_defaults() {
        let parsed = parse(
            r#"{"type": "record", "name": "R", "fields": [{"name": "b", "type": "string", "default": "x"}]}"#,
        );
        assert!(parsed.canonical_string().contains("\"default\":\"x\""));
    }
}
