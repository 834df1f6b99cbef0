mod avro;
mod json;
mod parse_cache;

pub use avro::{AvroProvider, AvroSchema, AVRO};
pub use json::{JsonProvider, JsonSchema, JSON};
pub use parse_cache::ParseCacheOptions;

use models::{CompatibilityLevel, Metadata, RuleSet, SchemaReference};
use parse_cache::ParseCache;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no schema provider is registered for type {0:?}")]
    UnknownSchemaType(String),
    #[error("invalid {schema_type} schema: {detail}")]
    Invalid {
        schema_type: &'static str,
        detail: String,
    },
    #[error("unknown rendering format {0:?}")]
    UnknownFormat(String),
}

/// Input to a provider's parse: the raw text, declared references, and the
/// canonical texts those references resolved to, in dependency order.
pub struct ParseInput<'a> {
    pub raw: &'a str,
    pub references: &'a [SchemaReference],
    pub resolved_references: &'a [(String, String)],
    /// New registrations are validated strictly; historical schemas are
    /// parsed leniently so old records never become unreadable.
    pub is_new: bool,
    pub normalize: bool,
}

/// Per-type schema parsing, canonicalization, and compatibility judgment.
pub trait SchemaProvider: Send + Sync + 'static {
    fn schema_type(&self) -> &'static str;
    fn parse(&self, input: &ParseInput<'_>) -> Result<ParsedSchema, ProviderError>;
}

/// A parsed schema of some registered type.
///
/// Metadata and rule sets ride along with the parsed form but are attached
/// by the caller, after parsing, so cached parses are shared across
/// registrations that differ only in annotations.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSchema {
    Avro(AvroSchema),
    Json(JsonSchema),
}

impl ParsedSchema {
    pub fn schema_type(&self) -> &'static str {
        match self {
            ParsedSchema::Avro(_) => AVRO,
            ParsedSchema::Json(_) => JSON,
        }
    }

    /// The canonical text stored in and served from the registry.
    pub fn canonical_string(&self) -> &str {
        match self {
            ParsedSchema::Avro(s) => &s.canonical,
            ParsedSchema::Json(s) => &s.canonical,
        }
    }

    pub fn references(&self) -> &[SchemaReference] {
        match self {
            ParsedSchema::Avro(s) => &s.references,
            ParsedSchema::Json(s) => &s.references,
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            ParsedSchema::Avro(s) => s.metadata.as_ref(),
            ParsedSchema::Json(s) => s.metadata.as_ref(),
        }
    }

    pub fn rule_set(&self) -> Option<&RuleSet> {
        match self {
            ParsedSchema::Avro(s) => s.rule_set.as_ref(),
            ParsedSchema::Json(s) => s.rule_set.as_ref(),
        }
    }

    /// Copy with replacement annotations.
    pub fn with_metadata_rule_set(
        &self,
        metadata: Option<Metadata>,
        rule_set: Option<RuleSet>,
    ) -> ParsedSchema {
        let mut copy = self.clone();
        match &mut copy {
            ParsedSchema::Avro(s) => {
                s.metadata = metadata;
                s.rule_set = rule_set;
            }
            ParsedSchema::Json(s) => {
                s.metadata = metadata;
                s.rule_set = rule_set;
            }
        }
        copy
    }

    /// Re-render the canonical text from the resolved parse, unifying
    /// attribute placement that plain canonicalization leaves alone.
    pub fn normalize(&self) -> ParsedSchema {
        let mut copy = self.clone();
        if let ParsedSchema::Avro(s) = &mut copy {
            s.canonical = s.resolved_string();
        }
        copy
    }

    /// Structural equality after reference resolution, ignoring annotations.
    pub fn deep_equals(&self, other: &ParsedSchema) -> bool {
        match (self, other) {
            (ParsedSchema::Avro(a), ParsedSchema::Avro(b)) => a.deep_equals(b),
            (ParsedSchema::Json(a), ParsedSchema::Json(b)) => a.deep_equals(b),
            _ => false,
        }
    }

    /// Judge this schema against prior versions, latest first.
    /// An empty list of messages means the schema is compatible.
    pub fn is_compatible(
        &self,
        level: CompatibilityLevel,
        previous: &[Arc<ParsedSchema>],
    ) -> Vec<String> {
        if level == CompatibilityLevel::None {
            return Vec::new();
        }

        let candidates: Vec<&Arc<ParsedSchema>> = if level.is_transitive() {
            previous.iter().collect()
        } else {
            previous.first().into_iter().collect()
        };

        let mut errors = Vec::new();
        for prior in candidates {
            if prior.schema_type() != self.schema_type() {
                errors.push(format!(
                    "prior version is of type {} but this schema is {}",
                    prior.schema_type(),
                    self.schema_type()
                ));
                continue;
            }
            if level.checks_backward() {
                errors.extend(self.check_can_read(prior, "backward"));
            }
            if level.checks_forward() {
                errors.extend(prior.check_can_read(self, "forward"));
            }
        }
        errors
    }

    // Can `self` read data written with `writer`?
    fn check_can_read(&self, writer: &ParsedSchema, direction: &str) -> Vec<String> {
        let errors = match (self, writer) {
            (ParsedSchema::Avro(reader), ParsedSchema::Avro(writer)) => reader.can_read(writer),
            (ParsedSchema::Json(reader), ParsedSchema::Json(writer)) => reader.can_read(writer),
            _ => vec!["schema types differ".to_string()],
        };
        errors
            .into_iter()
            .map(|detail| format!("{direction} incompatibility: {detail}"))
            .collect()
    }

    /// Render in a named format. `None` serves the canonical text.
    pub fn formatted_string(&self, format: Option<&str>) -> Result<String, ProviderError> {
        match format {
            None | Some("default") => Ok(self.canonical_string().to_string()),
            Some("resolved") => match self {
                ParsedSchema::Avro(s) => Ok(s.resolved_string()),
                ParsedSchema::Json(s) => Ok(s.canonical.clone()),
            },
            Some(other) => Err(ProviderError::UnknownFormat(other.to_string())),
        }
    }
}

/// Dispatch table of providers, keyed by schema-type string, with a bounded
/// parse cache in front.
pub struct SchemaProviders {
    providers: HashMap<String, Arc<dyn SchemaProvider>>,
    cache: ParseCache,
}

impl SchemaProviders {
    /// The default registrations: AVRO and JSON.
    pub fn new(cache: ParseCacheOptions) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            cache: ParseCache::new(cache),
        };
        registry.register(Arc::new(AvroProvider));
        registry.register(Arc::new(JsonProvider));
        registry
    }

    /// Register an additional provider; replaces a same-typed one.
    pub fn register(&mut self, provider: Arc<dyn SchemaProvider>) {
        self.providers
            .insert(provider.schema_type().to_string(), provider);
    }

    pub fn schema_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.providers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Parse through the cache.
    pub fn parse(
        &self,
        schema_type: &str,
        input: &ParseInput<'_>,
    ) -> Result<Arc<ParsedSchema>, ProviderError> {
        let provider = self
            .providers
            .get(schema_type)
            .ok_or_else(|| ProviderError::UnknownSchemaType(schema_type.to_string()))?;

        self.cache.get_or_parse(schema_type, input, || provider.parse(input))
    }
}

// Compact serialization of a JSON value; object keys are ordered, so two
// texts differing only in member order or whitespace canonicalize equally.
pub(crate) fn canonical_json(value: &serde_json::Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(registry: &SchemaProviders, schema_type: &str, raw: &str) -> Arc<ParsedSchema> {
        registry
            .parse(
                schema_type,
                &ParseInput {
                    raw,
                    references: &[],
                    resolved_references: &[],
                    is_new: true,
                    normalize: false,
                },
            )
            .unwrap()
    }

    #[test]
    fn test_dispatch_and_unknown_type() {
        let registry = SchemaProviders::new(ParseCacheOptions::default());
        assert_eq!(registry.schema_types(), vec!["AVRO", "JSON"]);

        let parsed = parse(&registry, AVRO, r#"{"type": "string"}"#);
        assert_eq!(parsed.schema_type(), AVRO);

        let err = registry
            .parse(
                "PROTOBUF",
                &ParseInput {
                    raw: "",
                    references: &[],
                    resolved_references: &[],
                    is_new: true,
                    normalize: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownSchemaType(_)));
    }

    #[test]
    fn test_canonicalization_unifies_forms() {
        let registry = SchemaProviders::new(ParseCacheOptions::default());

        let a = parse(
            &registry,
            AVRO,
            r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"}]}"#,
        );
        let b = parse(
            &registry,
            AVRO,
            r#"{ "name": "R", "type": "record", "fields": [ {"type": "int", "name": "a"} ] }"#,
        );
        assert_eq!(a.canonical_string(), b.canonical_string());
        assert!(a.deep_equals(&b));
    }

    #[test]
    fn test_annotations_do_not_affect_equality() {
        let registry = SchemaProviders::new(ParseCacheOptions::default());
        let plain = parse(&registry, JSON, r#"{"type":"object"}"#);

        let annotated = plain.with_metadata_rule_set(
            Some(models::Metadata {
                properties: [("owner".to_string(), "data".to_string())].into(),
                ..Default::default()
            }),
            None,
        );
        assert!(plain.deep_equals(&annotated));
        assert_eq!(annotated.metadata().unwrap().properties["owner"], "data");
    }
}
