use crate::{canonical_json, ParseInput, ParsedSchema, ProviderError, SchemaProvider};
use models::{Metadata, RuleSet, SchemaReference};
use serde_json::Value;

pub const JSON: &str = "JSON";

pub struct JsonProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchema {
    pub(crate) value: Value,
    pub(crate) canonical: String,
    pub(crate) references: Vec<SchemaReference>,
    pub(crate) metadata: Option<Metadata>,
    pub(crate) rule_set: Option<RuleSet>,
}

impl JsonSchema {
    pub fn deep_equals(&self, other: &JsonSchema) -> bool {
        self.value == other.value
    }

    /// Can this schema read documents valid under `writer`? A structural
    /// check over type, enum, required, properties, and items.
    pub(crate) fn can_read(&self, writer: &JsonSchema) -> Vec<String> {
        let mut errors = Vec::new();
        check_readable(&self.value, &writer.value, "#", &mut errors);
        errors
    }
}

impl SchemaProvider for JsonProvider {
    fn schema_type(&self) -> &'static str {
        JSON
    }

    fn parse(&self, input: &ParseInput<'_>) -> Result<ParsedSchema, ProviderError> {
        let invalid = |detail: String| ProviderError::Invalid {
            schema_type: JSON,
            detail,
        };

        let value: Value =
            serde_json::from_str(input.raw).map_err(|err| invalid(err.to_string()))?;

        if !matches!(value, Value::Object(_) | Value::Bool(_)) {
            return Err(invalid("schema must be an object or boolean".to_string()));
        }

        // Meta-validate strictly on new registrations. Schemas carrying
        // references are parsed structurally only, as their `$ref` targets
        // resolve through the registry rather than retrieval.
        if input.is_new && input.references.is_empty() {
            jsonschema::validator_for(&value).map_err(|err| invalid(err.to_string()))?;
        }

        Ok(ParsedSchema::Json(JsonSchema {
            canonical: canonical_json(&value),
            value,
            references: input.references.to_vec(),
            metadata: None,
            rule_set: None,
        }))
    }
}

fn type_set(schema: &Value) -> Option<Vec<&str>> {
    match schema.get("type") {
        Some(Value::String(s)) => Some(vec![s.as_str()]),
        Some(Value::Array(a)) => Some(a.iter().filter_map(Value::as_str).collect()),
        _ => None,
    }
}

fn str_array<'v>(schema: &'v Value, field: &str) -> Vec<&'v str> {
    schema
        .get(field)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

// Whether documents valid under `writer` are valid under `reader`.
fn check_readable(reader: &Value, writer: &Value, path: &str, errors: &mut Vec<String>) {
    if reader == writer {
        return;
    }
    match (reader, writer) {
        (Value::Bool(true), _) | (_, Value::Bool(false)) => return,
        (Value::Bool(false), _) => {
            errors.push(format!("at {path}: reader accepts nothing"));
            return;
        }
        _ => (),
    }

    if let (Some(reader_types), Some(writer_types)) = (type_set(reader), type_set(writer)) {
        for t in &writer_types {
            if !reader_types.contains(t) {
                errors.push(format!("at {path}: writer type {t:?} is not readable"));
            }
        }
    }

    if let Some(reader_enum) = reader.get("enum").and_then(Value::as_array) {
        for value in str_array(writer, "enum") {
            if !reader_enum.iter().any(|v| v.as_str() == Some(value)) {
                errors.push(format!("at {path}: enum value {value:?} was narrowed away"));
            }
        }
    }

    // A property the reader newly requires must either be required of the
    // writer's documents already, or carry a default.
    let writer_required = str_array(writer, "required");
    for name in str_array(reader, "required") {
        let has_default = reader
            .get("properties")
            .and_then(|p| p.get(name))
            .and_then(|p| p.get("default"))
            .is_some();
        if !writer_required.contains(&name) && !has_default {
            errors.push(format!(
                "at {path}: newly required property {name:?} has no default"
            ));
        }
    }

    if let (Some(Value::Object(reader_props)), Some(Value::Object(writer_props))) =
        (reader.get("properties"), writer.get("properties"))
    {
        for (name, reader_prop) in reader_props {
            if let Some(writer_prop) = writer_props.get(name) {
                check_readable(reader_prop, writer_prop, &format!("{path}/{name}"), errors);
            }
        }
    }

    if let (Some(reader_items), Some(writer_items)) = (reader.get("items"), writer.get("items")) {
        check_readable(reader_items, writer_items, &format!("{path}/items"), errors);
    }
}
