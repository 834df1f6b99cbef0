use models::{
    context_of, Mode, QualifiedSubject, RegistryKey, RegistryValue, SchemaReference, SchemaValue,
    CONTEXT_WILDCARD, DEFAULT_TENANT, MAX_VERSION, MIN_VERSION,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::RangeInclusive;

/// Content address of a schema: an MD5 over the canonical text, references,
/// metadata, rule set, and schema type. The deleted flag is excluded so a
/// soft-deleted registration keeps its address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SchemaFingerprint([u8; 16]);

impl SchemaFingerprint {
    pub fn of(value: &SchemaValue) -> Self {
        let mut ctx = md5::Context::new();
        ctx.consume(value.schema_type.as_bytes());
        ctx.consume([0]);
        ctx.consume(value.schema.as_bytes());
        ctx.consume([0]);
        // These are plain derived types over ordered maps; serialization is
        // deterministic and cannot fail.
        ctx.consume(
            serde_json::to_vec(&(&value.references, &value.metadata, &value.rule_set))
                .expect("serializing schema fingerprint parts cannot fail"),
        );
        Self(ctx.compute().0)
    }
}

/// The id owning a canonical schema form, and every (subject, version)
/// registered with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIdAndSubjects {
    pub id: i32,
    pub subject_versions: BTreeMap<String, i32>,
}

impl SchemaIdAndSubjects {
    pub fn version_of(&self, subject: &str) -> Option<i32> {
        self.subject_versions.get(subject).copied()
    }
}

/// In-memory, ordered materialization of the log.
///
/// The log consumer is the sole writer; apply is deterministic and
/// idempotent, so replaying the same log always converges to the same cache.
#[derive(Default)]
pub struct LookupCache {
    entries: BTreeMap<RegistryKey, RegistryValue>,
    // Maps (context, id) to the schema keys carrying that id within the context.
    ids: HashMap<(String, i32), BTreeSet<(String, i32)>>,
    // Maps a content address to its owning id and registrations.
    hashes: HashMap<SchemaFingerprint, SchemaIdAndSubjects>,
    // Maps a (qualified subject, version) to the ids of schemas referencing it.
    referenced_by: HashMap<(String, i32), BTreeSet<i32>>,
}

/// Inclusive key range covering every version of one subject.
pub fn subject_versions_range(subject: &str) -> RangeInclusive<RegistryKey> {
    RegistryKey::schema(subject, MIN_VERSION)..=RegistryKey::schema(subject, MAX_VERSION)
}

impl LookupCache {
    pub fn get(&self, key: &RegistryKey) -> Option<&RegistryValue> {
        self.entries.get(key)
    }

    /// All records whose keys fall within the inclusive range, in key order.
    pub fn range(&self, range: RangeInclusive<RegistryKey>) -> Vec<(RegistryKey, RegistryValue)> {
        self.entries
            .range(range)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Apply one log record. `None` is a tombstone.
    pub fn apply(&mut self, key: &RegistryKey, value: Option<&RegistryValue>) {
        match (key, value) {
            // Barriers are never materialized.
            (RegistryKey::Noop { .. }, _) => (),

            (RegistryKey::Schema { .. }, Some(RegistryValue::Schema(new))) => {
                let old = self
                    .entries
                    .insert(key.clone(), RegistryValue::Schema(new.clone()));
                if let Some(RegistryValue::Schema(old)) = old {
                    self.unindex_schema(&old, Some(new));
                }
                self.index_schema(new);
            }
            (RegistryKey::Schema { .. }, None) => {
                if let Some(RegistryValue::Schema(old)) = self.entries.remove(key) {
                    self.unindex_schema(&old, None);
                }
            }

            (RegistryKey::DeleteSubject { .. }, Some(RegistryValue::DeleteSubject(mark))) => {
                self.entries
                    .insert(key.clone(), RegistryValue::DeleteSubject(mark.clone()));
                self.soft_delete_subject(&mark.subject, mark.version);
            }
            (RegistryKey::ClearSubject { .. }, Some(RegistryValue::ClearSubject(clear))) => {
                self.entries
                    .insert(key.clone(), RegistryValue::ClearSubject(clear.clone()));
                self.evict_soft_deleted(&clear.subject);
            }

            (_, Some(v)) => {
                self.entries.insert(key.clone(), v.clone());
            }
            (_, None) => {
                self.entries.remove(key);
            }
        }
    }

    fn index_schema(&mut self, new: &SchemaValue) {
        self.ids
            .entry((context_of(&new.subject), new.id))
            .or_default()
            .insert((new.subject.clone(), new.version));

        let entry = self
            .hashes
            .entry(SchemaFingerprint::of(new))
            .or_insert_with(|| SchemaIdAndSubjects {
                id: new.id,
                subject_versions: BTreeMap::new(),
            });
        entry.id = new.id;
        entry.subject_versions.insert(new.subject.clone(), new.version);

        // Only live registrations hold their references.
        if !new.deleted {
            for reference in &new.references {
                self.referenced_by
                    .entry(reference_key(reference, &new.subject))
                    .or_default()
                    .insert(new.id);
            }
        }
    }

    fn unindex_schema(&mut self, old: &SchemaValue, new: Option<&SchemaValue>) {
        if new.map_or(true, |n| n.id != old.id) {
            let ids_key = (context_of(&old.subject), old.id);
            if let Some(keys) = self.ids.get_mut(&ids_key) {
                keys.remove(&(old.subject.clone(), old.version));
                if keys.is_empty() {
                    self.ids.remove(&ids_key);
                }
            }
        }

        let old_fp = SchemaFingerprint::of(old);
        if new.map_or(true, |n| SchemaFingerprint::of(n) != old_fp) {
            if let Some(entry) = self.hashes.get_mut(&old_fp) {
                if entry.version_of(&old.subject) == Some(old.version) {
                    entry.subject_versions.remove(&old.subject);
                }
                if entry.subject_versions.is_empty() {
                    self.hashes.remove(&old_fp);
                }
            }
        }

        let new_keeps_references =
            matches!(new, Some(n) if !n.deleted && n.references == old.references);
        if !new_keeps_references {
            self.remove_reference_entries(&old.references, &old.subject, old.id);
        }
    }

    fn remove_reference_entries(
        &mut self,
        references: &[SchemaReference],
        referrer: &str,
        id: i32,
    ) {
        for reference in references {
            let key = reference_key(reference, referrer);
            if let Some(ids) = self.referenced_by.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.referenced_by.remove(&key);
                }
            }
        }
    }

    // Mark every version at or below the watermark as deleted. Content and
    // id indexes are retained: re-registering an identical schema resurrects
    // the mapping with its original id.
    fn soft_delete_subject(&mut self, subject: &str, watermark: i32) {
        let mut dropped: Vec<(Vec<SchemaReference>, String, i32)> = Vec::new();

        for (_, value) in self.entries.range_mut(subject_versions_range(subject)) {
            if let RegistryValue::Schema(schema) = value {
                if schema.version <= watermark && !schema.deleted {
                    schema.deleted = true;
                    dropped.push((
                        schema.references.clone(),
                        schema.subject.clone(),
                        schema.id,
                    ));
                }
            }
        }
        for (references, referrer, id) in dropped {
            self.remove_reference_entries(&references, &referrer, id);
        }
    }

    // Fully drop soft-deleted versions of the subject, as when transitioning
    // into IMPORT mode, so imported ids and versions cannot collide with
    // ghost state.
    fn evict_soft_deleted(&mut self, subject: &str) {
        let deleted: Vec<(RegistryKey, SchemaValue)> = self
            .entries
            .range(subject_versions_range(subject))
            .filter_map(|(k, v)| match v {
                RegistryValue::Schema(s) if s.deleted => Some((k.clone(), s.clone())),
                _ => None,
            })
            .collect();

        for (key, old) in deleted {
            self.entries.remove(&key);
            self.unindex_schema(&old, None);
        }
    }

    /// Any schema key carrying `id` within the context, preferring an
    /// undeleted registration.
    pub fn schema_key_by_id(&self, id: i32, context: &str) -> Option<RegistryKey> {
        let keys = self.ids.get(&(context.to_string(), id))?;

        let undeleted = keys.iter().find(|(subject, version)| {
            matches!(
                self.entries.get(&RegistryKey::schema(subject, *version)),
                Some(RegistryValue::Schema(s)) if !s.deleted
            )
        });
        undeleted
            .or_else(|| keys.iter().next())
            .map(|(subject, version)| RegistryKey::schema(subject, *version))
    }

    /// Content-addressed lookup of a schema's id and registrations.
    pub fn schema_id_and_subjects(&self, value: &SchemaValue) -> Option<SchemaIdAndSubjects> {
        self.hashes.get(&SchemaFingerprint::of(value)).cloned()
    }

    /// Ids of schemas which reference the given (subject, version).
    pub fn referencing_ids(&self, subject: &str, version: i32) -> BTreeSet<i32> {
        self.referenced_by
            .get(&(subject.to_string(), version))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the given (subject, version) is soft-deleted (or absent).
    pub fn is_deleted(&self, subject: &str, version: i32) -> bool {
        match self.entries.get(&RegistryKey::schema(subject, version)) {
            Some(RegistryValue::Schema(s)) => s.deleted,
            _ => true,
        }
    }

    /// Subjects matching a context-aware prefix. The empty prefix matches
    /// the default context; `:*:` matches every context.
    pub fn subjects(&self, prefix: &str, include_deleted: bool) -> BTreeSet<String> {
        let wildcard = prefix == CONTEXT_WILDCARD;
        let want = QualifiedSubject::parse(prefix);

        let mut out = BTreeSet::new();
        for (key, value) in &self.entries {
            let RegistryValue::Schema(schema) = value else {
                continue;
            };
            if schema.deleted && !include_deleted {
                continue;
            }
            let RegistryKey::Schema { subject, .. } = key else {
                continue;
            };
            if wildcard {
                out.insert(subject.clone());
                continue;
            }
            let got = QualifiedSubject::parse(subject);
            if got.context == want.context && got.name.starts_with(&want.name) {
                out.insert(subject.clone());
            }
        }
        out
    }

    /// All contexts known to the tenant, from context marker records.
    pub fn contexts(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|(key, _)| match key {
                RegistryKey::Context { tenant, context } if tenant == DEFAULT_TENANT => {
                    Some(context.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// The stored mode of a subject (or the global mode when `None`),
    /// without fallback.
    pub fn mode(&self, subject: Option<&str>) -> Option<Mode> {
        self.entries
            .get(&RegistryKey::Mode {
                subject: subject.map(str::to_string),
            })
            .and_then(RegistryValue::as_mode)
            .map(|m| m.mode)
    }

    /// The stored config of a subject (or the global config when `None`),
    /// without fallback.
    pub fn config(&self, subject: Option<&str>) -> Option<models::Config> {
        self.entries
            .get(&RegistryKey::Config {
                subject: subject.map(str::to_string),
            })
            .and_then(RegistryValue::as_config)
            .map(|c| c.config.clone())
    }

    /// The largest schema id observed anywhere in the log.
    pub fn max_schema_id(&self) -> i32 {
        self.ids.keys().map(|(_, id)| *id).max().unwrap_or(0)
    }
}

// References are resolved within the referring schema's context unless they
// are themselves qualified.
fn reference_key(reference: &SchemaReference, referrer: &str) -> (String, i32) {
    let referrer = QualifiedSubject::parse(referrer);
    let referenced = QualifiedSubject::parse(&reference.subject);

    let qualified = if referenced.is_default_context() && !referrer.is_default_context() {
        QualifiedSubject::qualify(&referrer.context, &reference.subject).to_qualified_string()
    } else {
        reference.subject.clone()
    };
    (qualified, reference.version)
}

#[cfg(test)]
mod test {
    use super::*;

    fn schema_value(subject: &str, version: i32, id: i32, schema: &str) -> SchemaValue {
        SchemaValue {
            subject: subject.to_string(),
            version,
            id,
            schema_type: "AVRO".to_string(),
            references: Vec::new(),
            metadata: None,
            rule_set: None,
            schema: schema.to_string(),
            deleted: false,
        }
    }

    fn apply_schema(cache: &mut LookupCache, value: SchemaValue) {
        cache.apply(
            &RegistryKey::schema(value.subject.clone(), value.version),
            Some(&RegistryValue::Schema(value)),
        );
    }

    #[test]
    fn test_content_addressed_lookup() {
        let mut cache = LookupCache::default();
        apply_schema(&mut cache, schema_value("s1", 1, 1, r#""string""#));
        apply_schema(&mut cache, schema_value("s2", 1, 1, r#""string""#));
        apply_schema(&mut cache, schema_value("s1", 2, 2, r#""int""#));

        let hit = cache
            .schema_id_and_subjects(&schema_value("ignored", 0, 0, r#""string""#))
            .unwrap();
        assert_eq!(hit.id, 1);
        assert_eq!(hit.version_of("s1"), Some(1));
        assert_eq!(hit.version_of("s2"), Some(1));

        assert_eq!(
            cache.schema_key_by_id(2, "."),
            Some(RegistryKey::schema("s1", 2))
        );
        assert_eq!(cache.schema_key_by_id(2, ".prod"), None);
        assert_eq!(cache.max_schema_id(), 2);
    }

    #[test]
    fn test_tombstone_clears_indexes() {
        let mut cache = LookupCache::default();
        apply_schema(&mut cache, schema_value("s1", 1, 1, r#""string""#));
        cache.apply(&RegistryKey::schema("s1", 1), None);

        assert!(cache.get(&RegistryKey::schema("s1", 1)).is_none());
        assert!(cache.schema_key_by_id(1, ".").is_none());
        assert!(cache
            .schema_id_and_subjects(&schema_value("x", 0, 0, r#""string""#))
            .is_none());
        assert_eq!(cache.max_schema_id(), 0);
    }

    #[test]
    fn test_soft_delete_watermark_retains_content_index() {
        let mut cache = LookupCache::default();
        apply_schema(&mut cache, schema_value("s1", 1, 1, r#""string""#));
        apply_schema(&mut cache, schema_value("s1", 2, 2, r#""int""#));

        cache.apply(
            &RegistryKey::DeleteSubject {
                subject: "s1".to_string(),
            },
            Some(&RegistryValue::DeleteSubject(models::DeleteSubjectValue {
                subject: "s1".to_string(),
                version: 2,
            })),
        );

        assert!(cache.is_deleted("s1", 1));
        assert!(cache.is_deleted("s1", 2));
        assert!(cache.subjects("", false).is_empty());
        assert_eq!(
            cache.subjects("", true),
            BTreeSet::from(["s1".to_string()])
        );
        // Content lookup still resolves, so re-registration resurrects ids.
        assert!(cache
            .schema_id_and_subjects(&schema_value("x", 0, 0, r#""string""#))
            .is_some());
    }

    #[test]
    fn test_reference_index() {
        let mut cache = LookupCache::default();
        let mut referrer = schema_value("s2", 1, 2, r#"{"type":"record"}"#);
        referrer.references = vec![SchemaReference {
            name: "other.Name".to_string(),
            subject: "s1".to_string(),
            version: 1,
        }];

        apply_schema(&mut cache, schema_value("s1", 1, 1, r#""string""#));
        apply_schema(&mut cache, referrer);

        assert_eq!(cache.referencing_ids("s1", 1), BTreeSet::from([2]));
        cache.apply(&RegistryKey::schema("s2", 1), None);
        assert!(cache.referencing_ids("s1", 1).is_empty());
    }

    #[test]
    fn test_replay_converges() {
        let log: Vec<(RegistryKey, Option<RegistryValue>)> = vec![
            (
                RegistryKey::schema("s1", 1),
                Some(RegistryValue::Schema(schema_value("s1", 1, 1, r#""string""#))),
            ),
            (
                RegistryKey::schema("s1", 2),
                Some(RegistryValue::Schema(schema_value("s1", 2, 2, r#""int""#))),
            ),
            (RegistryKey::schema("s1", 1), None),
            (
                RegistryKey::Mode { subject: None },
                Some(RegistryValue::Mode(models::ModeValue {
                    subject: None,
                    mode: Mode::Readonly,
                })),
            ),
        ];

        let mut a = LookupCache::default();
        let mut b = LookupCache::default();
        for (key, value) in &log {
            a.apply(key, value.as_ref());
        }
        for (key, value) in &log {
            b.apply(key, value.as_ref());
        }

        assert_eq!(a.entries, b.entries);
        assert_eq!(a.subjects(":*:", true), b.subjects(":*:", true));
        assert_eq!(a.max_schema_id(), b.max_schema_id());
    }
}
