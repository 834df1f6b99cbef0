use crate::core::{candidate_value, SchemaRegistry};
use crate::{ForwardHeaders, RegistryError};
use models::{
    LookupFilter, Metadata, Mode, QualifiedSubject, RegisterRequest, RegistryKey, RegistryValue,
    RuleSet, Schema, SchemaValue, DEFAULT_TENANT, MIN_VERSION,
};
use providers::ParsedSchema;
use std::sync::Arc;

// Outcome of a content-addressed dedup probe.
enum Dedup {
    /// No identical schema is registered anywhere.
    Miss,
    /// Identical and live under this subject; registration is a no-op.
    Existing(SchemaValue),
    /// Identical content exists elsewhere (or soft-deleted here); the new
    /// registration reuses its id.
    ReuseId(i32),
}

impl SchemaRegistry {
    /// Register a schema under a subject, returning the stored record with
    /// its assigned id and version. Must run on the leader.
    #[tracing::instrument(skip(self, request), fields(id = request.id, version = request.version))]
    pub async fn register(
        &self,
        subject: &str,
        request: RegisterRequest,
        normalize: bool,
    ) -> Result<Schema, RegistryError> {
        let qualified = QualifiedSubject::parse(subject);

        // Mode gate: read-only rejects everything; a caller-chosen id is an
        // import, and everything else requires normal writes.
        let mode = self.effective_mode(subject);
        if mode.is_read_only() {
            return Err(RegistryError::OperationNotPermitted(format!(
                "subject {subject} is in mode {mode}"
            )));
        }
        if request.id.is_some() && mode != Mode::Import {
            return Err(RegistryError::OperationNotPermitted(
                "caller-specified ids require IMPORT mode".to_string(),
            ));
        }
        if request.id.is_none() && mode == Mode::Import {
            return Err(RegistryError::OperationNotPermitted(
                "IMPORT mode requires a caller-specified id".to_string(),
            ));
        }

        self.barrier(Some(subject)).await?;

        // An empty request copies the latest version forward, carrying new
        // metadata and rules.
        let request = if request.is_empty_schema() {
            let latest = self
                .stored_schema(subject, models::LATEST_VERSION, LookupFilter::Default)
                .ok_or_else(|| {
                    RegistryError::InvalidSchema("empty schema with no prior version".to_string())
                })?;
            RegisterRequest {
                schema_type: Some(latest.schema_type),
                schema: latest.schema,
                references: latest.references,
                ..request
            }
        } else {
            request
        };

        let is_new = request.id.is_none();
        let parsed = self
            .parse_request(subject, &request, is_new, normalize)?
            .with_metadata_rule_set(request.metadata.clone(), request.rule_set.clone());

        // Dedup fast path, before annotations are merged.
        let mut reuse_id = None;
        match self.dedup(subject, &parsed, request.id) {
            Dedup::Existing(value) => return Ok(value.into()),
            Dedup::ReuseId(id) => reuse_id = Some(id),
            Dedup::Miss => (),
        }

        let all = self.schema_values(subject);
        let new_version = all.iter().map(|s| s.version).max().unwrap_or(0) + 1;
        let new_version = new_version.max(MIN_VERSION);
        let undeleted: Vec<&SchemaValue> = all.iter().rev().filter(|s| !s.deleted).collect();
        let deleted: Vec<&SchemaValue> = all.iter().filter(|s| s.deleted).collect();

        // A schema sent fully inlined is the same registration as an
        // equivalent one expressed through references.
        if request.references.is_empty() {
            for prior in &undeleted {
                if prior.references.is_empty() {
                    continue;
                }
                match self.reparse(subject, prior, normalize) {
                    Ok(prior_parsed) if prior_parsed.deep_equals(&parsed) => {
                        return Ok((*prior).clone().into());
                    }
                    Ok(_) => (),
                    Err(err) => {
                        tracing::debug!(subject, version = prior.version, %err,
                            "skipping unparseable prior version during dedup");
                    }
                }
            }
        }

        // Populate annotations: inherit from the previous version when the
        // request has none, then merge config defaults and overrides in
        // precedence order: defaults, then the schema's own, then overrides.
        let previous = undeleted.first();
        let mut metadata = parsed.metadata().cloned();
        let mut rule_set = parsed.rule_set().cloned();
        if metadata.is_none() {
            metadata = previous.and_then(|p| p.metadata.clone());
        }
        if rule_set.is_none() {
            rule_set = previous.and_then(|p| p.rule_set.clone());
        }
        let config = self.effective_config(subject);
        let metadata = {
            let specific = Metadata::merge(config.default_metadata.as_ref(), metadata.as_ref());
            Metadata::merge(specific.as_ref(), config.override_metadata.as_ref())
        };
        let rule_set = {
            let specific = RuleSet::merge(config.default_rule_set.as_ref(), rule_set.as_ref());
            RuleSet::merge(specific.as_ref(), config.override_rule_set.as_ref())
        };
        let parsed = parsed.with_metadata_rule_set(metadata, rule_set);

        // Compatibility gate. A compatibility group restricts the judged
        // versions to those sharing the new schema's group value.
        let level = config
            .compatibility_level
            .unwrap_or(self.config.compatibility_level);
        let mut priors: Vec<&SchemaValue> = undeleted.clone();
        if let Some(group) = &config.compatibility_group {
            let group_value = metadata_property(parsed.metadata(), group);
            priors.retain(|p| metadata_property(p.metadata.as_ref(), group) == group_value);
        }
        let prior_parsed: Vec<Arc<ParsedSchema>> = priors
            .iter()
            .filter_map(|p| self.reparse(subject, p, normalize).ok())
            .collect();
        let errors = parsed.is_compatible(level, &prior_parsed);
        if !errors.is_empty() && mode != Mode::Import {
            return Err(RegistryError::IncompatibleSchema(errors));
        }

        // Dedup again: annotation merging (and normalization) may have
        // unified this schema with an existing registration.
        match self.dedup(subject, &parsed, request.id) {
            Dedup::Existing(value) => return Ok(value.into()),
            Dedup::ReuseId(id) => reuse_id = Some(id),
            Dedup::Miss => (),
        }

        // First registration within a context durably marks its existence.
        if !qualified.is_default_context() {
            let context_key = RegistryKey::Context {
                tenant: DEFAULT_TENANT.to_string(),
                context: qualified.context.clone(),
            };
            if self.store.get(&context_key).is_none() {
                self.store
                    .put(
                        context_key,
                        RegistryValue::Context(models::ContextValue {
                            tenant: DEFAULT_TENANT.to_string(),
                            context: qualified.context.clone(),
                        }),
                    )
                    .await?;
            }
        }

        // Version assignment: a caller-chosen version must be exactly the
        // next one, except under IMPORT.
        let version = match request.version {
            Some(version) if version > 0 => {
                if mode != Mode::Import && version != new_version {
                    return Err(RegistryError::InvalidVersion {
                        subject: subject.to_string(),
                        version,
                    });
                }
                version
            }
            _ => new_version,
        };

        let mut value = candidate_value(subject, &parsed, 0, version);

        // Id assignment.
        let id = match request.id {
            Some(id) => {
                // An import may attach an existing id to a new subject, but
                // never rebind it to different content.
                let existing = {
                    let cache = self.store.cache();
                    cache
                        .schema_key_by_id(id, &qualified.context)
                        .and_then(|key| cache.get(&key).and_then(|v| v.as_schema().cloned()))
                };
                if let Some(existing) = existing {
                    if existing.schema != value.schema
                        || existing.schema_type != value.schema_type
                    {
                        return Err(RegistryError::OperationNotPermitted(format!(
                            "overwriting schema id {id} with different content is not permitted"
                        )));
                    }
                }
                self.id_generator.ensure_at_least(id);
                id
            }
            None => match reuse_id {
                Some(id) => id,
                None => self.next_unused_id(&value, &qualified.context)?,
            },
        };
        value.id = id;

        self.store
            .put(
                RegistryKey::schema(subject, version),
                RegistryValue::Schema(value.clone()),
            )
            .await?;

        // Lower-versioned soft-deleted records with this id are superseded;
        // tombstone them so compaction drops them.
        for stale in deleted
            .iter()
            .filter(|s| s.id == id && s.version < version)
        {
            self.store
                .delete(RegistryKey::schema(subject, stale.version))
                .await?;
        }

        tracing::info!(subject, id, version, "registered schema");
        Ok(value.into())
    }

    /// Serve an identical existing registration from the local cache, else
    /// register on the leader or forward to it.
    pub async fn register_or_forward(
        &self,
        subject: &str,
        request: RegisterRequest,
        normalize: bool,
        headers: &ForwardHeaders,
    ) -> Result<Schema, RegistryError> {
        if let Ok(Some(existing)) =
            self.lookup_under_subject(subject, &request, normalize, LookupFilter::Default)
        {
            if request.id.map_or(true, |id| id == existing.id) {
                return Ok(existing);
            }
        }

        let lock = self.store.lock_for(subject);
        let _guard = lock.lock().await;

        let view = self.leader_view().await;
        if view.is_leader {
            self.register(subject, request, normalize).await
        } else if let Some(leader) = view.leader {
            self.forwarder
                .register_schema(&leader, headers, subject, &request, normalize)
                .await
        } else {
            Err(RegistryError::UnknownLeader)
        }
    }

    /// Judge a candidate against one stored version, or against every prior
    /// version when `version` is `None`, without registering anything.
    pub async fn test_compatibility(
        &self,
        subject: &str,
        version: Option<i32>,
        request: &RegisterRequest,
    ) -> Result<Vec<String>, RegistryError> {
        self.barrier(Some(subject)).await?;

        let parsed = self
            .parse_request(subject, request, true, false)?
            .with_metadata_rule_set(request.metadata.clone(), request.rule_set.clone());

        let config = self.effective_config(subject);
        let level = config
            .compatibility_level
            .unwrap_or(self.config.compatibility_level);

        let priors: Vec<SchemaValue> = match version {
            Some(version) => {
                vec![self
                    .stored_schema(subject, version, LookupFilter::Default)
                    .ok_or(RegistryError::VersionNotFound {
                        subject: subject.to_string(),
                        version,
                    })?]
            }
            None => self
                .schema_values(subject)
                .into_iter()
                .rev()
                .filter(|s| !s.deleted)
                .collect(),
        };
        let prior_parsed: Vec<Arc<ParsedSchema>> = priors
            .iter()
            .filter_map(|p| self.reparse(subject, p, false).ok())
            .collect();

        Ok(parsed.is_compatible(level, &prior_parsed))
    }

    // Content-addressed probe honoring a caller-supplied id: a hit under a
    // different id is no hit at all.
    fn dedup(&self, subject: &str, parsed: &ParsedSchema, request_id: Option<i32>) -> Dedup {
        let candidate = candidate_value(subject, parsed, request_id.unwrap_or(-1), 0);

        let hit = match self.store.cache().schema_id_and_subjects(&candidate) {
            Some(hit) => hit,
            None => return Dedup::Miss,
        };
        if request_id.map_or(false, |id| id != hit.id) {
            return Dedup::Miss;
        }

        if let Some(version) = hit.version_of(subject) {
            if let Some(value) = self.stored_schema(subject, version, LookupFilter::Default) {
                return Dedup::Existing(value);
            }
        }
        Dedup::ReuseId(hit.id)
    }

    // Re-parse a stored version, leniently: historical records must never
    // fail the current write path.
    fn reparse(
        &self,
        subject: &str,
        value: &SchemaValue,
        normalize: bool,
    ) -> Result<Arc<ParsedSchema>, RegistryError> {
        let request = RegisterRequest {
            schema_type: Some(value.schema_type.clone()),
            schema: value.schema.clone(),
            references: value.references.clone(),
            ..Default::default()
        };
        let parsed = self
            .parse_request(subject, &request, false, normalize)?
            .with_metadata_rule_set(value.metadata.clone(), value.rule_set.clone());
        Ok(Arc::new(parsed))
    }

    // Reserve a fresh id, retrying over ids raced away by another writer
    // near a leader transition.
    fn next_unused_id(&self, value: &SchemaValue, context: &str) -> Result<i32, RegistryError> {
        for attempt in 0..self.config.write_max_retries {
            let id = self.id_generator.id(value)?;
            if self.store.cache().schema_key_by_id(id, context).is_none() {
                return Ok(id);
            }
            tracing::warn!(id, attempt, "schema id collision, retrying");
        }
        Err(RegistryError::IdGeneration(self.config.write_max_retries))
    }
}

fn metadata_property(metadata: Option<&Metadata>, name: &str) -> Option<String> {
    metadata.and_then(|m| m.properties.get(name).cloned())
}
