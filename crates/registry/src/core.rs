use crate::{LeaderRestClient, NodeIdentity, RegistryConfig, RegistryError};
use models::{
    context_of, Config, LookupFilter, Mode, QualifiedSubject, RegisterRequest, RegistryKey,
    RegistryValue, Schema, SchemaReference, SchemaValue, DEFAULT_CONTEXT, LATEST_VERSION,
};
use providers::{ParseInput, ParsedSchema, SchemaProvider, SchemaProviders};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use store::{
    subject_versions_range, Epoch, IdGenerator, IncrementalIdGenerator, JsonSerializer, LogStore,
    LogStoreOptions, LogTransport, StoreUpdateHandler,
};

/// The registry core: every mutation is executed on the leader or forwarded
/// to it, and every node serves reads from the cache its log consumer
/// maintains.
pub struct SchemaRegistry {
    pub(crate) config: RegistryConfig,
    pub(crate) identity: NodeIdentity,
    pub(crate) store: Arc<LogStore>,
    pub(crate) providers: SchemaProviders,
    pub(crate) id_generator: Arc<dyn IdGenerator>,
    pub(crate) forwarder: LeaderRestClient,
    // The leader this node currently believes in; None between elections.
    leader: Mutex<Option<NodeIdentity>>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("config", &self.config)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl SchemaRegistry {
    /// Start a node: its log consumer begins replaying immediately, and the
    /// node serves reads once caught up. Leadership arrives separately via
    /// [`SchemaRegistry::on_leader_change`].
    ///
    /// `available_providers` and `available_handlers` supply the
    /// implementations that the `schema_providers` and `update_handlers`
    /// configuration keys select from; a configured tag with no matching
    /// implementation fails startup.
    pub fn start(
        config: RegistryConfig,
        transport: Arc<dyn LogTransport>,
        available_providers: Vec<Arc<dyn SchemaProvider>>,
        available_handlers: Vec<Arc<dyn StoreUpdateHandler>>,
    ) -> Result<Arc<Self>, RegistryError> {
        let identity = config.identity()?;

        let mut providers = SchemaProviders::new(providers::ParseCacheOptions {
            capacity: config.schema_cache_size,
            expiry: config.schema_cache_expiry,
        });
        for name in &config.schema_providers {
            let provider = available_providers
                .iter()
                .find(|p| p.schema_type() == name.as_str())
                .ok_or_else(|| {
                    RegistryError::Initialization(format!(
                        "schema type {name:?} is configured but no provider for it was supplied"
                    ))
                })?;
            providers.register(provider.clone());
        }

        let mut update_handlers = Vec::new();
        for name in &config.update_handlers {
            let handler = available_handlers
                .iter()
                .find(|h| h.name() == name.as_str())
                .ok_or_else(|| {
                    RegistryError::Initialization(format!(
                        "update handler {name:?} is configured but was not supplied"
                    ))
                })?;
            update_handlers.push(handler.clone());
        }

        let store = LogStore::start(
            transport,
            Arc::new(JsonSerializer),
            update_handlers,
            LogStoreOptions {
                timeout: config.store_timeout,
                max_record_bytes: config.max_record_bytes,
            },
        );

        let forwarder = LeaderRestClient::new(config.store_timeout)?;

        Ok(Arc::new(Self {
            identity,
            store,
            providers,
            id_generator: Arc::new(IncrementalIdGenerator::new()),
            forwarder,
            leader: Mutex::new(None),
            config,
        }))
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn is_leader(&self) -> bool {
        self.store.is_leader()
    }

    pub fn leader_identity(&self) -> Option<NodeIdentity> {
        self.leader.lock().unwrap().clone()
    }

    /// Invoked by the elector whenever the elected leader changes.
    /// `leader: None` means no leader is currently known.
    pub async fn on_leader_change(
        &self,
        leader: Option<NodeIdentity>,
        epoch: Epoch,
    ) -> Result<(), RegistryError> {
        let _guard = self.store.leader_lock().lock().await;

        if leader.as_ref() == Some(&self.identity) {
            self.store.assume_leader(epoch).await?;
            // The id generator must only be seeded from a fully caught-up
            // cache, or this leader could re-issue an id already in the log.
            self.store
                .wait_until_caught_up_with_log_end(self.config.init_timeout)
                .await
                .map_err(|err| {
                    RegistryError::Initialization(format!(
                        "failed to catch up with the log end: {err}"
                    ))
                })?;
            let max_id = self.store.cache().max_schema_id();
            self.id_generator.init(max_id);
            tracing::info!(epoch, max_id, "assumed leadership");
        } else {
            if self.store.is_leader() {
                tracing::info!(epoch, "resigning leadership");
            }
            self.store.resign_leader();
        }

        *self.leader.lock().unwrap() = leader;
        Ok(())
    }

    /// Block until this node's consumer has applied everything currently in
    /// the log. Reads served afterwards reflect all prior writes.
    pub async fn wait_until_caught_up(
        &self,
        timeout: std::time::Duration,
    ) -> Result<(), RegistryError> {
        self.store.wait_until_caught_up_with_log_end(timeout).await?;
        Ok(())
    }

    // ---- Reads. All served from the local cache; no leader required. ----

    /// Subjects matching a context-aware prefix.
    pub fn subjects(&self, prefix: &str, filter: LookupFilter) -> BTreeSet<String> {
        self.store
            .cache()
            .subjects(prefix, filter == LookupFilter::IncludeDeleted)
    }

    /// Every context known to the registry, the default context first.
    pub fn contexts(&self) -> Vec<String> {
        let mut contexts = vec![DEFAULT_CONTEXT.to_string()];
        contexts.extend(self.store.cache().contexts());
        contexts
    }

    /// The schema types with registered providers.
    pub fn schema_types(&self) -> Vec<String> {
        self.providers.schema_types()
    }

    /// Versions registered under a subject, ascending.
    pub fn versions(&self, subject: &str, filter: LookupFilter) -> Result<Vec<i32>, RegistryError> {
        let subject = self.resolve_subject(subject);
        let versions: Vec<i32> = self
            .schema_values(&subject)
            .into_iter()
            .filter(|s| filter.admits(s.deleted))
            .map(|s| s.version)
            .collect();
        if versions.is_empty() {
            return Err(RegistryError::SubjectNotFound(subject));
        }
        Ok(versions)
    }

    /// Lookup by (subject, version); `version == -1` means latest.
    pub fn schema_by_subject_version(
        &self,
        subject: &str,
        version: i32,
        filter: LookupFilter,
    ) -> Result<Schema, RegistryError> {
        let subject = self.resolve_subject(subject);
        match self.stored_schema(&subject, version, filter) {
            Some(value) => Ok(value.into()),
            None if self.schema_values(&subject).is_empty() => {
                Err(RegistryError::SubjectNotFound(subject))
            }
            None => Err(RegistryError::VersionNotFound { subject, version }),
        }
    }

    pub fn latest_version(&self, subject: &str) -> Result<Schema, RegistryError> {
        self.schema_by_subject_version(subject, LATEST_VERSION, LookupFilter::Default)
    }

    /// Lookup by globally unique id. The hint's context is searched first;
    /// an unqualified probe falls back to iterating every known context.
    pub fn schema_by_id(&self, id: i32, subject_hint: &str) -> Result<Schema, RegistryError> {
        let context = context_of(subject_hint);

        let key = {
            let cache = self.store.cache();
            cache.schema_key_by_id(id, &context).or_else(|| {
                if context != DEFAULT_CONTEXT {
                    return None;
                }
                cache
                    .contexts()
                    .iter()
                    .find_map(|ctx| cache.schema_key_by_id(id, ctx))
            })
        };

        key.and_then(|key| self.store.get(&key))
            .and_then(|value| value.as_schema().cloned())
            .map(Schema::from)
            .ok_or(RegistryError::SchemaNotFound(id))
    }

    /// Ids of schemas which reference the given (subject, version).
    pub fn referenced_by(&self, subject: &str, version: i32) -> Result<Vec<i32>, RegistryError> {
        let subject = self.resolve_subject(subject);
        // Verify the target exists before consulting the reverse index.
        self.schema_by_subject_version(&subject, version, LookupFilter::IncludeDeleted)?;
        Ok(self
            .store
            .cache()
            .referencing_ids(&subject, version)
            .into_iter()
            .collect())
    }

    /// The mode of a subject, falling back from subject to global to READWRITE
    /// when `fallback` is set, else only the explicitly stored value.
    pub fn get_mode(&self, subject: Option<&str>, fallback: bool) -> Option<Mode> {
        match (subject, fallback) {
            (Some(subject), true) => Some(self.effective_mode(subject)),
            (None, true) => Some(self.store.cache().mode(None).unwrap_or_default()),
            (subject, false) => self.store.cache().mode(subject),
        }
    }

    /// The config of a subject, falling back from subject to global to the default
    /// when `fallback` is set.
    pub fn get_config(&self, subject: Option<&str>, fallback: bool) -> Option<Config> {
        match (subject, fallback) {
            (Some(subject), true) => Some(self.effective_config(subject)),
            (None, true) => {
                let mut config = Config::with_level(self.config.compatibility_level);
                if let Some(global) = self.store.cache().config(None) {
                    config = config.updated_with(&global);
                }
                Some(config)
            }
            (subject, false) => self.store.cache().config(subject),
        }
    }

    /// Content-addressed lookup of a schema under a subject.
    pub fn lookup_under_subject(
        &self,
        subject: &str,
        request: &RegisterRequest,
        normalize: bool,
        filter: LookupFilter,
    ) -> Result<Option<Schema>, RegistryError> {
        let parsed = self
            .parse_request(subject, request, false, normalize)?
            .with_metadata_rule_set(request.metadata.clone(), request.rule_set.clone());
        let candidate = candidate_value(subject, &parsed, request.id.unwrap_or(-1), 0);

        let version = self
            .store
            .cache()
            .schema_id_and_subjects(&candidate)
            .and_then(|hit| hit.version_of(subject));

        Ok(version
            .and_then(|version| self.stored_schema(subject, version, filter))
            .map(Schema::from))
    }

    // ---- Internals shared by the write paths. ----

    pub(crate) async fn barrier(&self, subject: Option<&str>) -> Result<(), RegistryError> {
        self.store
            .wait_until_reader_reaches_last_offset(subject, self.config.store_timeout)
            .await?;
        Ok(())
    }

    /// All stored versions of a subject, ascending by version.
    pub(crate) fn schema_values(&self, subject: &str) -> Vec<SchemaValue> {
        self.store
            .get_all(subject_versions_range(subject))
            .into_iter()
            .filter_map(|(_, value)| value.as_schema().cloned())
            .collect()
    }

    pub(crate) fn stored_schema(
        &self,
        subject: &str,
        version: i32,
        filter: LookupFilter,
    ) -> Option<SchemaValue> {
        if version == LATEST_VERSION {
            return self
                .schema_values(subject)
                .into_iter()
                .rev()
                .find(|s| filter.admits(s.deleted));
        }
        match self.store.get(&RegistryKey::schema(subject, version)) {
            Some(RegistryValue::Schema(value)) if filter.admits(value.deleted) => Some(value),
            _ => None,
        }
    }

    /// Resolve an unqualified subject against other contexts when the
    /// default context has no trace of it.
    pub(crate) fn resolve_subject(&self, subject: &str) -> String {
        if !QualifiedSubject::parse(subject).is_default_context() {
            return subject.to_string();
        }
        if !self.schema_values(subject).is_empty() {
            return subject.to_string();
        }
        let contexts = self.store.cache().contexts();
        for context in contexts {
            let qualified = QualifiedSubject::qualify(&context, subject).to_qualified_string();
            if !self.schema_values(&qualified).is_empty() {
                return qualified;
            }
        }
        subject.to_string()
    }

    pub(crate) fn effective_mode(&self, subject: &str) -> Mode {
        let cache = self.store.cache();
        let global = cache.mode(None);
        // A global READONLY_OVERRIDE wins over every subject mode.
        if global == Some(Mode::ReadonlyOverride) {
            return Mode::ReadonlyOverride;
        }
        cache.mode(Some(subject)).or(global).unwrap_or_default()
    }

    pub(crate) fn effective_config(&self, subject: &str) -> Config {
        let cache = self.store.cache();
        let mut config = Config::with_level(self.config.compatibility_level);
        if let Some(global) = cache.config(None) {
            config = config.updated_with(&global);
        }
        if let Some(specific) = cache.config(Some(subject)) {
            config = config.updated_with(&specific);
        }
        config
    }

    /// Parse a request's schema, resolving its references through the
    /// registry first.
    pub(crate) fn parse_request(
        &self,
        subject: &str,
        request: &RegisterRequest,
        is_new: bool,
        normalize: bool,
    ) -> Result<Arc<ParsedSchema>, RegistryError> {
        let schema_type = request.schema_type.as_deref().unwrap_or(providers::AVRO);

        let mut resolved = Vec::new();
        let mut seen = BTreeSet::new();
        self.resolve_references(
            &context_of(subject),
            &request.references,
            &mut resolved,
            &mut seen,
        )?;

        let input = ParseInput {
            raw: &request.schema,
            references: &request.references,
            resolved_references: &resolved,
            is_new,
            normalize,
        };
        Ok(self.providers.parse(schema_type, &input)?)
    }

    // Depth-first so every dependency precedes its dependents.
    fn resolve_references(
        &self,
        context: &str,
        references: &[SchemaReference],
        out: &mut Vec<(String, String)>,
        seen: &mut BTreeSet<(String, i32)>,
    ) -> Result<(), RegistryError> {
        for reference in references {
            let qualified = qualify_in(context, &reference.subject);
            if !seen.insert((qualified.clone(), reference.version)) {
                continue;
            }
            let value = self
                .stored_schema(&qualified, reference.version, LookupFilter::Default)
                .ok_or_else(|| {
                    RegistryError::InvalidSchema(format!(
                        "reference {:?} to {}/{} cannot be resolved",
                        reference.name, reference.subject, reference.version
                    ))
                })?;
            self.resolve_references(&context_of(&qualified), &value.references, out, seen)?;
            out.push((reference.name.clone(), value.schema));
        }
        Ok(())
    }
}

/// The durable record a parsed schema would register as.
pub(crate) fn candidate_value(
    subject: &str,
    parsed: &ParsedSchema,
    id: i32,
    version: i32,
) -> SchemaValue {
    SchemaValue {
        subject: subject.to_string(),
        version,
        id,
        schema_type: parsed.schema_type().to_string(),
        references: parsed.references().to_vec(),
        metadata: parsed.metadata().cloned(),
        rule_set: parsed.rule_set().cloned(),
        schema: parsed.canonical_string().to_string(),
        deleted: false,
    }
}

/// Qualify a bare subject into `context` unless it is already qualified.
pub(crate) fn qualify_in(context: &str, subject: &str) -> String {
    let parsed = QualifiedSubject::parse(subject);
    if parsed.is_default_context() && context != DEFAULT_CONTEXT {
        QualifiedSubject::qualify(context, subject).to_qualified_string()
    } else {
        subject.to_string()
    }
}

// Used by the or-forward paths.
pub(crate) struct LeaderView {
    pub is_leader: bool,
    pub leader: Option<NodeIdentity>,
}

impl SchemaRegistry {
    pub(crate) async fn leader_view(&self) -> LeaderView {
        let _guard = self.store.leader_lock().lock().await;
        LeaderView {
            is_leader: self.store.is_leader(),
            leader: self.leader.lock().unwrap().clone(),
        }
    }
}
