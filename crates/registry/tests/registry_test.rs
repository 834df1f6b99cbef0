use models::{
    CompatibilityLevel, Config, LookupFilter, Mode, RegisterRequest, LATEST_VERSION,
};
use registry::{RegistryConfig, RegistryError, SchemaRegistry, StaticElector};
use std::sync::Arc;
use std::time::Duration;
use store::MemoryLog;

const RECORD_V1: &str = r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"}]}"#;
const RECORD_V2_REQUIRED: &str =
    r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"},{"name":"b","type":"string"}]}"#;
const RECORD_V2_OPTIONAL: &str =
    r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"},{"name":"b","type":"string","default":"x"}]}"#;
const RECORD_V3_OPTIONAL: &str =
    r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"},{"name":"b","type":"string","default":"x"},{"name":"c","type":"long","default":0}]}"#;

fn config(host: &str) -> RegistryConfig {
    serde_json::from_value(serde_json::json!({
        "host_name": host,
        "store_timeout": "2s",
        "init_timeout": "5s",
    }))
    .unwrap()
}

fn avro(schema: &str) -> RegisterRequest {
    RegisterRequest {
        schema: schema.to_string(),
        ..Default::default()
    }
}

async fn start_node(log: &Arc<MemoryLog>, host: &str) -> Arc<SchemaRegistry> {
    SchemaRegistry::start(config(host), log.clone(), Vec::new(), Vec::new()).unwrap()
}

async fn start_leader(log: &Arc<MemoryLog>) -> Arc<SchemaRegistry> {
    let node = start_node(log, "leader-1").await;
    let elector = StaticElector::new(&node, 1);
    node.init(&elector).await.unwrap();
    assert!(node.is_leader());
    node
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;

    let first = node
        .register("sub1", avro(RECORD_V1), false)
        .await
        .unwrap();
    assert_eq!((first.id, first.version), (1, 1));

    // Registering the identical text again is a no-op.
    let second = node
        .register("sub1", avro(RECORD_V1), false)
        .await
        .unwrap();
    assert_eq!((second.id, second.version), (1, 1));

    // Both lookup paths serve the same canonical text.
    let by_id = node.schema_by_id(1, "sub1").unwrap();
    let by_version = node
        .schema_by_subject_version("sub1", 1, LookupFilter::Default)
        .unwrap();
    assert_eq!(by_id.schema, by_version.schema);
}

#[tokio::test]
async fn test_backward_compatibility_gate() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;

    node.register("sub1", avro(RECORD_V1), false).await.unwrap();

    // A new required field with no default cannot read old data.
    let err = node
        .register("sub1", avro(RECORD_V2_REQUIRED), false)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::IncompatibleSchema(_)), "{err}");

    // The optional variant registers as version 2 with a fresh id.
    let schema = node
        .register("sub1", avro(RECORD_V2_OPTIONAL), false)
        .await
        .unwrap();
    assert_eq!((schema.id, schema.version), (2, 2));
}

#[tokio::test]
async fn test_soft_then_hard_delete() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;
    node.register("sub1", avro(RECORD_V1), false).await.unwrap();

    // Hard delete requires a prior soft delete.
    let err = node
        .delete_schema_version("sub1", 1, true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::SchemaVersionNotSoftDeleted { .. }
    ));

    assert_eq!(node.delete_schema_version("sub1", 1, false).await.unwrap(), 1);
    assert!(node
        .schema_by_subject_version("sub1", 1, LookupFilter::Default)
        .is_err());
    // Still visible to a deleted-inclusive read.
    assert!(node
        .schema_by_subject_version("sub1", 1, LookupFilter::IncludeDeleted)
        .is_ok());

    assert_eq!(node.delete_schema_version("sub1", 1, true).await.unwrap(), 1);
    // Tombstoned: absent even from deleted-inclusive reads.
    assert!(node
        .schema_by_subject_version("sub1", 1, LookupFilter::IncludeDeleted)
        .is_err());
}

#[tokio::test]
async fn test_soft_delete_then_reregister_resurrects_id() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;

    let first = node
        .register("sub1", avro(RECORD_V1), false)
        .await
        .unwrap();
    node.delete_schema_version("sub1", 1, false).await.unwrap();

    let again = node
        .register("sub1", avro(RECORD_V1), false)
        .await
        .unwrap();
    assert_eq!(again.id, first.id);
    assert!(again.version > first.version);

    // The superseded soft-deleted version was tombstoned under the same id.
    assert!(node
        .schema_by_subject_version("sub1", 1, LookupFilter::IncludeDeleted)
        .is_err());
    assert_eq!(
        node.versions("sub1", LookupFilter::IncludeDeleted).unwrap(),
        vec![again.version]
    );
}

#[tokio::test]
async fn test_leader_failover_fences_old_leader() {
    let log = Arc::new(MemoryLog::new());
    let old_leader = start_leader(&log).await;
    let new_leader = start_node(&log, "leader-2").await;

    let first = old_leader
        .register("sub1", avro(RECORD_V1), false)
        .await
        .unwrap();

    // Promote the second node under a newer epoch.
    let identity = new_leader.identity().clone();
    new_leader
        .on_leader_change(Some(identity), 2)
        .await
        .unwrap();

    // The deposed leader's next write is fenced.
    let err = old_leader
        .register("other", avro(r#""string""#), false)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotLeader), "{err}");

    // The promoted leader assigns ids strictly above what it observed.
    let second = new_leader
        .register("sub2", avro(RECORD_V2_OPTIONAL), false)
        .await
        .unwrap();
    assert!(second.id > first.id);

    // The deposed node still converges as a follower.
    old_leader
        .wait_until_caught_up(Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(
        old_leader.schema_by_id(second.id, "sub2").unwrap().schema,
        second.schema
    );
}

#[tokio::test]
async fn test_context_qualified_registration() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;

    let schema = node
        .register(":.ctx:sub1", avro(RECORD_V1), false)
        .await
        .unwrap();

    // The context marker record exists.
    assert_eq!(node.contexts(), vec![".".to_string(), ".ctx".to_string()]);

    // An id probe against the default context falls through to `.ctx`.
    let found = node.schema_by_id(schema.id, "unqualified-subject").unwrap();
    assert_eq!(found.subject, ":.ctx:sub1");

    // Subject listings are partitioned by context.
    assert!(node.subjects("", LookupFilter::Default).is_empty());
    assert_eq!(
        node.subjects(":.ctx:", LookupFilter::Default)
            .into_iter()
            .collect::<Vec<_>>(),
        vec![":.ctx:sub1".to_string()]
    );
}

#[tokio::test]
async fn test_import_mode_takes_caller_ids() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;

    node.set_mode(Some("sub2"), Mode::Import, false)
        .await
        .unwrap();

    let request = RegisterRequest {
        id: Some(100),
        version: Some(5),
        ..avro(RECORD_V1)
    };
    let schema = node.register("sub2", request, false).await.unwrap();
    assert_eq!((schema.id, schema.version), (100, 5));

    // The same id cannot be rebound to different content.
    let clash = RegisterRequest {
        id: Some(100),
        ..avro(RECORD_V2_OPTIONAL)
    };
    let err = node.register("sub2", clash, false).await.unwrap_err();
    assert!(matches!(err, RegistryError::OperationNotPermitted(_)), "{err}");

    // Back in READWRITE, system ids continue above the imported one.
    node.set_mode(Some("sub2"), Mode::Readwrite, false)
        .await
        .unwrap();
    let next = node
        .register("sub3", avro(RECORD_V2_OPTIONAL), false)
        .await
        .unwrap();
    assert!(next.id > 100);
}

#[tokio::test]
async fn test_caller_id_outside_import_is_rejected() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;

    let request = RegisterRequest {
        id: Some(7),
        ..avro(RECORD_V1)
    };
    let err = node.register("sub1", request, false).await.unwrap_err();
    assert!(matches!(err, RegistryError::OperationNotPermitted(_)));
}

#[tokio::test]
async fn test_readonly_mode_rejects_writes() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;
    node.register("sub1", avro(RECORD_V1), false).await.unwrap();

    node.set_mode(None, Mode::Readonly, false).await.unwrap();

    let err = node
        .register("sub1", avro(RECORD_V2_OPTIONAL), false)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::OperationNotPermitted(_)));
    let err = node.delete_subject("sub1", false).await.unwrap_err();
    assert!(matches!(err, RegistryError::OperationNotPermitted(_)));
}

#[tokio::test]
async fn test_full_transitive_chain() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;

    node.update_config(None, Config::with_level(CompatibilityLevel::FullTransitive))
        .await
        .unwrap();

    node.register("sub1", avro(RECORD_V1), false).await.unwrap();
    node.register("sub1", avro(RECORD_V2_OPTIONAL), false)
        .await
        .unwrap();
    let third = node
        .register("sub1", avro(RECORD_V3_OPTIONAL), false)
        .await
        .unwrap();
    assert_eq!(third.version, 3);

    // v3 accepted under FULL_TRANSITIVE implies v3 is compatible with v1.
    let errors = node
        .test_compatibility("sub1", Some(1), &avro(RECORD_V3_OPTIONAL))
        .await
        .unwrap();
    assert!(errors.is_empty(), "{errors:?}");
}

#[tokio::test]
async fn test_delete_subject_and_watermark() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;

    node.register("sub1", avro(RECORD_V1), false).await.unwrap();
    node.register("sub1", avro(RECORD_V2_OPTIONAL), false)
        .await
        .unwrap();

    let versions = node.delete_subject("sub1", false).await.unwrap();
    assert_eq!(versions, vec![1, 2]);
    assert!(node.subjects("", LookupFilter::Default).is_empty());

    // Hard delete requires the soft delete that just happened.
    let versions = node.delete_subject("sub1", true).await.unwrap();
    assert_eq!(versions, vec![1, 2]);
    assert!(node
        .versions("sub1", LookupFilter::IncludeDeleted)
        .is_err());
}

#[tokio::test]
async fn test_hard_delete_subject_requires_soft_delete() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;
    node.register("sub1", avro(RECORD_V1), false).await.unwrap();

    let err = node.delete_subject("sub1", true).await.unwrap_err();
    assert!(matches!(err, RegistryError::SubjectNotSoftDeleted(_)));
}

#[tokio::test]
async fn test_referenced_schema_cannot_be_deleted() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;

    let inner = r#"{"type":"record","name":"Inner","fields":[{"name":"x","type":"long"}]}"#;
    node.register("inner-value", avro(inner), false)
        .await
        .unwrap();

    let outer = RegisterRequest {
        references: vec![models::SchemaReference {
            name: "Inner".to_string(),
            subject: "inner-value".to_string(),
            version: 1,
        }],
        ..avro(r#"{"type":"record","name":"Outer","fields":[{"name":"inner","type":"Inner"}]}"#)
    };
    let outer = node.register("outer-value", outer, false).await.unwrap();

    let err = node
        .delete_schema_version("inner-value", 1, false)
        .await
        .unwrap_err();
    match err {
        RegistryError::ReferenceExists(ids) => assert_eq!(ids, vec![outer.id]),
        err => panic!("expected ReferenceExists, got {err}"),
    }
    assert_eq!(
        node.referenced_by("inner-value", 1).unwrap(),
        vec![outer.id]
    );

    // Deleting the referrer first unblocks the referenced schema.
    node.delete_schema_version("outer-value", 1, false)
        .await
        .unwrap();
    node.delete_schema_version("inner-value", 1, false)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_forwarding_without_a_leader() {
    let log = Arc::new(MemoryLog::new());
    let follower = start_node(&log, "follower-1").await;

    let err = follower
        .register_or_forward("sub1", avro(RECORD_V1), false, &Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownLeader));
}

#[tokio::test]
async fn test_follower_serves_existing_registration_without_forwarding() {
    let log = Arc::new(MemoryLog::new());
    let leader = start_leader(&log).await;
    let follower = start_node(&log, "follower-1").await;

    let registered = leader
        .register("sub1", avro(RECORD_V1), false)
        .await
        .unwrap();

    follower
        .wait_until_caught_up(Duration::from_secs(2))
        .await
        .unwrap();

    // No leader is known to the follower, yet the idempotent registration
    // is answered from its local cache.
    let served = follower
        .register_or_forward("sub1", avro(RECORD_V1), false, &Vec::new())
        .await
        .unwrap();
    assert_eq!((served.id, served.version), (registered.id, registered.version));
}

#[tokio::test]
async fn test_config_update_and_fallback() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;

    // Global default applies until a config is stored.
    assert_eq!(
        node.get_config(Some("sub1"), true).unwrap().compatibility_level,
        Some(CompatibilityLevel::Backward)
    );

    node.update_config(Some("sub1"), Config::with_level(CompatibilityLevel::None))
        .await
        .unwrap();
    assert_eq!(
        node.get_config(Some("sub1"), true).unwrap().compatibility_level,
        Some(CompatibilityLevel::None)
    );

    // Field-wise merge keeps earlier fields.
    let update = Config {
        compatibility_group: Some("application.major".to_string()),
        ..Default::default()
    };
    let merged = node.update_config(Some("sub1"), update).await.unwrap();
    assert_eq!(merged.compatibility_level, Some(CompatibilityLevel::None));
    assert_eq!(
        merged.compatibility_group.as_deref(),
        Some("application.major")
    );

    node.delete_config(Some("sub1")).await.unwrap();
    assert_eq!(
        node.get_config(Some("sub1"), true).unwrap().compatibility_level,
        Some(CompatibilityLevel::Backward)
    );
}

#[tokio::test]
async fn test_a_fresh_node_replays_to_identical_state() {
    let log = Arc::new(MemoryLog::new());
    let node = start_leader(&log).await;

    node.register("sub1", avro(RECORD_V1), false).await.unwrap();
    node.register("sub1", avro(RECORD_V2_OPTIONAL), false)
        .await
        .unwrap();
    node.register(":.ctx:sub1", avro(RECORD_V1), false)
        .await
        .unwrap();
    node.delete_schema_version("sub1", 1, false).await.unwrap();
    node.set_mode(Some("imports"), Mode::Import, false)
        .await
        .unwrap();

    let replica = start_node(&log, "replica-1").await;
    replica
        .wait_until_caught_up(Duration::from_secs(2))
        .await
        .unwrap();

    for filter in [LookupFilter::Default, LookupFilter::IncludeDeleted] {
        assert_eq!(
            node.subjects(":*:", filter),
            replica.subjects(":*:", filter)
        );
    }
    assert_eq!(node.contexts(), replica.contexts());
    assert_eq!(
        node.versions("sub1", LookupFilter::IncludeDeleted).unwrap(),
        replica
            .versions("sub1", LookupFilter::IncludeDeleted)
            .unwrap()
    );
    assert_eq!(
        node.get_mode(Some("imports"), false),
        replica.get_mode(Some("imports"), false)
    );
    assert_eq!(
        node.schema_by_subject_version("sub1", LATEST_VERSION, LookupFilter::Default)
            .unwrap()
            .schema,
        replica
            .schema_by_subject_version("sub1", LATEST_VERSION, LookupFilter::Default)
            .unwrap()
            .schema
    );
}

#[tokio::test]
async fn test_configured_provider_tag_must_be_supplied() {
    let config: RegistryConfig = serde_json::from_value(serde_json::json!({
        "schema_providers": ["PROTOBUF"],
    }))
    .unwrap();

    let err = SchemaRegistry::start(
        config,
        Arc::new(MemoryLog::new()),
        Vec::new(),
        Vec::new(),
    )
    .unwrap_err();
    assert!(matches!(err, RegistryError::Initialization(_)), "{err}");
}

struct CountingHandler(Arc<std::sync::atomic::AtomicUsize>);

impl store::StoreUpdateHandler for CountingHandler {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn handle_update(
        &self,
        _key: &models::RegistryKey,
        _value: Option<&models::RegistryValue>,
        _old: Option<&models::RegistryValue>,
        _offset: i64,
    ) {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_configured_update_handler_observes_applies() {
    let applies = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let node_config: RegistryConfig = serde_json::from_value(serde_json::json!({
        "host_name": "leader-1",
        "store_timeout": "2s",
        "init_timeout": "5s",
        "update_handlers": ["counting"],
    }))
    .unwrap();

    let node = SchemaRegistry::start(
        node_config,
        Arc::new(MemoryLog::new()),
        Vec::new(),
        vec![Arc::new(CountingHandler(applies.clone())) as Arc<dyn store::StoreUpdateHandler>],
    )
    .unwrap();
    let elector = StaticElector::new(&node, 1);
    node.init(&elector).await.unwrap();

    node.register("sub1", avro(RECORD_V1), false).await.unwrap();

    // The handler saw the barrier noop and the schema record.
    assert!(applies.load(std::sync::atomic::Ordering::SeqCst) >= 2);

    // A handler not named in configuration is not installed.
    let silent = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let other = SchemaRegistry::start(
        config("leader-2"),
        Arc::new(MemoryLog::new()),
        Vec::new(),
        vec![Arc::new(CountingHandler(silent.clone())) as Arc<dyn store::StoreUpdateHandler>],
    )
    .unwrap();
    let elector = StaticElector::new(&other, 1);
    other.init(&elector).await.unwrap();
    other.register("sub1", avro(RECORD_V1), false).await.unwrap();
    assert_eq!(silent.load(std::sync::atomic::Ordering::SeqCst), 0);
}
