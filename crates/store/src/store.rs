use crate::cache::LookupCache;
use crate::serializer::Serializer;
use crate::transport::{Epoch, LogTransport};
use crate::StoreError;
use models::{RegistryKey, RegistryValue};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;
use tokio::sync::watch;

/// Additional side effects run by the log consumer after each apply.
pub trait StoreUpdateHandler: Send + Sync + 'static {
    /// The name by which node configuration selects this handler.
    fn name(&self) -> &'static str;

    fn handle_update(
        &self,
        key: &RegistryKey,
        value: Option<&RegistryValue>,
        old: Option<&RegistryValue>,
        offset: i64,
    );
}

#[derive(Debug, Clone)]
pub struct LogStoreOptions {
    /// Deadline for producer acks and read barriers.
    pub timeout: Duration,
    /// Upper bound on the serialized size of one record.
    pub max_record_bytes: usize,
}

impl Default for LogStoreOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            max_record_bytes: 1 << 20,
        }
    }
}

/// The durable store: a single-writer producer over the log, and a
/// background consumer which applies every record, in log order, to the
/// in-memory [`LookupCache`].
///
/// All nodes run the consumer; only the leader's producer epoch is set.
pub struct LogStore {
    transport: Arc<dyn LogTransport>,
    serializer: Arc<dyn Serializer>,
    cache: Arc<RwLock<LookupCache>>,
    options: LogStoreOptions,

    // Producer epoch; `None` on followers.
    epoch: Mutex<Option<Epoch>>,
    // Offset of our last accepted write, the default read-barrier target.
    last_written: Mutex<Option<i64>>,
    // Count of records the local consumer has applied.
    applied_rx: watch::Receiver<i64>,

    subject_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    leader_lock: tokio::sync::Mutex<()>,

    consumer: tokio::task::JoinHandle<()>,
}

impl LogStore {
    /// Start the store and its consumer task. The consumer reads from the
    /// log head so a restarted node rebuilds its cache by replay.
    pub fn start(
        transport: Arc<dyn LogTransport>,
        serializer: Arc<dyn Serializer>,
        update_handlers: Vec<Arc<dyn StoreUpdateHandler>>,
        options: LogStoreOptions,
    ) -> Arc<Self> {
        let cache = Arc::new(RwLock::new(LookupCache::default()));
        let (applied_tx, applied_rx) = watch::channel(0i64);

        let consumer = tokio::spawn(consume(
            transport.clone(),
            serializer.clone(),
            cache.clone(),
            update_handlers,
            applied_tx,
        ));

        Arc::new(Self {
            transport,
            serializer,
            cache,
            options,
            epoch: Mutex::new(None),
            last_written: Mutex::new(None),
            applied_rx,
            subject_locks: Mutex::new(HashMap::new()),
            leader_lock: tokio::sync::Mutex::new(()),
            consumer,
        })
    }

    pub fn is_leader(&self) -> bool {
        self.epoch.lock().unwrap().is_some()
    }

    /// Take over as the single writer under `epoch`. Raises the transport
    /// fence first, so a deposed leader's writes are rejected from here on.
    pub async fn assume_leader(&self, epoch: Epoch) -> Result<(), StoreError> {
        self.transport.fence(epoch).await?;
        *self.epoch.lock().unwrap() = Some(epoch);
        self.mark_last_written_offset_invalid();
        Ok(())
    }

    pub fn resign_leader(&self) {
        *self.epoch.lock().unwrap() = None;
        self.mark_last_written_offset_invalid();
    }

    /// Force the next read barrier to re-query the log end rather than
    /// trusting an offset written under a previous leader.
    pub fn mark_last_written_offset_invalid(&self) {
        *self.last_written.lock().unwrap() = None;
    }

    /// Write a record and block until the local consumer has observed it.
    pub async fn put(&self, key: RegistryKey, value: RegistryValue) -> Result<(), StoreError> {
        let offset = self.produce(&key, Some(&value)).await?;
        self.wait_for_offset(offset, self.options.timeout).await
    }

    /// Tombstone a key and block for local readback.
    pub async fn delete(&self, key: RegistryKey) -> Result<(), StoreError> {
        let offset = self.produce(&key, None).await?;
        self.wait_for_offset(offset, self.options.timeout).await
    }

    /// The latest locally materialized value.
    pub fn get(&self, key: &RegistryKey) -> Option<RegistryValue> {
        self.cache.read().unwrap().get(key).cloned()
    }

    /// All records within the inclusive key range, in key order.
    pub fn get_all(&self, range: RangeInclusive<RegistryKey>) -> Vec<(RegistryKey, RegistryValue)> {
        self.cache.read().unwrap().range(range)
    }

    /// Shared read access to the materialized cache and its indexes.
    pub fn cache(&self) -> RwLockReadGuard<'_, LookupCache> {
        self.cache.read().unwrap()
    }

    /// A read barrier: returns once the local consumer has consumed up to
    /// the last produced offset. On the leader this writes a noop record
    /// when no write watermark is known; followers fall back to the
    /// transport's end offset.
    pub async fn wait_until_reader_reaches_last_offset(
        &self,
        subject: Option<&str>,
        timeout: Duration,
    ) -> Result<(), StoreError> {
        let known = *self.last_written.lock().unwrap();

        let target = match known {
            Some(offset) => offset,
            None if self.is_leader() => {
                self.produce(
                    &RegistryKey::Noop {
                        subject: subject.map(str::to_string),
                    },
                    Some(&RegistryValue::Noop),
                )
                .await?
            }
            None => self.transport.end_offset().await - 1,
        };

        if target < 0 {
            return Ok(());
        }
        self.wait_for_offset(target, timeout).await
    }

    /// Block until the local consumer reaches the current log end.
    /// Used to catch up before a new leader begins serving writes.
    pub async fn wait_until_caught_up_with_log_end(
        &self,
        timeout: Duration,
    ) -> Result<(), StoreError> {
        let target = self.transport.end_offset().await - 1;
        if target < 0 {
            return Ok(());
        }
        self.wait_for_offset(target, timeout).await
    }

    /// Per-subject mutex serializing writer-side orchestration.
    pub fn lock_for(&self, subject: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.subject_locks.lock().unwrap();
        locks
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Coarse lock guarding leader-identity reads and transitions.
    /// Nests inside `lock_for`; never take them in the reverse order.
    pub fn leader_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.leader_lock
    }

    async fn produce(
        &self,
        key: &RegistryKey,
        value: Option<&RegistryValue>,
    ) -> Result<i64, StoreError> {
        let Some(epoch) = *self.epoch.lock().unwrap() else {
            return Err(StoreError::NotLeader);
        };

        let key_bytes = self.serializer.serialize_key(key)?;
        let value_bytes = value
            .map(|v| self.serializer.serialize_value(v))
            .transpose()?;

        let size = key_bytes.len() + value_bytes.as_ref().map_or(0, |v| v.len());
        if size > self.options.max_record_bytes {
            return Err(StoreError::TooLarge {
                size,
                limit: self.options.max_record_bytes,
            });
        }

        let offset = self
            .transport
            .append(epoch, key_bytes, value_bytes)
            .await
            .map_err(|err| match err {
                // A fenced producer means another node took leadership.
                StoreError::Fenced { .. } => StoreError::NotLeader,
                err => err,
            })?;

        *self.last_written.lock().unwrap() = Some(offset);
        Ok(offset)
    }

    async fn wait_for_offset(&self, offset: i64, timeout: Duration) -> Result<(), StoreError> {
        let mut rx = self.applied_rx.clone();

        let wait = async {
            loop {
                if *rx.borrow_and_update() > offset {
                    return Ok(());
                }
                rx.changed()
                    .await
                    .map_err(|_| StoreError::Unavailable("log consumer stopped".to_string()))?;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

// The consumer: single-threaded, applies records strictly in log order.
// All nodes converge to the same cache state modulo lag.
async fn consume(
    transport: Arc<dyn LogTransport>,
    serializer: Arc<dyn Serializer>,
    cache: Arc<RwLock<LookupCache>>,
    update_handlers: Vec<Arc<dyn StoreUpdateHandler>>,
    applied_tx: watch::Sender<i64>,
) {
    let mut next = 0i64;

    loop {
        let batch = match transport.read_from(next).await {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!(%err, "log read failed, retrying");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        for record in batch {
            let decoded = serializer.deserialize_key(&record.key).and_then(|key| {
                let value = record
                    .value
                    .as_ref()
                    .map(|bytes| serializer.deserialize_value(bytes))
                    .transpose()?;
                Ok((key, value))
            });

            match decoded {
                Ok((key, value)) => {
                    let old = {
                        let mut cache = cache.write().unwrap();
                        let old = cache.get(&key).cloned();
                        cache.apply(&key, value.as_ref());
                        old
                    };
                    for handler in &update_handlers {
                        handler.handle_update(&key, value.as_ref(), old.as_ref(), record.offset);
                    }
                }
                Err(err) => {
                    // A record we cannot decode must not wedge the state
                    // machine; skip it and keep the offset moving.
                    tracing::warn!(offset = record.offset, %err, "skipping undecodable record");
                }
            }

            next = record.offset + 1;
            applied_tx.send_replace(next);
        }
    }
}
