use crate::StoreError;
use bytes::Bytes;
use tokio::sync::watch;

/// Producer generation token. A transport rejects appends from any epoch
/// older than the newest it has observed, which fences a deposed leader's
/// in-flight writes.
pub type Epoch = i64;

/// One durable log record. `value: None` is a compaction tombstone.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub offset: i64,
    pub key: Bytes,
    pub value: Option<Bytes>,
}

/// The append-only log underneath a [`crate::LogStore`].
///
/// Implementations must totally order appends and serve reads of the same
/// order to every subscriber; compaction is permitted behind the reported
/// end offset but the in-process implementation never compacts.
#[async_trait::async_trait]
pub trait LogTransport: Send + Sync + 'static {
    /// Append one record under the producer epoch, returning its offset.
    async fn append(
        &self,
        epoch: Epoch,
        key: Bytes,
        value: Option<Bytes>,
    ) -> Result<i64, StoreError>;

    /// Raise the fencing epoch without writing, so older producers are
    /// rejected from the instant a new leader takes over.
    async fn fence(&self, epoch: Epoch) -> Result<(), StoreError>;

    /// Offset one past the last appended record.
    async fn end_offset(&self) -> i64;

    /// Return records at or after `offset`, waiting until at least one
    /// exists. Batches are bounded but otherwise unspecified in size.
    async fn read_from(&self, offset: i64) -> Result<Vec<LogRecord>, StoreError>;
}

const READ_BATCH: usize = 256;

/// An in-process, shared log with fencing semantics. Every node of an
/// in-process cluster holds the same `Arc<MemoryLog>`.
pub struct MemoryLog {
    inner: std::sync::Mutex<Inner>,
    end_tx: watch::Sender<i64>,
    end_rx: watch::Receiver<i64>,
}

struct Inner {
    records: Vec<LogRecord>,
    epoch: Epoch,
}

impl MemoryLog {
    pub fn new() -> Self {
        let (end_tx, end_rx) = watch::channel(0i64);
        Self {
            inner: std::sync::Mutex::new(Inner {
                records: Vec::new(),
                epoch: 0,
            }),
            end_tx,
            end_rx,
        }
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LogTransport for MemoryLog {
    async fn append(
        &self,
        epoch: Epoch,
        key: Bytes,
        value: Option<Bytes>,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        if epoch < inner.epoch {
            return Err(StoreError::Fenced {
                epoch,
                latest: inner.epoch,
            });
        }
        inner.epoch = epoch;

        let offset = inner.records.len() as i64;
        inner.records.push(LogRecord { offset, key, value });
        self.end_tx.send_replace(offset + 1);

        Ok(offset)
    }

    async fn fence(&self, epoch: Epoch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if epoch < inner.epoch {
            return Err(StoreError::Fenced {
                epoch,
                latest: inner.epoch,
            });
        }
        inner.epoch = epoch;
        Ok(())
    }

    async fn end_offset(&self) -> i64 {
        *self.end_rx.borrow()
    }

    async fn read_from(&self, offset: i64) -> Result<Vec<LogRecord>, StoreError> {
        let mut end_rx = self.end_rx.clone();

        loop {
            {
                let inner = self.inner.lock().unwrap();
                if (offset as usize) < inner.records.len() {
                    let upper = inner.records.len().min(offset as usize + READ_BATCH);
                    return Ok(inner.records[offset as usize..upper].to_vec());
                }
            }
            end_rx
                .changed()
                .await
                .map_err(|_| StoreError::Unavailable("log was dropped".to_string()))?;
        }
    }
}
