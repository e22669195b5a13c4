//! Worker-backed compression channel
//!
//! Compression runs on a dedicated thread so the host loop never blocks on it.
//! Requests and responses cross the boundary as owned messages tagged with a
//! correlation id; responses may come back in any order.
//!
//! Every submission resolves exactly once: with the worker's output, with the
//! worker's error, or with a timeout. A response for an id that already timed
//! out is dropped.

use crate::compress::{CompressionAlgorithm, CompressionOp, Compressor};
use crate::SyncError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Request sent to the worker
#[derive(Debug)]
pub struct WorkerRequest {
    pub id: u64,
    pub buffer: Vec<u8>,
    pub op: CompressionOp,
}

/// Worker reply; `buffer` holds the transformed bytes or the worker's error
#[derive(Debug)]
pub struct WorkerResponse {
    pub id: u64,
    pub buffer: Result<Vec<u8>, String>,
}

/// Worker side of a channel
pub struct WorkerEndpoint {
    pub requests: mpsc::UnboundedReceiver<WorkerRequest>,
    pub responses: mpsc::UnboundedSender<WorkerResponse>,
}

/// Configuration for the compression channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Algorithm used by the bundled worker
    pub algorithm: CompressionAlgorithm,
    /// Algorithm-specific level override
    pub level: Option<i32>,
    /// How long a request may wait for its response
    pub request_timeout: Duration,
    /// Maximum outstanding requests before submissions are refused
    pub max_pending: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Zstd,
            level: None,
            request_timeout: Duration::from_secs(5),
            max_pending: 64,
        }
    }
}

impl ChannelConfig {
    fn compressor(&self) -> Compressor {
        let compressor = Compressor::new(self.algorithm);
        match self.level {
            Some(level) => compressor.with_level(level),
            None => compressor,
        }
    }
}

type Waiter = oneshot::Sender<Result<Vec<u8>, SyncError>>;

#[derive(Default)]
struct PendingTable {
    waiters: HashMap<u64, Waiter>,
    /// Set once the worker hangs up
    closed: bool,
}

fn lock_table(table: &Mutex<PendingTable>) -> MutexGuard<'_, PendingTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes its id from the table if the submitting future is dropped early
struct PendingSlot<'a> {
    table: &'a Mutex<PendingTable>,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        lock_table(self.table).waiters.remove(&self.id);
    }
}

fn worker_gone() -> SyncError {
    SyncError::CompressionFailure("compression worker exited".to_string())
}

/// Async request/response multiplexer in front of a compression worker
pub struct CompressionChannel {
    next_id: AtomicU64,
    pending: Arc<Mutex<PendingTable>>,
    requests: mpsc::UnboundedSender<WorkerRequest>,
    config: ChannelConfig,
    dispatcher: JoinHandle<()>,
}

impl CompressionChannel {
    /// Start a channel backed by a dedicated compression thread
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: ChannelConfig) -> Result<Self, SyncError> {
        let compressor = config.compressor();
        let (channel, endpoint) = Self::with_worker(config);

        thread::Builder::new()
            .name("snapsync-compress".to_string())
            .spawn(move || run_worker(endpoint, compressor))
            .map_err(|e| {
                SyncError::CompressionFailure(format!("Failed to start compression worker: {e}"))
            })?;

        Ok(channel)
    }

    /// Create a channel whose worker side is driven by the caller
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_worker(config: ChannelConfig) -> (Self, WorkerEndpoint) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(PendingTable::default()));

        let dispatcher = tokio::spawn(dispatch(response_rx, pending.clone()));

        let channel = Self {
            next_id: AtomicU64::new(1),
            pending,
            requests: request_tx,
            config,
            dispatcher,
        };
        let endpoint = WorkerEndpoint {
            requests: request_rx,
            responses: response_tx,
        };

        (channel, endpoint)
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Number of requests awaiting a response
    pub fn pending_len(&self) -> usize {
        lock_table(&self.pending).waiters.len()
    }

    pub async fn compress(&self, buffer: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        self.submit(buffer, CompressionOp::Compress).await
    }

    pub async fn decompress(&self, buffer: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        self.submit(buffer, CompressionOp::Decompress).await
    }

    /// Send one request to the worker and wait for its response
    pub async fn submit(&self, buffer: Vec<u8>, op: CompressionOp) -> Result<Vec<u8>, SyncError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = oneshot::channel();

        {
            let mut table = lock_table(&self.pending);
            if table.closed {
                return Err(worker_gone());
            }
            if table.waiters.len() >= self.config.max_pending {
                warn!(id, limit = self.config.max_pending, "Compression queue full, refusing request");
                return Err(SyncError::CompressionBackpressure {
                    limit: self.config.max_pending,
                });
            }
            table.waiters.insert(id, tx);
        }
        let _slot = PendingSlot {
            table: &self.pending,
            id,
        };

        if self.requests.send(WorkerRequest { id, buffer, op }).is_err() {
            return Err(worker_gone());
        }

        match tokio::time::timeout(self.config.request_timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(worker_gone()),
            Err(_) => {
                let purged = lock_table(&self.pending).waiters.remove(&id).is_some();
                if purged {
                    warn!(id, timeout = ?self.config.request_timeout, "Compression request timed out");
                    return Err(SyncError::CompressionTimeout {
                        id,
                        timeout: self.config.request_timeout,
                    });
                }

                // The dispatcher resolved us between the deadline and the purge
                rx.try_recv().unwrap_or(Err(SyncError::CompressionTimeout {
                    id,
                    timeout: self.config.request_timeout,
                }))
            }
        }
    }
}

impl Drop for CompressionChannel {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Route worker responses back to their waiters
async fn dispatch(
    mut responses: mpsc::UnboundedReceiver<WorkerResponse>,
    pending: Arc<Mutex<PendingTable>>,
) {
    while let Some(response) = responses.recv().await {
        let waiter = lock_table(&pending).waiters.remove(&response.id);
        match waiter {
            Some(tx) => {
                let result = response.buffer.map_err(SyncError::CompressionFailure);
                let _ = tx.send(result);
            }
            None => debug!(id = response.id, "Discarding response for purged request"),
        }
    }

    let mut table = lock_table(&pending);
    table.closed = true;
    for (id, tx) in table.waiters.drain() {
        debug!(id, "Rejecting request, compression worker exited");
        let _ = tx.send(Err(worker_gone()));
    }
}

/// Blocking worker loop; returns when the channel side hangs up
pub fn run_worker(mut endpoint: WorkerEndpoint, compressor: Compressor) {
    debug!(algorithm = ?compressor.algorithm(), "Compression worker started");

    while let Some(request) = endpoint.requests.blocking_recv() {
        let buffer = compressor
            .transform(request.op, &request.buffer)
            .map_err(|e| e.to_string());

        if endpoint
            .responses
            .send(WorkerResponse {
                id: request.id,
                buffer,
            })
            .is_err()
        {
            break;
        }
    }

    debug!("Compression worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_through_worker() {
        let channel = CompressionChannel::spawn(ChannelConfig::default()).unwrap();
        let data = b"snapshot bytes ".repeat(100);

        let packed = channel.compress(data.clone()).await.unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(channel.decompress(packed).await.unwrap(), data);
        assert_eq!(channel.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_worker_error_rejects_request() {
        let channel = CompressionChannel::spawn(ChannelConfig::default()).unwrap();

        // Not a zstd frame
        let result = channel.decompress(vec![0x01, 0x02, 0x03, 0x04, 0x05]).await;
        assert!(matches!(result, Err(SyncError::CompressionFailure(_))));
        assert_eq!(channel.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_worker_hangup_rejects_pending() {
        let (channel, endpoint) = CompressionChannel::with_worker(ChannelConfig::default());
        let channel = Arc::new(channel);

        let submit = tokio::spawn({
            let channel = channel.clone();
            async move { channel.compress(vec![1, 2, 3]).await }
        });

        let WorkerEndpoint {
            mut requests,
            responses,
        } = endpoint;
        assert!(requests.recv().await.is_some());
        drop(responses);
        drop(requests);

        let result = submit.await.unwrap();
        assert_eq!(result, Err(worker_gone()));
        assert_eq!(channel.compress(vec![4]).await, Err(worker_gone()));
    }
}
