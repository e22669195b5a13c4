//! In-process transport used by the synchronizer tests
//!
//! Wraps a `ReplicaState` so every patch is really applied and verified, and
//! records what went over the "wire" for assertions.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use snapsync_state::channel::{WorkerEndpoint, WorkerResponse};
use snapsync_state::compress::Compressor;
use snapsync_state::{
    Ack, CompressionAlgorithm, ReplicaState, Snapshot, SnapshotSynchronizer, StateError,
    TransportClient, TransportError,
};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Patch { checksum: String },
    Full { len: usize },
    Tick(u64),
}

pub struct MockTransport {
    pub replica: Mutex<ReplicaState>,
    sent: Mutex<Vec<Sent>>,
    fail_heartbeat: Mutex<Option<TransportError>>,
    fail_full: Mutex<Option<TransportError>>,
    /// When set, heartbeats wait for a permit before being applied
    gate: Option<Semaphore>,
    /// Round-trip time added to every heartbeat and baseline
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            replica: Mutex::new(ReplicaState::new(CompressionAlgorithm::Zstd)),
            sent: Mutex::new(Vec::new()),
            fail_heartbeat: Mutex::new(None),
            fail_full: Mutex::new(None),
            gate: None,
            delay: None,
        }
    }

    /// Every request takes `round_trip` before it reaches the replica
    pub fn with_delay(round_trip: Duration) -> Self {
        Self {
            delay: Some(round_trip),
            ..Self::new()
        }
    }

    pub fn patches_sent(&self) -> usize {
        self.sent()
            .iter()
            .filter(|sent| matches!(sent, Sent::Patch { .. }))
            .count()
    }

    async fn travel(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Heartbeats block until `release` hands out permits
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn fail_next_heartbeat(&self, err: TransportError) {
        *self.fail_heartbeat.lock().unwrap() = Some(err);
    }

    pub fn fail_next_full(&self, err: TransportError) {
        *self.fail_full.lock().unwrap() = Some(err);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn replica_bytes(&self) -> Vec<u8> {
        self.replica.lock().unwrap().snapshot().to_vec()
    }

    /// Make the server's copy diverge from what the client believes
    pub fn corrupt_replica(&self) {
        self.replica
            .lock()
            .unwrap()
            .apply_full(Snapshot::from(b"diverged replica".to_vec()));
    }
}

#[async_trait]
impl TransportClient for MockTransport {
    async fn heartbeat(&self, patch: Vec<u8>, checksum: String) -> Result<Ack, TransportError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| TransportError::Failure(e.to_string()))?
                .forget();
        }
        self.travel().await;

        self.sent.lock().unwrap().push(Sent::Patch {
            checksum: checksum.clone(),
        });
        if let Some(err) = self.fail_heartbeat.lock().unwrap().take() {
            return Err(err);
        }

        let mut replica = self.replica.lock().unwrap();
        match replica.apply_patch(&patch, &checksum) {
            Ok(checksum) => Ok(Ack { checksum }),
            Err(StateError::ChecksumMismatch { expected, actual }) => {
                Err(TransportError::ChecksumMismatch {
                    expected: expected.to_hex(),
                    actual: actual.to_hex(),
                })
            }
            Err(e) => Err(TransportError::Failure(e.to_string())),
        }
    }

    async fn full_heartbeat(&self, snapshot: Bytes) -> Result<Ack, TransportError> {
        self.travel().await;
        self.sent.lock().unwrap().push(Sent::Full {
            len: snapshot.len(),
        });
        if let Some(err) = self.fail_full.lock().unwrap().take() {
            return Err(err);
        }

        let checksum = self
            .replica
            .lock()
            .unwrap()
            .apply_full(Snapshot::from(snapshot));
        Ok(Ack { checksum })
    }

    async fn tick(&self, tick: u64) {
        self.sent.lock().unwrap().push(Sent::Tick(tick));
    }
}

/// Serve compression requests from a hand-held worker endpoint
pub fn spawn_worker(endpoint: WorkerEndpoint) -> tokio::task::JoinHandle<()> {
    let WorkerEndpoint {
        mut requests,
        responses,
    } = endpoint;
    tokio::spawn(async move {
        let compressor = Compressor::default();
        while let Some(request) = requests.recv().await {
            let buffer = compressor
                .transform(request.op, &request.buffer)
                .map_err(|e| e.to_string());
            if responses
                .send(WorkerResponse {
                    id: request.id,
                    buffer,
                })
                .is_err()
            {
                break;
            }
        }
    })
}

/// Poll until `done` holds, failing the test after a few seconds
pub async fn poll_until<F>(sync: &mut SnapshotSynchronizer, mut done: F)
where
    F: FnMut(&SnapshotSynchronizer) -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            sync.poll();
            if done(sync) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

pub async fn wait_for_sent(transport: &MockTransport, count: usize) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while transport.sent().len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "transport never saw {count} messages");
}
