//! In-memory transport with an unreliable link between client and replica

use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snapsync_state::{
    Ack, Checksum, CompressionAlgorithm, ReplicaState, Snapshot, StateError, TransportClient,
    TransportError,
};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NetworkConditions {
    /// Probability a request or its reply is lost (0.0 to 1.0)
    pub loss: f64,
    /// Base one-way latency in milliseconds
    pub latency_ms: u64,
    /// Latency jitter in milliseconds
    pub jitter_ms: u64,
    /// Probability a patch byte is flipped in transit (0.0 to 1.0)
    pub corruption: f64,
    /// Seed for the loss/jitter/corruption decisions
    pub seed: u64,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self {
            loss: 0.0,
            latency_ms: 0,
            jitter_ms: 0,
            corruption: 0.0,
            seed: 0,
        }
    }
}

impl NetworkConditions {
    /// Perfect network conditions
    pub fn perfect() -> Self {
        Self::default()
    }

    /// Typical mobile network (3G/4G)
    pub fn mobile() -> Self {
        Self {
            loss: 0.02,
            latency_ms: 150,
            jitter_ms: 50,
            corruption: 0.001,
            seed: 0,
        }
    }

    /// Poor network conditions
    pub fn poor() -> Self {
        Self {
            loss: 0.10,
            latency_ms: 500,
            jitter_ms: 200,
            corruption: 0.02,
            seed: 0,
        }
    }

    /// Satellite internet conditions
    pub fn satellite() -> Self {
        Self {
            loss: 0.01,
            latency_ms: 600,
            jitter_ms: 100,
            corruption: 0.005,
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// What happened on the simulated link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub patches: u64,
    pub baselines: u64,
    pub ticks: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub mismatches: u64,
    pub forced_failures: u64,
}

struct Link {
    conditions: NetworkConditions,
    rng: StdRng,
    forced_failures: u32,
    stats: LoopbackStats,
}

/// [`TransportClient`] whose server is a [`ReplicaState`] in the same process
///
/// Latency uses `tokio::time::sleep`, so tests with paused time run instantly.
pub struct LoopbackTransport {
    link: Mutex<Link>,
    replica: Mutex<ReplicaState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Fate {
    Deliver { corrupt: bool },
    /// Lost before reaching the replica
    LostRequest,
    /// Applied by the replica, reply lost
    LostReply,
    Forced,
}

impl LoopbackTransport {
    pub fn new(conditions: NetworkConditions) -> Self {
        Self::with_algorithm(conditions, CompressionAlgorithm::default())
    }

    pub fn with_algorithm(conditions: NetworkConditions, algorithm: CompressionAlgorithm) -> Self {
        Self {
            link: Mutex::new(Link {
                rng: StdRng::seed_from_u64(conditions.seed),
                conditions,
                forced_failures: 0,
                stats: LoopbackStats::default(),
            }),
            replica: Mutex::new(ReplicaState::new(algorithm)),
        }
    }

    pub fn perfect() -> Self {
        Self::new(NetworkConditions::perfect())
    }

    pub fn set_conditions(&self, conditions: NetworkConditions) {
        let mut link = lock(&self.link);
        link.rng = StdRng::seed_from_u64(conditions.seed);
        link.conditions = conditions;
    }

    /// Fail the next `count` heartbeats or baselines outright
    pub fn fail_next(&self, count: u32) {
        lock(&self.link).forced_failures += count;
    }

    pub fn stats(&self) -> LoopbackStats {
        lock(&self.link).stats.clone()
    }

    pub fn replica_snapshot(&self) -> Snapshot {
        lock(&self.replica).snapshot().clone()
    }

    pub fn replica_checksum(&self) -> Checksum {
        lock(&self.replica).checksum()
    }

    /// Replace the replica's snapshot without telling the client
    pub fn overwrite_replica(&self, snapshot: Snapshot) {
        lock(&self.replica).apply_full(snapshot);
    }

    fn decide(&self, patch_len: usize) -> (Fate, Duration) {
        let mut link = lock(&self.link);
        let Link {
            conditions,
            rng,
            forced_failures,
            stats,
        } = &mut *link;

        let delay = {
            let jitter = if conditions.jitter_ms > 0 {
                rng.gen_range(0..=conditions.jitter_ms)
            } else {
                0
            };
            Duration::from_millis(2 * conditions.latency_ms + jitter)
        };

        if *forced_failures > 0 {
            *forced_failures -= 1;
            stats.forced_failures += 1;
            return (Fate::Forced, delay);
        }

        if conditions.loss > 0.0 && rng.gen_bool(conditions.loss.min(1.0)) {
            stats.dropped += 1;
            let fate = if rng.gen_bool(0.5) {
                Fate::LostRequest
            } else {
                Fate::LostReply
            };
            return (fate, delay);
        }

        let corrupt = patch_len > 0
            && conditions.corruption > 0.0
            && rng.gen_bool(conditions.corruption.min(1.0));
        if corrupt {
            stats.corrupted += 1;
        }
        (Fate::Deliver { corrupt }, delay)
    }

    fn flip_byte(&self, patch: &mut [u8]) {
        let at = lock(&self.link).rng.gen_range(0..patch.len());
        patch[at] ^= 0x5a;
    }
}

#[async_trait]
impl TransportClient for LoopbackTransport {
    async fn heartbeat(&self, mut patch: Vec<u8>, checksum: String) -> Result<Ack, TransportError> {
        let (fate, delay) = self.decide(patch.len());
        tokio::time::sleep(delay).await;

        match fate {
            Fate::Forced => return Err(TransportError::Failure("injected failure".to_string())),
            Fate::LostRequest => return Err(TransportError::Failure("request lost".to_string())),
            Fate::Deliver { corrupt: true } => self.flip_byte(&mut patch),
            Fate::Deliver { corrupt: false } | Fate::LostReply => {}
        }

        let result = lock(&self.replica).apply_patch(&patch, &checksum);
        lock(&self.link).stats.patches += 1;

        if matches!(fate, Fate::LostReply) {
            return Err(TransportError::Failure("reply lost".to_string()));
        }

        match result {
            Ok(checksum) => Ok(Ack { checksum }),
            Err(StateError::ChecksumMismatch { expected, actual }) => {
                lock(&self.link).stats.mismatches += 1;
                Err(TransportError::ChecksumMismatch {
                    expected: expected.to_hex(),
                    actual: actual.to_hex(),
                })
            }
            Err(e) => Err(TransportError::Failure(e.to_string())),
        }
    }

    async fn full_heartbeat(&self, snapshot: Bytes) -> Result<Ack, TransportError> {
        let (fate, delay) = self.decide(0);
        tokio::time::sleep(delay).await;

        match fate {
            Fate::Forced => Err(TransportError::Failure("injected failure".to_string())),
            Fate::LostRequest => Err(TransportError::Failure("request lost".to_string())),
            Fate::LostReply => {
                lock(&self.replica).apply_full(Snapshot::from(snapshot));
                lock(&self.link).stats.baselines += 1;
                Err(TransportError::Failure("reply lost".to_string()))
            }
            Fate::Deliver { .. } => {
                let checksum = lock(&self.replica).apply_full(Snapshot::from(snapshot));
                lock(&self.link).stats.baselines += 1;
                Ok(Ack { checksum })
            }
        }
    }

    async fn tick(&self, _tick: u64) {
        lock(&self.link).stats.ticks += 1;
    }
}
