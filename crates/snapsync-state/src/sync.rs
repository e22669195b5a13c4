//! Snapshot synchronization protocol implementation
//!
//! The synchronizer diffs each new snapshot against the last one the server
//! acknowledged, compresses the patch on the compression worker, and sends it
//! with the checksum of the full new snapshot. Any failure pushes a full
//! baseline instead of retrying the patch.
//!
//! It owns no thread. `update` returns immediately; attempts run as tokio
//! tasks and report back over a channel that the synchronizer drains itself,
//! so `last_acked` is only ever touched from the caller's context. At most one
//! attempt is in flight: snapshots that arrive meanwhile are parked, latest
//! wins, and diffed only once the attempt resolves.
//!
//! Every `update` bumps the generation. An attempt whose patch is still being
//! compressed when a newer generation arrives is dropped before transmission.
//! Once a patch is on the wire it is not superseded: the server applies it
//! whatever the client does next, so its ack still moves `last_acked` and the
//! parked snapshot is diffed against that. Outcomes of abandoned attempts
//! (`init`, disabling the policy) are discarded.

use crate::channel::{ChannelConfig, CompressionChannel};
use crate::diff::{DeltaCodec, SpanCodec};
use crate::snapshot::Snapshot;
use crate::transport::TransportClient;
use crate::SyncError;
use snapsync_hash::IntegrityHasher;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Whether synchronization runs at all
///
/// Checked on every update; the host may change it at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Connected to the backend
    pub online: bool,
    /// Running a networked session
    pub networked: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::enabled()
    }
}

impl SyncPolicy {
    pub fn enabled() -> Self {
        Self {
            online: true,
            networked: true,
        }
    }

    /// Isolated play: liveness ticks only
    pub fn offline() -> Self {
        Self {
            online: false,
            networked: true,
        }
    }

    pub fn sync_enabled(&self) -> bool {
        self.online && self.networked
    }
}

/// Configuration for the synchronizer
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub policy: SyncPolicy,
    pub channel: ChannelConfig,
}

/// Externally visible synchronizer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    AwaitingCompression,
    AwaitingAck,
    Recovering,
}

const PHASE_COMPRESSING: u8 = 0;
const PHASE_AWAITING_ACK: u8 = 1;

/// What an attempt transmits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    /// Compressed patch against `last_acked`
    Delta,
    /// Full snapshot from `init` or after a disabled period
    Baseline,
    /// Full snapshot pushed after a failed delta
    Recovery,
}

/// Result of a call to `init` or `update`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Sync is off; only a liveness tick went out
    PolicyDisabled,
    /// A new attempt was started
    Started { generation: u64, kind: AttemptKind },
    /// Another attempt is in flight; the snapshot waits for it
    Queued { generation: u64 },
}

/// Counters for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub deltas_sent: u64,
    pub baselines_sent: u64,
    pub ticks_sent: u64,
    pub acks: u64,
    pub failures: u64,
    pub recoveries: u64,
    /// Attempts dropped before transmission by a newer generation
    pub superseded: u64,
    /// Outcomes that arrived for an attempt no longer in flight
    pub stale_discarded: u64,
    /// Parked snapshots replaced by a newer one before being sent
    pub coalesced: u64,
    pub patch_bytes: u64,
    pub compressed_bytes: u64,
}

#[derive(Debug)]
enum AttemptResult {
    Acked,
    Superseded,
    Failed(SyncError),
}

#[derive(Debug)]
struct AttemptOutcome {
    attempt: u64,
    generation: u64,
    result: AttemptResult,
    compressed_len: Option<usize>,
}

struct InFlight {
    attempt: u64,
    generation: u64,
    kind: AttemptKind,
    snapshot: Snapshot,
    phase: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

/// Keeps the server's copy of a snapshot in step with the local one
pub struct SnapshotSynchronizer {
    transport: Arc<dyn TransportClient>,
    codec: Arc<dyn DeltaCodec>,
    channel: Arc<CompressionChannel>,
    hasher: IntegrityHasher,
    policy: SyncPolicy,

    /// Snapshot the server is believed to hold
    last_acked: Snapshot,
    /// Most recent snapshot handed in by the host
    current: Snapshot,
    /// Parked snapshot waiting for the in-flight attempt
    queued: Option<Snapshot>,
    /// Next transmission must be a full snapshot
    needs_baseline: bool,

    generation: u64,
    /// Shared with attempt tasks for the pre-transmission check
    latest_generation: Arc<AtomicU64>,
    next_attempt: u64,
    in_flight: Option<InFlight>,
    tick: u64,

    outcomes_tx: mpsc::UnboundedSender<AttemptOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<AttemptOutcome>,
    stats: SyncStats,
}

impl SnapshotSynchronizer {
    /// Create a synchronizer with its own compression worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        initial: Snapshot,
        transport: Arc<dyn TransportClient>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let channel = Arc::new(CompressionChannel::spawn(config.channel)?);
        Ok(Self::from_parts(
            initial,
            transport,
            channel,
            Arc::new(SpanCodec),
            config.policy,
        ))
    }

    /// Assemble a synchronizer from existing collaborators
    pub fn from_parts(
        initial: Snapshot,
        transport: Arc<dyn TransportClient>,
        channel: Arc<CompressionChannel>,
        codec: Arc<dyn DeltaCodec>,
        policy: SyncPolicy,
    ) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        Self {
            transport,
            codec,
            channel,
            hasher: IntegrityHasher::new(snapsync_hash::Checksum::SNAPSHOT_SEED),
            policy,
            last_acked: initial.clone(),
            current: initial,
            queued: None,
            needs_baseline: true,
            generation: 0,
            latest_generation: Arc::new(AtomicU64::new(0)),
            next_attempt: 0,
            in_flight: None,
            tick: 0,
            outcomes_tx,
            outcomes_rx,
            stats: SyncStats::default(),
        }
    }

    /// Push the current snapshot as a full baseline
    ///
    /// Any in-flight attempt is abandoned; its outcome will be discarded.
    pub fn init(&mut self) -> UpdateStatus {
        if !self.policy.sync_enabled() {
            debug!("Sync disabled by policy, skipping baseline");
            self.needs_baseline = true;
            return UpdateStatus::PolicyDisabled;
        }

        self.abandon_in_flight();
        self.queued = None;
        self.advance_generation();
        let snapshot = self.current.clone();
        self.launch_baseline(snapshot, AttemptKind::Baseline)
    }

    /// Hand in the latest snapshot; never waits
    ///
    /// Finished attempts are applied first. If nothing is in flight afterwards
    /// this snapshot is started right away and any older parked one is dropped.
    pub fn update(&mut self, snapshot: Snapshot) -> UpdateStatus {
        self.drain_outcomes();
        self.tick += 1;
        self.current = snapshot.clone();

        if !self.policy.sync_enabled() {
            self.needs_baseline = true;
            self.send_tick();
            return UpdateStatus::PolicyDisabled;
        }

        let generation = self.advance_generation();

        if self.in_flight.is_some() {
            if self.queued.replace(snapshot).is_some() {
                self.stats.coalesced += 1;
            }
            debug!(generation, "Attempt in flight, parking snapshot");
            return UpdateStatus::Queued { generation };
        }

        if self.queued.take().is_some() {
            self.stats.coalesced += 1;
        }
        self.start_attempt(snapshot)
    }

    /// Apply finished attempts and start the parked snapshot if possible
    ///
    /// Returns the number of outcomes processed.
    pub fn poll(&mut self) -> usize {
        let handled = self.drain_outcomes();
        self.start_queued();
        handled
    }

    fn drain_outcomes(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(outcome) = self.outcomes_rx.try_recv() {
            self.handle_outcome(outcome);
            handled += 1;
        }
        handled
    }

    /// Wait until nothing is in flight or parked
    pub async fn settle(&mut self) {
        loop {
            self.poll();
            if self.in_flight.is_none() {
                break;
            }
            match self.outcomes_rx.recv().await {
                Some(outcome) => self.handle_outcome(outcome),
                None => break,
            }
        }
    }

    /// Change the policy; re-enabling forces a baseline
    pub fn set_policy(&mut self, policy: SyncPolicy) {
        if policy == self.policy {
            return;
        }
        info!(?policy, "Sync policy changed");
        self.policy = policy;

        if !policy.sync_enabled() {
            self.abandon_in_flight();
            self.queued = None;
            self.needs_baseline = true;
        }
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    pub fn state(&self) -> SyncState {
        match &self.in_flight {
            None => SyncState::Idle,
            Some(flight) if flight.kind == AttemptKind::Recovery => SyncState::Recovering,
            Some(flight) => match flight.phase.load(Ordering::Acquire) {
                PHASE_COMPRESSING => SyncState::AwaitingCompression,
                _ => SyncState::AwaitingAck,
            },
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Generation of the in-flight attempt, if any
    pub fn in_flight_generation(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.generation)
    }

    pub fn last_acked(&self) -> &Snapshot {
        &self.last_acked
    }

    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    pub fn has_queued(&self) -> bool {
        self.queued.is_some()
    }

    /// True when the next transmission will be a full snapshot
    pub fn needs_baseline(&self) -> bool {
        self.needs_baseline
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn channel(&self) -> &Arc<CompressionChannel> {
        &self.channel
    }

    fn advance_generation(&mut self) -> u64 {
        self.generation += 1;
        self.latest_generation
            .store(self.generation, Ordering::Release);
        self.generation
    }

    fn next_attempt_id(&mut self) -> u64 {
        self.next_attempt += 1;
        self.next_attempt
    }

    fn start_queued(&mut self) {
        if self.in_flight.is_some() || !self.policy.sync_enabled() {
            return;
        }
        if let Some(next) = self.queued.take() {
            self.start_attempt(next);
        }
    }

    fn start_attempt(&mut self, snapshot: Snapshot) -> UpdateStatus {
        if self.needs_baseline {
            return self.launch_baseline(snapshot, AttemptKind::Baseline);
        }

        let patch = match self.codec.diff(self.last_acked.as_bytes(), snapshot.as_bytes()) {
            Ok(patch) => patch,
            Err(e) => {
                warn!(error = %e, "Failed to diff snapshot, sending baseline");
                return self.launch_baseline(snapshot, AttemptKind::Recovery);
            }
        };
        let checksum = self.hasher.checksum(snapshot.as_bytes()).to_hex();
        self.stats.patch_bytes += patch.len() as u64;

        let attempt = self.next_attempt_id();
        let generation = self.generation;
        let phase = Arc::new(AtomicU8::new(PHASE_COMPRESSING));

        let task = tokio::spawn(run_delta(
            DeltaAttempt {
                attempt,
                generation,
                patch,
                checksum,
            },
            self.channel.clone(),
            self.transport.clone(),
            self.latest_generation.clone(),
            phase.clone(),
            self.outcomes_tx.clone(),
        ));

        debug!(generation, attempt, "Started delta attempt");
        self.in_flight = Some(InFlight {
            attempt,
            generation,
            kind: AttemptKind::Delta,
            snapshot,
            phase,
            task,
        });

        UpdateStatus::Started {
            generation,
            kind: AttemptKind::Delta,
        }
    }

    fn launch_baseline(&mut self, snapshot: Snapshot, kind: AttemptKind) -> UpdateStatus {
        // The baseline becomes the reference for the next patch right away
        self.last_acked = snapshot.clone();
        self.needs_baseline = false;

        let attempt = self.next_attempt_id();
        let generation = self.generation;
        let phase = Arc::new(AtomicU8::new(PHASE_AWAITING_ACK));
        let transport = self.transport.clone();
        let outcomes = self.outcomes_tx.clone();
        let bytes = snapshot.to_bytes();

        let task = tokio::spawn(async move {
            let result = match transport.full_heartbeat(bytes).await {
                Ok(_) => AttemptResult::Acked,
                Err(e) => AttemptResult::Failed(e.into()),
            };
            let _ = outcomes.send(AttemptOutcome {
                attempt,
                generation,
                result,
                compressed_len: None,
            });
        });

        debug!(generation, attempt, ?kind, len = snapshot.len(), "Sending full baseline");
        self.stats.baselines_sent += 1;
        self.in_flight = Some(InFlight {
            attempt,
            generation,
            kind,
            snapshot,
            phase,
            task,
        });

        UpdateStatus::Started { generation, kind }
    }

    fn abandon_in_flight(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            debug!(
                generation = flight.generation,
                attempt = flight.attempt,
                "Abandoning in-flight attempt"
            );
            // No network cancellation: the task runs to completion and its
            // outcome is discarded as stale
        }
    }

    fn handle_outcome(&mut self, outcome: AttemptOutcome) {
        let flight = match self.in_flight.take() {
            Some(flight) if flight.attempt == outcome.attempt => flight,
            other => {
                self.in_flight = other;
                self.stats.stale_discarded += 1;
                debug!(
                    generation = outcome.generation,
                    attempt = outcome.attempt,
                    "Discarding stale attempt outcome"
                );
                return;
            }
        };

        if let Some(len) = outcome.compressed_len {
            self.stats.compressed_bytes += len as u64;
        }

        match outcome.result {
            AttemptResult::Acked => {
                self.stats.acks += 1;
                if flight.kind == AttemptKind::Delta {
                    self.stats.deltas_sent += 1;
                }
                debug!(generation = flight.generation, kind = ?flight.kind, "Snapshot acknowledged");
                self.last_acked = flight.snapshot;
            }
            AttemptResult::Superseded => {
                self.stats.superseded += 1;
                debug!(generation = flight.generation, "Attempt superseded before transmission");
            }
            AttemptResult::Failed(err) => {
                self.stats.failures += 1;
                if flight.kind == AttemptKind::Delta && outcome.compressed_len.is_some() {
                    self.stats.deltas_sent += 1;
                }
                warn!(generation = flight.generation, kind = ?flight.kind, error = %err, "Sync attempt failed");
                self.recover(flight);
            }
        }
    }

    /// Full-baseline fallback after a failed attempt
    fn recover(&mut self, failed: InFlight) {
        match failed.kind {
            AttemptKind::Delta => {
                self.last_acked = failed.snapshot;
                if !self.policy.sync_enabled() {
                    self.needs_baseline = true;
                    return;
                }
                self.stats.recoveries += 1;
                self.queued = None;
                self.advance_generation();
                let snapshot = self.current.clone();
                info!(len = snapshot.len(), "Resyncing baseline");
                self.launch_baseline(snapshot, AttemptKind::Recovery);
            }
            AttemptKind::Baseline | AttemptKind::Recovery => {
                // One extra round trip at most: the next update sends a baseline
                self.needs_baseline = true;
            }
        }
    }

    fn send_tick(&mut self) {
        let transport = self.transport.clone();
        let tick = self.tick;
        self.stats.ticks_sent += 1;
        tokio::spawn(async move {
            transport.tick(tick).await;
        });
    }
}

impl Drop for SnapshotSynchronizer {
    fn drop(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            flight.task.abort();
        }
    }
}

struct DeltaAttempt {
    attempt: u64,
    generation: u64,
    patch: Vec<u8>,
    checksum: String,
}

async fn run_delta(
    attempt: DeltaAttempt,
    channel: Arc<CompressionChannel>,
    transport: Arc<dyn TransportClient>,
    latest_generation: Arc<AtomicU64>,
    phase: Arc<AtomicU8>,
    outcomes: mpsc::UnboundedSender<AttemptOutcome>,
) {
    let DeltaAttempt {
        attempt,
        generation,
        patch,
        checksum,
    } = attempt;

    let (result, compressed_len) = match channel.compress(patch).await {
        Err(e) => (AttemptResult::Failed(e), None),
        Ok(_) if latest_generation.load(Ordering::Acquire) != generation => {
            (AttemptResult::Superseded, None)
        }
        Ok(compressed) => {
            phase.store(PHASE_AWAITING_ACK, Ordering::Release);
            let len = compressed.len();
            match transport.heartbeat(compressed, checksum).await {
                Ok(_) => (AttemptResult::Acked, Some(len)),
                Err(e) => (AttemptResult::Failed(e.into()), Some(len)),
            }
        }
    };

    let _ = outcomes.send(AttemptOutcome {
        attempt,
        generation,
        result,
        compressed_len,
    });
}
