//! Synthetic simulation driving a synchronizer
//!
//! Stands in for a host application: a byte "world" that changes a little
//! every tick and is handed to the synchronizer as a fresh snapshot.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snapsync_state::{
    Snapshot, SnapshotSynchronizer, SyncConfig, SyncError, TransportClient, UpdateStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info};

/// Shape of the simulated world
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Initial snapshot size in bytes
    pub size: usize,
    /// Bytes changed per tick
    pub edits: usize,
    /// Append a few bytes every this many ticks (0 = fixed size)
    pub grow_every: u64,
    pub seed: u64,
    pub tick_interval: Duration,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            size: 16 * 1024,
            edits: 16,
            grow_every: 50,
            seed: 0,
            tick_interval: Duration::from_millis(100),
        }
    }
}

/// Byte buffer evolving under random edits
pub struct World {
    data: Vec<u8>,
    rng: StdRng,
    edits: usize,
    grow_every: u64,
    ticks: u64,
}

impl World {
    pub fn new(options: &DemoOptions) -> Self {
        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut data = vec![0u8; options.size];
        rng.fill(&mut data[..]);

        Self {
            data,
            rng,
            edits: options.edits,
            grow_every: options.grow_every,
            ticks: 0,
        }
    }

    /// Advance one tick
    pub fn step(&mut self) {
        self.ticks += 1;

        if !self.data.is_empty() {
            for _ in 0..self.edits {
                let at = self.rng.gen_range(0..self.data.len());
                self.data[at] = self.rng.gen();
            }
        }

        if self.grow_every > 0 && self.ticks % self.grow_every == 0 {
            let extra = self.rng.gen_range(1..64);
            let rng = &mut self.rng;
            self.data.extend((0..extra).map(|_| rng.gen::<u8>()));
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from(self.data.clone())
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// A world plus the synchronizer keeping the server's copy of it
pub struct Demo {
    world: World,
    sync: SnapshotSynchronizer,
    tick_interval: Duration,
}

impl Demo {
    /// Must be called from within a tokio runtime
    pub fn new(
        transport: Arc<dyn TransportClient>,
        options: DemoOptions,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let world = World::new(&options);
        let sync = SnapshotSynchronizer::new(world.snapshot(), transport, config)?;

        Ok(Self {
            world,
            sync,
            tick_interval: options.tick_interval,
        })
    }

    /// Push the initial baseline
    pub fn start(&mut self) -> UpdateStatus {
        let status = self.sync.init();
        info!(len = self.world.data.len(), ?status, "Demo started");
        status
    }

    /// One simulation tick: evolve the world and hand it over
    pub fn step(&mut self) -> UpdateStatus {
        self.world.step();
        let status = self.sync.update(self.world.snapshot());
        debug!(tick = self.world.ticks(), ?status, "Tick");
        status
    }

    /// Run `ticks` ticks at the configured cadence (0 = until cancelled)
    pub async fn run(&mut self, ticks: u64) {
        let mut interval = time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // First tick completes immediately
        interval.tick().await;

        let mut done = 0;
        while ticks == 0 || done < ticks {
            interval.tick().await;
            self.step();
            done += 1;

            if done % 100 == 0 {
                let stats = self.sync.stats();
                info!(
                    tick = done,
                    deltas = stats.deltas_sent,
                    baselines = stats.baselines_sent,
                    failures = stats.failures,
                    "Progress"
                );
            }
        }
    }

    /// Wait for the last attempt to resolve
    pub async fn finish(&mut self) {
        self.sync.settle().await;
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn synchronizer(&self) -> &SnapshotSynchronizer {
        &self.sync
    }

    pub fn synchronizer_mut(&mut self) -> &mut SnapshotSynchronizer {
        &mut self.sync
    }
}
