//! Snapsync demo client

use crate::demo::{Demo, DemoOptions};
use crate::{init_logging, LogLevel};
use anyhow::{Context, Result};
use clap::Parser;
use snapsync_network::{TcpTransportClient, TransportConfig};
use snapsync_state::{ChannelConfig, CompressionAlgorithm, SyncConfig, SyncPolicy};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Snapsync client - keeps a synthetic snapshot in sync with a replica server")]
pub struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:2022")]
    pub server: SocketAddr,

    /// Run without syncing; only liveness ticks are sent
    #[arg(long)]
    pub offline: bool,

    /// Milliseconds between simulation ticks
    #[arg(long, default_value = "100")]
    pub tick_ms: u64,

    /// Number of ticks to run (0 = until Ctrl-C)
    #[arg(long, default_value = "0")]
    pub ticks: u64,

    /// Initial snapshot size in bytes
    #[arg(long, default_value = "16384")]
    pub size: usize,

    /// Bytes changed per tick
    #[arg(long, default_value = "16")]
    pub edits: usize,

    /// Seed for the simulation
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Patch compression algorithm (must match the server)
    #[arg(long, value_enum, default_value = "zstd")]
    pub compression: CompressionAlgorithm,

    /// Compression request timeout in seconds
    #[arg(long, default_value = "5")]
    pub compression_timeout: u64,

    /// Network request timeout in seconds
    #[arg(long, default_value = "10")]
    pub request_timeout: u64,

    /// Log level
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,
}

impl Args {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            policy: if self.offline {
                SyncPolicy::offline()
            } else {
                SyncPolicy::enabled()
            },
            channel: ChannelConfig {
                algorithm: self.compression,
                request_timeout: Duration::from_secs(self.compression_timeout),
                ..Default::default()
            },
        }
    }

    pub fn demo_options(&self) -> DemoOptions {
        DemoOptions {
            size: self.size,
            edits: self.edits,
            seed: self.seed,
            tick_interval: Duration::from_millis(self.tick_ms.max(1)),
            ..Default::default()
        }
    }
}

pub async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let transport = Arc::new(TcpTransportClient::new(
        args.server,
        TransportConfig {
            request_timeout: Duration::from_secs(args.request_timeout),
            ..Default::default()
        },
    ));

    let mut demo = Demo::new(transport.clone(), args.demo_options(), args.sync_config())
        .context("Failed to start synchronizer")?;
    info!(server = %args.server, offline = args.offline, "Starting demo");
    demo.start();

    tokio::select! {
        _ = demo.run(args.ticks) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    if time::timeout(Duration::from_secs(args.request_timeout + 1), demo.finish())
        .await
        .is_err()
    {
        warn!("Last attempt still unresolved at shutdown");
    }

    let stats = demo.synchronizer().stats();
    let net = transport.stats().await;
    println!(
        "SNAPSYNC_STATS ticks={} deltas={} baselines={} acks={} failures={} recoveries={} patch_bytes={} compressed_bytes={} rtt_us={}",
        demo.world().ticks(),
        stats.deltas_sent,
        stats.baselines_sent,
        stats.acks,
        stats.failures,
        stats.recoveries,
        stats.patch_bytes,
        stats.compressed_bytes,
        net.last_rtt_micros.unwrap_or(0),
    );
    println!(
        "SNAPSYNC_CHECKSUM={}",
        demo.synchronizer().last_acked().checksum()
    );

    Ok(())
}
