//! Snapsync replica server

use crate::{init_logging, LogLevel};
use anyhow::{Context, Result};
use clap::Parser;
use snapsync_network::{ReplicaServer, ServerConfig};
use snapsync_state::CompressionAlgorithm;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Snapsync server - holds the authoritative copy of client snapshots")]
pub struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:2022")]
    pub bind: SocketAddr,

    /// Patch compression algorithm clients use
    #[arg(long, value_enum, default_value = "zstd")]
    pub compression: CompressionAlgorithm,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Log live sessions every this many seconds (0 = never)
    #[arg(long, default_value = "0")]
    pub report_interval: u64,
}

pub async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let server = ReplicaServer::bind(
        args.bind,
        ServerConfig {
            algorithm: args.compression,
        },
    )
    .await
    .with_context(|| format!("Failed to bind {}", args.bind))?;
    let addr = server.local_addr()?;
    let sessions = server.sessions();

    // Machine-readable line for scripts and tests
    println!("SNAPSYNC_ADDR={addr}");
    std::io::stdout().flush()?;
    info!(%addr, compression = ?args.compression, "Server ready");

    let report = async {
        if args.report_interval == 0 {
            return std::future::pending::<()>().await;
        }
        let mut interval = time::interval(Duration::from_secs(args.report_interval));
        loop {
            interval.tick().await;
            for id in sessions.session_ids() {
                if let Some(checksum) = sessions.checksum(id) {
                    info!(session_id = id, %checksum, "Session");
                }
            }
        }
    };

    tokio::select! {
        result = server.run() => result.context("Server failed")?,
        _ = report => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
