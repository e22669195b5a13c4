pub mod fixtures;
pub mod network;

pub use network::{LoopbackStats, LoopbackTransport, NetworkConditions};

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(
                    "snapsync=debug,snapsync_state=debug,snapsync_network=debug,snapsync_test_utils=debug",
                )
            }))
            .with_test_writer()
            .init();
    });
}
