#[tokio::main]
async fn main() -> anyhow::Result<()> {
    snapsync::server::run().await
}
