#[tokio::main]
async fn main() -> anyhow::Result<()> {
    snapsync::client::run().await
}
