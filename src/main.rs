#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panelsync_lib::run().await
}
