use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    enrich_bot::logging::init();
    enrich_bot::run().await
}
