use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    txgate::node::run_cli().await
}
