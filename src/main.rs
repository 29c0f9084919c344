#[tokio::main]
async fn main() -> anyhow::Result<()> {
    flowgate::cli::run_cli().await
}
