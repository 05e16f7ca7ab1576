use anyhow::Context;
use clap::Parser;
use lantern_cli::{init_tracing, App, Cli};
use lantern_core::AppConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        AppConfig::load_with_env(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(path) = cli.database {
        config.database.path = Some(path);
    }

    init_tracing(&config.logging.filter);
    info!("Starting Lantern v{}", env!("CARGO_PKG_VERSION"));

    let app = App::open(config).await?;
    let result = app.run(cli.command).await;
    app.close().await;
    result
}
