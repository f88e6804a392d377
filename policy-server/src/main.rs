use clap::Parser;
use policy_server::{
    LogFormat, Settings,
    cli::{Cli, execute},
    init_telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    init_telemetry(LogFormat::from_env());

    execute(cli, settings).await
}
