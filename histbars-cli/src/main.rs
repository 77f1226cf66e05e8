use clap::Parser;
use tracing_subscriber::EnvFilter;

use histbars_cli::Args;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    histbars_cli::run(&args)
}
