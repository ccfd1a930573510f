//! imgrot entry point.

mod app;
mod cli;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = match cli::Cli::parse(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {e:#}\n\n{}", cli::USAGE);
            std::process::exit(2);
        }
    };

    let config = config::Config::load(cli.config.as_deref())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting imgrot");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(cli.command, config))
}
