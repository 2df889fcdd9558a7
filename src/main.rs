//! rkndaemon - Registry dump ingestion daemon

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::FmtSubscriber;

use rkndaemon::cli::{Cli, Commands};
use rkndaemon::signal::ShutdownGuard;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let rust_log = std::env::var("RUST_LOG").ok();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(cli.log_filter(rust_log.as_deref()))
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run { cron } => {
            let _guard = ShutdownGuard::new();
            rkndaemon::commands::run::run(cron, config).await
        }
        Commands::Classify {
            file,
            output,
            social,
        } => rkndaemon::commands::classify::run(&file, output, social, config),
        Commands::IpsetSync {
            file,
            set,
            no_clear,
        } => rkndaemon::commands::ipset_sync::run(&file, &set, no_clear),
        Commands::Version => {
            println!("rkndaemon {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
