use std::io::BufWriter;

use ticket::TicketSystem;
use ticket::config::EngineConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Logs go to stderr; stdout carries the responses.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticket=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: data_directory={}, tree_order={:?}",
        config.data_directory.display(),
        config.tree_order
    );

    if let Err(e) = std::fs::create_dir_all(&config.data_directory) {
        tracing::error!("Failed to create data directory: {e}");
        std::process::exit(1);
    }

    let mut system = match TicketSystem::open(&config) {
        Ok(system) => system,
        Err(e) => {
            tracing::error!("Failed to open ticket system: {e}");
            std::process::exit(1);
        }
    };

    let stdin = std::io::stdin().lock();
    let stdout = BufWriter::new(std::io::stdout().lock());
    if let Err(e) = system.run(stdin, stdout) {
        tracing::error!("Ticket system stopped: {e}");
        std::process::exit(1);
    }
}
