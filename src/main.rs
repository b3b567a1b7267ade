//! Compute Gateway - caching facade for a parametric-geometry compute backend

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use compute_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    registry::DefinitionRegistry,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Deployment environments inject secrets through .env files
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Definitions { ref directory }) => run_definitions(&cli, directory.clone()),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// List the definition directory scan result
fn run_definitions(cli: &Cli, directory: Option<std::path::PathBuf>) -> ExitCode {
    let directory = match directory {
        Some(d) => d.to_string_lossy().into_owned(),
        None => match Config::load(cli.config.as_deref()) {
            Ok(config) => config.registry.directory,
            Err(e) => {
                error!("Failed to load configuration: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    let registry = DefinitionRegistry::new(&directory);
    let definitions = registry.scan();

    if definitions.is_empty() {
        println!("No definitions found in {directory}");
        return ExitCode::SUCCESS;
    }

    println!("Found {} definition(s) in {}:\n", definitions.len(), directory);
    for definition in definitions {
        println!("  {}  {}", definition.name, definition.id);
    }
    ExitCode::SUCCESS
}

/// Run the gateway server
async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        backend = %config.compute.url,
        "Starting compute gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
