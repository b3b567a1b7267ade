//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::cache::SolveCache;
use crate::compute::{ComputeBackend, HttpCompute};
use crate::config::Config;
use crate::infra::{AzureRestControlPlane, VmControlPlane};
use crate::readiness::{ActivityState, ReadinessController};
use crate::registry::DefinitionRegistry;
use crate::solve::Solver;
use crate::{Error, Result};

/// Compute gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Definition registry
    registry: Arc<DefinitionRegistry>,
    /// Shared application state
    state: Arc<AppState>,
    /// Readiness controller (idle loop owner)
    readiness: Arc<ReadinessController>,
}

impl Gateway {
    /// Wire up all components from configuration.
    pub fn new(config: Config) -> Result<Self> {
        let registry = Arc::new(DefinitionRegistry::new(&config.registry.directory));
        let compute: Arc<dyn ComputeBackend> = Arc::new(HttpCompute::new(&config.compute)?);

        let infra: Option<Arc<dyn VmControlPlane>> = if config.infra.is_configured() {
            Some(Arc::new(AzureRestControlPlane::new(&config.infra)?))
        } else {
            warn!("No infra control plane configured; wake-up and idle shutdown unavailable");
            None
        };

        // Constructed once here, then passed explicitly to the request
        // pipeline and the idle loop.
        let activity = Arc::new(ActivityState::new());

        let readiness = Arc::new(ReadinessController::new(
            Arc::clone(&compute),
            infra,
            Arc::clone(&activity),
            config.idle.clone(),
        ));

        let solver = Arc::new(Solver::new(
            Arc::clone(&registry),
            Arc::clone(&compute),
            Arc::new(SolveCache::new()),
            Arc::clone(&readiness),
            activity,
        ));

        let state = Arc::new(AppState {
            solver,
            readiness: Arc::clone(&readiness),
            compute,
            expose_error_detail: config.server.expose_error_detail,
        });

        Ok(Self {
            config,
            registry,
            state,
            readiness,
        })
    }

    /// Run the gateway until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let definitions = self.registry.scan();

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let idle_loop = self.readiness.spawn_idle_loop(shutdown_tx.subscribe());

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("COMPUTE GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(
            directory = %self.config.registry.directory,
            count = definitions.len(),
            "Definitions registered"
        );
        for definition in &definitions {
            info!("  {} ({})", definition.name, &definition.id[..12.min(definition.id.len())]);
        }
        info!(backend = %self.config.compute.url, "Compute backend");
        if self.config.idle.enabled {
            info!(
                threshold_minutes = self.config.idle.threshold.as_secs() / 60,
                "Idle shutdown enabled"
            );
        }
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let _ = idle_loop.await;
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
