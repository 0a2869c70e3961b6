//! Startup helpers for the relay.
//!
//! Reads `.env` and the environment, installs logging, then either listens
//! for HTTP requests or serves a single platform-managed invocation.

use std::process::ExitCode;

use tracing::{error, info, warn};

use crate::config::{DeploymentMode, RelayConfig};
use crate::server::{self, AppState};

/// Run the relay (used by the `websoft-relay` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting websoft relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    info!("Completion endpoint: {} (model {})", config.provider.base_url, config.provider.model);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config)) {
        error!("Relay error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Build the state and serve according to the deployment mode.
///
/// # Errors
/// Returns an error if the state cannot be built, the listener fails, or the
/// invocation cannot be read or answered.
pub async fn serve(config: RelayConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = AppState::new(&config).await?;
    let app = server::create_app(state, &config.server);

    match config.mode {
        DeploymentMode::Listener => {
            server::run_server_with_shutdown(app, config.server.port, shutdown_signal()).await
        }
        DeploymentMode::Handler => Ok(server::run_invocation(app).await?),
    }
}

/// Logs go to stderr so stdout stays free for handler-mode responses.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
