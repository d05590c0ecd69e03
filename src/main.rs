//! Binary entry point: CLI parsing, logging setup, configuration loading,
//! and best-effort multi-endpoint HTTP serving.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use llama_gateway::config::Config;

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(
    name = "llama-gateway",
    version,
    about = "OpenAI-compatible gateway that supervises local llama-server processes"
)]
struct Cli {
    /// Path to the gateway's configuration file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,
}

enum RunError {
    BindFailed,
    Interrupted,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::BindFailed) => ExitCode::from(2),
        Err(RunError::Interrupted) => ExitCode::from(130),
    }
}

async fn run(config: Config) -> Result<(), RunError> {
    let state = llama_gateway::shared_state(config.clone());
    let app = llama_gateway::app(state.clone());

    // Best-effort bind across every configured v4/v6 endpoint: only fail if
    // every single one fails.
    let endpoints: Vec<String> = config
        .server
        .bind_v4
        .endpoints()
        .into_iter()
        .chain(config.server.bind_v6.endpoints())
        .collect();

    if endpoints.is_empty() {
        tracing::warn!("no bind endpoints configured; server will not accept connections");
    }

    let mut listeners = Vec::new();
    for endpoint in &endpoints {
        match TcpListener::bind(endpoint).await {
            Ok(listener) => {
                tracing::info!(endpoint = %endpoint, "listening");
                listeners.push(listener);
            }
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "failed to bind endpoint");
            }
        }
    }

    if !endpoints.is_empty() && listeners.is_empty() {
        tracing::error!("failed to bind any configured endpoint");
        return Err(RunError::BindFailed);
    }

    let notify = Arc::new(tokio::sync::Notify::new());
    let mut servers = Vec::new();
    for listener in listeners {
        let app = app.clone();
        let notify = notify.clone();
        servers.push(tokio::spawn(async move {
            let shutdown = async move { notify.notified().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "server task exited with an error");
            }
        }));
    }

    let servers_fut = futures_util::future::join_all(servers);
    tokio::pin!(servers_fut);

    let interrupted = tokio::select! {
        _ = &mut servers_fut => false,
        _ = wait_for_interrupt() => {
            tracing::info!("shutdown signal received, draining in-flight requests");
            notify.notify_waiters();
            true
        }
    };

    if interrupted {
        let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, servers_fut).await;
    }

    state.supervisor.shutdown().await;

    if interrupted {
        Err(RunError::Interrupted)
    } else {
        Ok(())
    }
}

async fn wait_for_interrupt() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
