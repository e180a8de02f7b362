use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use figment::providers::Env;
use figment::Figment;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::state::AppState;

/// Owns the loaded configuration and wired-up application state, and drives
/// the HTTP server to completion.
pub struct App {
    config: Config,
    router: Router,
}

impl App {
    /// Loads configuration from the environment, wires up the shared
    /// [`AppState`] (rate limiter, breakers, HTTP clients), and builds the
    /// router.
    pub async fn new() -> Result<Self, anyhow::Error> {
        let config: Config = Figment::new()
            .merge(Env::raw())
            .extract()
            .context("failed to load config")?;

        let app_state = AppState::new(config.clone());
        let router = crate::web::create_router(app_state);

        Ok(App { config, router })
    }

    /// Runs the HTTP server until a shutdown signal is received.
    pub async fn run(self) -> std::process::ExitCode {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, %addr, "failed to bind listener");
                return std::process::ExitCode::FAILURE;
            }
        };

        info!(%addr, "listening");

        let result = axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        match result {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "server exited with error");
                std::process::ExitCode::FAILURE
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
