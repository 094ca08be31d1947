//! Observability endpoints for the Basalt task kernel.
//!
//! Serves the Prometheus metrics exposition and the health/readiness
//! probes over HTTP. The supervisor process runs one instance per port;
//! a port of 0 in the config means the endpoint is disabled and this
//! crate is never entered.

pub mod error;
pub mod routes;

use std::net::SocketAddr;

use axum::Router;

pub use error::{ServerError, ServerResult};
pub use routes::{AppState, ReadyCheck, create_router};

/// Bind `0.0.0.0:port` and serve the router until the task is dropped
/// or the listener fails.
pub async fn serve(port: u16, router: Router) -> ServerResult<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .map_err(|_| ServerError::InvalidAddress(format!("0.0.0.0:{port}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "observability endpoint listening");
    axum::serve(listener, router).await?;
    Ok(())
}
