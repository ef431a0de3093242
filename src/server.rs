//! Listener binding and serving.
//!
//! Every pipeline gets its own listener. Pipelines are bound and run
//! independently, so a port that cannot be bound only takes out its own
//! server.

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, task::JoinSet};
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::pipeline::{dispatch, Pipeline};

/// Wraps a pipeline into an axum router that sends every request through it.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(pipeline)
        .layer(TraceLayer::new_for_http())
}

/// A bound, not yet running server.
pub struct Server {
    listener: TcpListener,
    app: Router,
}

impl Server {
    pub async fn bind(pipeline: Pipeline) -> Result<Self, ServerError> {
        let addr = pipeline.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self {
            listener,
            app: router(Arc::new(pipeline)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        tracing::info!("Listening on http://{}", addr);
        axum::serve(self.listener, self.app).await?;
        Ok(())
    }
}

/// Binds one server per pipeline. Results keep the order of `pipelines`.
pub async fn bind_all(pipelines: Vec<Pipeline>) -> Vec<Result<Server, ServerError>> {
    let mut servers = Vec::with_capacity(pipelines.len());
    for pipeline in pipelines {
        servers.push(Server::bind(pipeline).await);
    }
    servers
}

/// Binds and runs every pipeline concurrently.
///
/// # Returns
///
/// The number of servers that could not be started or stopped with an
/// error, once all of them have finished.
pub async fn serve_all(pipelines: Vec<Pipeline>) -> usize {
    let mut failed = 0;
    let mut running = JoinSet::new();

    for server in bind_all(pipelines).await {
        match server {
            Ok(server) => {
                running.spawn(server.run());
            }
            Err(e) => {
                tracing::error!(error = %e, "Server failed to start");
                failed += 1;
            }
        }
    }

    while let Some(result) = running.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Server stopped");
                failed += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "Server task panicked");
                failed += 1;
            }
        }
    }
    failed
}
