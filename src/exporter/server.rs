use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::http::build_router;
use crate::error::Error;
use crate::stats::Stats;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8681";

////////////////////////////////////////////////////////////////////////////////

pub(crate) enum ServerState {
    Unstarted,
    Listening(MetricsServer),
    Stopped,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::Unstarted
    }
}

impl ServerState {
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Listening(server) => Some(server.local_addr),
            _ => None,
        }
    }
}

/// A running metrics endpoint. Serving happens on a background task; the
/// handle keeps the shutdown trigger and the task to await on stop.
pub(crate) struct MetricsServer {
    listen: String,
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MetricsServer {
    pub(crate) fn bind(listen: &str, stats: Arc<Stats>) -> Result<Self, Error> {
        Self::serve(listen, build_router(stats))
    }

    /// Binds synchronously so that address errors reach the caller, then
    /// serves `router` on a spawned task. Must be called within a tokio
    /// runtime.
    fn serve(listen: &str, router: Router) -> Result<Self, Error> {
        let bind_error = |source| Error::Bind {
            addr: listen.to_owned(),
            source,
        };

        let listener = TcpListener::bind(listen).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::Server::from_tcp(listener)?
            .serve(router.into_make_service())
            .with_graceful_shutdown(async move {
                shutdown_rx.await.ok();
            });

        info!(listen, %local_addr, "logexporter is listening");

        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                error!(%err, "Failed to serve logexporter");
            }
        });

        Ok(Self {
            listen: listen.to_owned(),
            local_addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    pub(crate) fn listen(&self) -> &str {
        &self.listen
    }

    /// Stops accepting connections and waits for in-flight requests up to
    /// `deadline`. Once the deadline passes the serving task is aborted, and
    /// the listener is closed by the time this returns.
    pub(crate) async fn shutdown(mut self, deadline: Duration) -> Result<(), Error> {
        if let Some(tx) = self.shutdown.take() {
            // The receiver is gone only if the server already exited.
            tx.send(()).ok();
        }

        match tokio::time::timeout(deadline, &mut self.task).await {
            Ok(Ok(())) => {
                info!(listen = %self.listen, "logexporter stopped");
                Ok(())
            }
            Ok(Err(err)) => Err(Error::Shutdown(err)),
            Err(_) => {
                warn!(listen = %self.listen, ?deadline, "Graceful shutdown timed out, aborting");
                self.task.abort();
                (&mut self.task).await.ok();
                Err(Error::ShutdownTimeout(deadline))
            }
        }
    }
}
