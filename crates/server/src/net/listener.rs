use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use super::connection::{self, ConnectionHandle};
use crate::server::Server;

/// Pause after a failed accept so a persistent error (fd exhaustion) does
/// not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("Listening on {}", addr);
    Ok(listener)
}

/// Accept clients until the server stops. Each accepted client claims a
/// registry slot up front; when none is free it is told so and dropped.
pub async fn run(server: Arc<Server>, listener: TcpListener) {
    let queue = server.config().server.outbound_queue_frames;
    while server.is_running() {
        let accepted = tokio::select! {
            r = listener.accept() => r,
            _ = server.stopped() => break,
        };
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let (handle, rx) = ConnectionHandle::channel(addr, queue);
        match server.players.join(handle.clone(), server.now_ms()) {
            Ok(entity_id) => {
                server.metrics.connection_accepted();
                tracing::info!("Connection from {} (slot {})", addr, entity_id);
                tokio::spawn(connection::serve(Arc::clone(&server), stream, entity_id, handle, rx));
            }
            Err(e) => {
                server.metrics.connection_rejected();
                tracing::warn!("Rejected {}: {}", addr, e);
                tokio::spawn(async move { connection::reject(stream, "Server is full").await });
            }
        }
    }
    tracing::info!("Listener stopped");
}
