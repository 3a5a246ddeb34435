//! The accept loop: binds the listening socket and spawns one task per
//! connection onto the `connection::run` read-dispatch-write loop.

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpListener;

use crate::connection::{self, ServerShared};

pub async fn serve(shared: Arc<ServerShared>, bind: &str, port: u16) -> std::io::Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "redberry is ready to accept connections");

    loop {
        let (socket, peer) = listener.accept().await?;
        let shared = Arc::clone(&shared);
        if let Err(e) = socket.set_nodelay(true) {
            tracing::warn!(%peer, error = %e, "failed to set TCP_NODELAY");
        }
        tokio::spawn(async move {
            tracing::debug!(%peer, "client connected");
            let (reader, writer) = socket.into_split();
            let reader = BufReader::new(reader);
            if let Err(e) = connection::run(shared, reader, writer).await {
                tracing::debug!(%peer, error = %e, "connection closed with error");
            } else {
                tracing::debug!(%peer, "client disconnected");
            }
        });
    }
}
