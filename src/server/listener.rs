use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::http::connection::Connection;
use crate::proxy::balancer::Balancer;

/// Bind `listen_addr` and serve forever.
pub async fn run(listen_addr: &str, balancer: Arc<Balancer>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!("serving request at localhost:{}", balancer.listen_port());

    serve(listener, balancer).await
}

/// Accept connections on an already bound listener.
pub async fn serve(listener: TcpListener, balancer: Arc<Balancer>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);

        let balancer = Arc::clone(&balancer);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, Some(peer), balancer);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
