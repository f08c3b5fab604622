use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::dispatch::Dispatcher;
use crate::Result;

/// One request per connection: read until the peer half-closes, answer,
/// close.
pub struct WireServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    max_request_bytes: usize,
}

impl WireServer {
    pub async fn bind(addr: SocketAddr, dispatcher: Dispatcher) -> Result<Self> {
        let max_request_bytes = dispatcher.context().settings.max_request_bytes;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            dispatcher: Arc::new(dispatcher),
            max_request_bytes,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept forever. Each connection gets its own task; handlers run on
    /// the blocking pool so a slow command never stalls the accept loop.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Agent listening on {}", self.local_addr()?);
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let limit = self.max_request_bytes;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, dispatcher, limit).await {
                            tracing::error!("Connection error ({}): {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    limit: usize,
) -> Result<()> {
    let mut raw = Vec::new();
    (&mut stream)
        .take(limit as u64 + 1)
        .read_to_end(&mut raw)
        .await?;

    let response = if raw.len() > limit {
        tracing::warn!("Rejecting request over {} bytes", limit);
        // Drain so closing does not reset the connection before the reply lands.
        tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
        format!("Request exceeds {} bytes", limit)
    } else {
        let request = String::from_utf8_lossy(&raw).into_owned();
        tokio::task::spawn_blocking(move || dispatcher.dispatch(&request))
            .await
            .unwrap_or_else(|e| format!("[ERROR] handler task failed: {}", e))
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
