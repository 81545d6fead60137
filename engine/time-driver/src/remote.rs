//! Remote command channel: a WebSocket server feeding command text to the clock

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::command::INVALID_COMMAND_REPLY;
use crate::error::DriverError;
use crate::scheduler::ClockHandle;

/// Accepts command connections. Each inbound frame is one command and gets one text reply.
pub struct CommandServer {
    listener: TcpListener,
    handle: ClockHandle,
}

impl CommandServer {
    pub async fn bind(addr: &str, handle: ClockHandle) -> Result<Self, DriverError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Command channel listening on {}", listener.local_addr()?);
        Ok(Self { listener, handle })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections until `shutdown` fires
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let handle = self.handle.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, peer_addr, handle).await {
                                warn!("Command connection from {} failed: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept command connection: {}", e),
                },
            }
        }
        debug!("Command channel stopped");
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    handle: ClockHandle,
) -> Result<(), DriverError> {
    let ws_stream = accept_async(stream).await?;
    info!("Command connection from {}", peer_addr);
    let (mut sender, mut receiver) = ws_stream.split();

    while let Some(frame) = receiver.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    sender.send(Message::Text(INVALID_COMMAND_REPLY.to_string())).await?;
                    continue;
                }
            },
            Message::Ping(data) => {
                sender.send(Message::Pong(data)).await?;
                continue;
            }
            Message::Pong(_) | Message::Frame(_) => continue,
            Message::Close(_) => break,
        };

        debug!(peer = %peer_addr, command = %text.trim(), "Remote command");
        let reply = handle.send(text).await?;
        sender.send(Message::Text(reply)).await?;
    }

    info!("Command connection from {} closed", peer_addr);
    Ok(())
}
