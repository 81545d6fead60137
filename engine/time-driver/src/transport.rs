//! WebSocket time bus connections

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::bus::{BusConnector, EndpointDescriptor, TimeBus};
use crate::error::BusError;
use crate::TickIndex;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames a time bus endpoint receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    EnableSetTime { bus: String },
    SetTime { bus: String, tick: TickIndex },
}

/// WebSocket URL of a bus: `<uri>/<name>`, with `tcp://` read as `ws://`
pub fn bus_url(descriptor: &EndpointDescriptor) -> String {
    let base = descriptor.uri.trim_end_matches('/');
    match base.strip_prefix("tcp://") {
        Some(rest) => format!("ws://{}/{}", rest, descriptor.name),
        None => format!("{}/{}", base, descriptor.name),
    }
}

/// Opens [`WsTimeBus`] connections
#[derive(Debug, Clone)]
pub struct WsBusConnector {
    connect_timeout: Duration,
}

impl WsBusConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsBusConnector {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::DEFAULT_CONNECT_TIMEOUT_MS))
    }
}

#[async_trait]
impl BusConnector for WsBusConnector {
    async fn connect(&self, descriptor: &EndpointDescriptor) -> Result<Box<dyn TimeBus>, BusError> {
        let url = bus_url(descriptor);
        let stream = match tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                return Err(BusError::Connect {
                    uri: descriptor.uri.clone(),
                    name: descriptor.name.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(BusError::ConnectTimeout {
                    uri: descriptor.uri.clone(),
                    name: descriptor.name.clone(),
                })
            }
        };
        debug!(bus = %descriptor.name, url = %url, "Opened time bus connection");
        Ok(Box::new(WsTimeBus::new(descriptor.name.clone(), stream)))
    }
}

/// A time bus over one WebSocket connection.
///
/// A background reader watches the inbound half and marks the bus disconnected when the peer
/// closes or the stream errors.
pub struct WsTimeBus {
    name: String,
    sink: SplitSink<WsStream, Message>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl WsTimeBus {
    fn new(name: String, stream: WsStream) -> Self {
        let (sink, mut inbound) = stream.split();
        let connected = Arc::new(AtomicBool::new(true));

        let reader_flag = connected.clone();
        let reader_name = name.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = inbound.next().await {
                match frame {
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(bus = %reader_name, "Time bus read failed: {}", e);
                        break;
                    }
                }
            }
            reader_flag.store(false, Ordering::SeqCst);
        });

        Self { name, sink, connected, reader }
    }

    async fn send(&mut self, message: &BusMessage) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected { name: self.name.clone() });
        }
        let text = serde_json::to_string(message)?;
        if let Err(e) = self.sink.send(Message::Text(text)).await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(BusError::Publish { name: self.name.clone(), reason: e.to_string() });
        }
        Ok(())
    }
}

impl Drop for WsTimeBus {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl TimeBus for WsTimeBus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn enable_set_time(&mut self) -> Result<(), BusError> {
        self.send(&BusMessage::EnableSetTime { bus: self.name.clone() }).await
    }

    async fn set_time(&mut self, tick: TickIndex) -> Result<(), BusError> {
        self.send(&BusMessage::SetTime { bus: self.name.clone(), tick }).await
    }
}
