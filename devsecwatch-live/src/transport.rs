//! Push transport seam.
//!
//! `PushConnector` opens one socket per call and hands back a `FrameLink`
//! that speaks STOMP units. The WebSocket implementation targets either the
//! SockJS endpoint's raw WebSocket entry or a plain `/ws` endpoint, see
//! [`LiveConfig::push_endpoint`](crate::config::LiveConfig::push_endpoint).

use crate::error::{LiveError, Result};
use crate::stomp::{self, Frame, Inbound};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn FrameLink>>;
}

#[async_trait]
pub trait FrameLink: Send {
    async fn send(&mut self, frame: &Frame) -> Result<()>;

    async fn send_heartbeat(&mut self) -> Result<()>;

    /// Next unit from the peer; `None` once the socket is closed.
    async fn recv(&mut self) -> Option<Result<Inbound>>;

    async fn close(&mut self);
}

#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl PushConnector for WsConnector {
    async fn open(&self, endpoint: &Url) -> Result<Box<dyn FrameLink>> {
        debug!(%endpoint, "opening push socket");
        let (stream, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| LiveError::Transport(e.to_string()))?;
        Ok(Box::new(WsLink { stream, pending: VecDeque::new() }))
    }
}

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// A single text message can carry several STOMP units.
    pending: VecDeque<Result<Inbound>>,
}

/// Queues the units of one socket message. A malformed frame is queued as
/// an error after the units that preceded it.
fn buffer_units(pending: &mut VecDeque<Result<Inbound>>, data: &[u8]) {
    let (items, error) = stomp::parse_prefix(data);
    pending.extend(items.into_iter().map(Ok));
    if let Some(e) = error {
        pending.push_back(Err(e));
    }
}

#[async_trait]
impl FrameLink for WsLink {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        trace!(command = %frame.command, "send frame");
        self.stream
            .send(Message::Text(frame.encode_text()))
            .await
            .map_err(|e| LiveError::Transport(e.to_string()))
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        self.stream
            .send(Message::Text("\n".to_string()))
            .await
            .map_err(|e| LiveError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Inbound>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(LiveError::Transport(e.to_string()))),
            };
            let data = match message {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(bytes) => bytes,
                Message::Close(_) => return None,
                // tungstenite answers pings itself
                _ => continue,
            };
            buffer_units(&mut self.pending, &data);
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("push socket close: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stomp::Command;

    #[test]
    fn units_before_a_bad_frame_survive() {
        let mut wire = Frame::new(Command::Message).body("kept").encode();
        wire.extend(b"NOPE\n\n\0");
        let mut pending = VecDeque::new();

        buffer_units(&mut pending, &wire);

        assert_eq!(pending.len(), 2);
        assert!(matches!(pending.pop_front(), Some(Ok(Inbound::Frame(f))) if f.body == b"kept"));
        assert!(matches!(pending.pop_front(), Some(Err(LiveError::Protocol(_)))));
    }
}
