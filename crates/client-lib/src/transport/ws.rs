//! WebSocket transport over `tokio-tungstenite`.
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use super::{Connector, Transport};
use crate::error::ClientError;

/// Opens WebSocket connections to a fixed room server URL
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self) -> Result<Box<dyn Transport>, ClientError> {
        let (stream, _response) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, "WebSocket connection established");
        Ok(Box::new(WsTransport::new(stream)))
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl WsTransport {
    pub fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::Connection("connection already closed".to_string()));
        }
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ClientError>> {
        if self.closed {
            return None;
        }

        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server closed the connection");
                    self.closed = true;
                    return None;
                },
                Ok(_) => {}, // pings, pongs and binary frames carry nothing for us
                Err(e) => {
                    warn!("WebSocket receive error: {e}");
                    self.closed = true;
                    return Some(Err(ClientError::TransientDisconnect(e.to_string())));
                },
            }
        }

        self.closed = true;
        None
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            // The peer may already be gone; the connection is closed either way
            Err(e) => {
                debug!("error while closing WebSocket: {e}");
                Ok(())
            },
        }
    }
}
