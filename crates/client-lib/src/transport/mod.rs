// ============================
// crates/client-lib/src/transport/mod.rs
// ============================
//! Connection capability set used by the establisher and the live client.
//!
//! `Connector::open` produces a connection; `Transport::recv` reports
//! messages (`Some(Ok(_))`), errors (`Some(Err(_))`) and closes (`None`).
//! Both protocol stages only ever see these traits, so tests drive them with
//! [`memory::MemoryConnector`] instead of a network.

pub mod memory;
pub mod ws;

use async_trait::async_trait;

use crate::error::ClientError;

pub use memory::{MemoryConnector, MemoryListener, ServerEnd};
pub use ws::{WsConnector, WsTransport};

/// One open duplex text connection
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame
    async fn send(&mut self, text: String) -> Result<(), ClientError>;

    /// Next inbound text frame. `None` once the connection is closed.
    ///
    /// Must be cancel-safe: it is polled inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<String, ClientError>>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), ClientError>;
}

/// Opens connections to the room server
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Transport>, ClientError>;
}
