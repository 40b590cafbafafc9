// ============================
// slang-client-lib/src/lib.rs
// ============================
//! Core client functionality for the Slang room chat service.

pub mod config;
pub mod error;
pub mod establish;
pub mod metrics;
pub mod notify;
pub mod room;
pub mod room_id;
pub mod session;
pub mod transport;
pub mod validation;

pub use slang_common as protocol;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Settings;
use crate::establish::Establisher;
use crate::notify::{NoticeEvent, Notifier};
use crate::session::{MemorySessionStore, SessionStore};
use crate::transport::{Connector, WsConnector};

/// Collaborators shared by the establisher and the live room client
#[derive(Clone)]
pub struct ClientContext {
    /// Settings
    pub settings: Arc<Settings>,
    /// Opens connections to the room server
    pub connector: Arc<dyn Connector>,
    /// Holds the current session descriptor
    pub sessions: Arc<dyn SessionStore>,
    /// Transient user notifications
    pub notifier: Arc<Notifier>,
}

impl ClientContext {
    /// Create a context; notices are delivered on the returned receiver
    pub fn new(
        settings: Settings,
        connector: Arc<dyn Connector>,
        sessions: Arc<dyn SessionStore>,
    ) -> (Self, mpsc::UnboundedReceiver<NoticeEvent>) {
        let (notifier, notices) = Notifier::new(settings.notice_ttl());
        let ctx = Self {
            settings: Arc::new(settings),
            connector,
            sessions,
            notifier: Arc::new(notifier),
        };
        (ctx, notices)
    }

    /// WebSocket connector to `settings.server_url` and an in-process store
    pub fn from_settings(settings: Settings) -> (Self, mpsc::UnboundedReceiver<NoticeEvent>) {
        let connector = Arc::new(WsConnector::new(settings.server_url.clone()));
        Self::new(settings, connector, Arc::new(MemorySessionStore::new()))
    }

    pub fn establisher(&self) -> Establisher {
        Establisher::new(self.clone())
    }
}
