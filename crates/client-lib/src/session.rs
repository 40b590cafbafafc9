// ============================
// crates/client-lib/src/session.rs
// ============================
//! Session descriptor and its ephemeral, process-local store.
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Well-known key the descriptor is stored under
pub const SESSION_KEY: &str = "user-room";

/// Identifies the user's membership in one room for the length of the visit.
/// Immutable once created by a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    #[serde(rename = "roomid")]
    pub room_id: String,
    #[serde(rename = "roomtitle")]
    pub room_title: String,
    #[serde(rename = "fullname")]
    pub display_name: String,
    pub email: String,
    #[serde(rename = "isadmin")]
    pub is_admin: bool,
}

/// Trait for session storage backends
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write the descriptor, replacing any previous one
    async fn save(&self, descriptor: &SessionDescriptor) -> Result<(), ClientError>;

    /// Read the current descriptor, if any
    async fn load(&self) -> Result<Option<SessionDescriptor>, ClientError>;

    /// Remove the descriptor. Removing an absent descriptor is not an error.
    async fn clear(&self) -> Result<(), ClientError>;
}

/// In-process store keeping each record as a flat JSON string
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: DashMap<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw serialized record, as written
    pub fn raw(&self) -> Option<String> {
        self.records.get(SESSION_KEY).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, descriptor: &SessionDescriptor) -> Result<(), ClientError> {
        let record = serde_json::to_string(descriptor)?;
        self.records.insert(SESSION_KEY.to_string(), record);
        Ok(())
    }

    async fn load(&self) -> Result<Option<SessionDescriptor>, ClientError> {
        match self.raw() {
            Some(record) => Ok(Some(serde_json::from_str(&record)?)),
            None => Ok(None),
        }
    }

    async fn clear(&self) -> Result<(), ClientError> {
        self.records.remove(SESSION_KEY);
        Ok(())
    }
}
