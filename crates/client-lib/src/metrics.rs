// ==============
// crates/client-lib/src/metrics.rs

//! Central place for metric keys
pub const HANDSHAKE_OUTCOME: &str = "room.handshake";
pub const WS_CONNECT_ATTEMPT: &str = "ws.connect_attempt";
pub const WS_RECONNECT_SCHEDULED: &str = "ws.reconnect_scheduled";
pub const CHAT_SENT: &str = "chat.sent";
pub const CHAT_DUPLICATE_DROPPED: &str = "chat.duplicate_dropped";
pub const ROSTER_SIZE: &str = "room.roster_size";
