//! Live room: reconciled state, the reconnecting client and the input buffer.
pub mod client;
pub mod composer;
pub mod state;

pub use client::{ConnectionState, ExitReason, RoomClient, RoomEvent, RoomView, SendOutcome};
pub use composer::Composer;
pub use state::{Alert, Applied, ChatMessage, MessageLog, Roster, RoomState};
