// ============================
// crates/client-lib/src/establish.rs
// ============================
//! Create/join handshake.
//!
//! Validates the form, opens a connection, sends exactly one request and
//! waits for the first meaningful reply. Success persists the session
//! descriptor and hands the still-open connection to the live client.
//! Every failure leaves the store untouched and raises a failure notice.
use std::fmt;

use metrics::counter;
use slang_common::{ClientFrame, CreateRoom, HandshakeReply, JoinRoom};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ClientError;
use crate::metrics::HANDSHAKE_OUTCOME;
use crate::room_id::generate_room_id;
use crate::session::SessionDescriptor;
use crate::transport::Transport;
use crate::validation::{looks_like_room_id, require};
use crate::ClientContext;

pub const CREATED_NOTICE: &str = "Room Created Successfully!";
pub const JOINED_NOTICE: &str = "Joined Successfully!";

/// Result of a successful handshake
pub struct Handoff {
    pub descriptor: SessionDescriptor,
    /// The handshake connection, still open
    pub transport: Box<dyn Transport>,
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Who is asking, and for which room
struct Member {
    room_id: String,
    requested_title: Option<String>,
    display_name: String,
    email: String,
}

pub struct Establisher {
    ctx: ClientContext,
}

impl Establisher {
    pub fn new(ctx: ClientContext) -> Self {
        Self { ctx }
    }

    /// Create a new room under a freshly generated id and become its admin
    pub async fn create_room(
        &self,
        room_title: &str,
        display_name: &str,
        email: &str,
    ) -> Result<Handoff, ClientError> {
        let result = self.try_create(room_title, display_name, email).await;
        self.settle(result)
    }

    /// Join an existing room by id
    pub async fn join_room(
        &self,
        room_id: &str,
        display_name: &str,
        email: &str,
    ) -> Result<Handoff, ClientError> {
        let result = self.try_join(room_id, display_name, email).await;
        self.settle(result)
    }

    async fn try_create(
        &self,
        room_title: &str,
        display_name: &str,
        email: &str,
    ) -> Result<Handoff, ClientError> {
        let room_title = require("roomTitle", room_title)?;
        let display_name = require("fullName", display_name)?;
        let email = require("email", email)?;

        let room_id = generate_room_id()?;
        info!(%room_id, %room_title, "creating room");

        let request = ClientFrame::Create(CreateRoom {
            room_id: room_id.clone(),
            room_title: room_title.to_string(),
            email: email.to_string(),
            full_name: display_name.to_string(),
            is_admin: true,
        });
        let member = Member {
            room_id,
            requested_title: Some(room_title.to_string()),
            display_name: display_name.to_string(),
            email: email.to_string(),
        };
        self.handshake(request, member).await
    }

    async fn try_join(
        &self,
        room_id: &str,
        display_name: &str,
        email: &str,
    ) -> Result<Handoff, ClientError> {
        let room_id = require("roomId", room_id)?;
        let display_name = require("fullName", display_name)?;
        let email = require("email", email)?;

        if !looks_like_room_id(room_id) {
            // The server is the authority on ids; just note it
            debug!(%room_id, "room id does not look generated");
        }
        info!(%room_id, "joining room");

        let request = ClientFrame::Join(JoinRoom {
            room_id: room_id.to_string(),
            email: email.to_string(),
            full_name: display_name.to_string(),
            is_admin: false,
        });
        let member = Member {
            room_id: room_id.to_string(),
            requested_title: None,
            display_name: display_name.to_string(),
            email: email.to_string(),
        };
        self.handshake(request, member).await
    }

    async fn handshake(
        &self,
        request: ClientFrame,
        member: Member,
    ) -> Result<Handoff, ClientError> {
        let json = request.to_json()?;
        let mut transport = self.ctx.connector.open().await?;
        let conn_id = Uuid::new_v4();
        debug!(%conn_id, room_id = %member.room_id, "handshake connection open");

        if let Err(e) = transport.send(json).await {
            let _ = transport.close().await;
            return Err(e);
        }

        loop {
            let text = match transport.recv().await {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Err(ClientError::Connection(e.to_string())),
                None => {
                    return Err(ClientError::Connection(
                        "connection closed before the server replied".to_string(),
                    ))
                },
            };

            let reply = match HandshakeReply::decode(&text) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(%conn_id, "ignoring undecodable handshake frame: {e}");
                    continue;
                },
            };

            match reply {
                HandshakeReply::Created { room_title } => {
                    return self.admit(transport, member, room_title, true).await;
                },
                HandshakeReply::Joined { room_title } => {
                    return self.admit(transport, member, room_title, false).await;
                },
                HandshakeReply::Limit => {
                    let _ = transport.close().await;
                    return Err(ClientError::RoomFull);
                },
                HandshakeReply::Rejected { message } => {
                    let _ = transport.close().await;
                    return Err(ClientError::ServerRejected(message.unwrap_or_default()));
                },
                HandshakeReply::Unrecognized(kind) => {
                    debug!(%conn_id, %kind, "ignoring frame while waiting for handshake reply");
                },
            }
        }
    }

    async fn admit(
        &self,
        mut transport: Box<dyn Transport>,
        member: Member,
        room_title: Option<String>,
        is_admin: bool,
    ) -> Result<Handoff, ClientError> {
        let descriptor = SessionDescriptor {
            room_id: member.room_id,
            room_title: room_title
                .filter(|title| !title.is_empty())
                .or(member.requested_title)
                .unwrap_or_default(),
            display_name: member.display_name,
            email: member.email,
            is_admin,
        };

        if let Err(e) = self.ctx.sessions.save(&descriptor).await {
            let _ = transport.close().await;
            return Err(e);
        }

        let (outcome, notice) = if is_admin {
            ("created", CREATED_NOTICE)
        } else {
            ("joined", JOINED_NOTICE)
        };
        counter!(HANDSHAKE_OUTCOME, "outcome" => outcome).increment(1);
        self.ctx.notifier.success(notice);
        info!(
            room_id = %descriptor.room_id,
            room_title = %descriptor.room_title,
            is_admin,
            "handshake complete"
        );

        Ok(Handoff {
            descriptor,
            transport,
        })
    }

    fn settle(&self, result: Result<Handoff, ClientError>) -> Result<Handoff, ClientError> {
        if let Err(e) = &result {
            warn!(code = e.error_code(), "handshake failed: {e}");
            counter!(HANDSHAKE_OUTCOME, "outcome" => e.error_code()).increment(1);
            self.ctx.notifier.failure(e.user_message());
        }
        result
    }
}
