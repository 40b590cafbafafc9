// ============================
// crates/client-lib/src/room/client.rs
// ============================
//! Live room client.
//!
//! [`RoomClient`] is a handle to a single worker task that owns the
//! connection, the reconnect timer and all writes to the reconciled
//! [`RoomState`]. All inbound frames and user commands are processed on that
//! task one at a time, in arrival order. The handle reads the state through a
//! shared lock; the published [`RoomView`] carries only what is cheap to copy.
//!
//! # Connection lifecycle
//! `Disconnected -> Connecting -> Connected <-> Reconnecting -> Disconnected`
//!
//! - Connecting opens a connection (or adopts the one handed over by the
//!   establisher) and announces the session with a `join` frame.
//! - Any close or error moves to Reconnecting and schedules exactly one
//!   reconnect attempt after a fixed delay. Scheduling first cancels the
//!   previous timer, so at most one attempt is ever pending. Attempts repeat
//!   forever, without backoff.
//! - Leaving cancels the timer, closes the connection, discards the session
//!   descriptor and ends the task. It works in every state, including while
//!   an open is still in flight.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use slang_common::{ChatSend, ClientFrame, JoinRoom, LiveEvent, Millis, Participant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::{Alert, ChatMessage, RoomState};
use crate::error::ClientError;
use crate::metrics::{
    CHAT_DUPLICATE_DROPPED, CHAT_SENT, ROSTER_SIZE, WS_CONNECT_ATTEMPT, WS_RECONNECT_SCHEDULED,
};
use crate::notify::Notifier;
use crate::session::{SessionDescriptor, SessionStore};
use crate::transport::{Connector, Transport};
use crate::ClientContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Why the room view should be left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The user left
    Left,
    /// The server reported that the room does not exist
    RoomNotFound,
}

/// Changes pushed to the front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Connection(ConnectionState),
    Message(ChatMessage),
    Roster(Vec<Participant>),
    /// Non-fatal error text from the server
    ServerError(String),
    /// Terminal; no further events follow
    Exit(ExitReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Blank input; nothing to send
    Empty,
    /// No open connection; the input should be kept for a retry
    NotConnected,
}

/// Snapshot published after every applied change. The message log itself is
/// read with [`RoomClient::messages`] or followed through [`RoomEvent::Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomView {
    pub connection: ConnectionState,
    pub message_count: usize,
    /// At most `capacity` entries
    pub participants: Vec<Participant>,
    pub capacity: usize,
}

#[derive(Debug)]
enum Command {
    Send {
        body: String,
        reply: oneshot::Sender<SendOutcome>,
    },
    Leave {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running room session
pub struct RoomClient {
    descriptor: SessionDescriptor,
    cmd_tx: mpsc::UnboundedSender<Command>,
    view_rx: watch::Receiver<RoomView>,
    state: Arc<RwLock<RoomState>>,
    sessions: Arc<dyn SessionStore>,
    task: JoinHandle<()>,
}

impl RoomClient {
    /// Enter the room described by the stored session descriptor.
    ///
    /// `reused` is the connection left open by the establisher, if any; the
    /// client opens its own otherwise.
    ///
    /// # Errors
    /// [`ClientError::NoActiveSession`] if no descriptor is stored; the
    /// caller should return to the create/join flow.
    pub async fn start(
        ctx: &ClientContext,
        reused: Option<Box<dyn Transport>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RoomEvent>), ClientError> {
        let descriptor = ctx
            .sessions
            .load()
            .await?
            .ok_or(ClientError::NoActiveSession)?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(RoomView {
            connection: ConnectionState::Disconnected,
            message_count: 0,
            participants: Vec::new(),
            capacity: ctx.settings.room_capacity,
        });
        let state = Arc::new(RwLock::new(RoomState::new()));

        info!(
            room_id = %descriptor.room_id,
            email = %descriptor.email,
            reused = reused.is_some(),
            "entering room"
        );

        let worker = RoomWorker {
            descriptor: descriptor.clone(),
            connector: Arc::clone(&ctx.connector),
            sessions: Arc::clone(&ctx.sessions),
            notifier: Arc::clone(&ctx.notifier),
            reconnect_delay: ctx.settings.reconnect_delay(),
            capacity: ctx.settings.room_capacity,
            state: Arc::clone(&state),
            connection: ConnectionState::Disconnected,
            reconnect: None,
            timer_tx,
            timers_scheduled: 0,
            events: event_tx,
            view: view_tx,
        };
        let task = tokio::spawn(worker.run(cmd_rx, timer_rx, reused));

        let client = Self {
            descriptor,
            cmd_tx,
            view_rx,
            state,
            sessions: Arc::clone(&ctx.sessions),
            task,
        };
        Ok((client, event_rx))
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    /// Watch the room view; updated after every applied change
    pub fn view(&self) -> watch::Receiver<RoomView> {
        self.view_rx.clone()
    }

    pub fn snapshot(&self) -> RoomView {
        self.view_rx.borrow().clone()
    }

    /// Copy of the message log in receipt order
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().messages().to_vec()
    }

    /// Whether the worker task is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Send a chat message. Blank input is ignored; without an open
    /// connection nothing is sent and `NotConnected` is returned.
    pub async fn send(&self, body: &str) -> SendOutcome {
        if body.trim().is_empty() {
            return SendOutcome::Empty;
        }

        let (reply, rx) = oneshot::channel();
        let command = Command::Send {
            body: body.to_string(),
            reply,
        };
        if self.cmd_tx.send(command).is_err() {
            warn!("room client stopped; message not sent");
            return SendOutcome::NotConnected;
        }
        rx.await.unwrap_or(SendOutcome::NotConnected)
    }

    /// Leave the room. Safe to call in any state and more than once.
    pub async fn leave(&self) -> Result<(), ClientError> {
        let (done, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Leave { done }).is_ok() {
            let _ = rx.await;
        }

        // The worker may have exited already; make sure our descriptor is gone
        // without touching one written by a later handshake.
        if self.sessions.load().await?.as_ref() == Some(&self.descriptor) {
            self.sessions.clear().await?;
        }
        Ok(())
    }
}

/// The single pending reconnect attempt. Dropping it cancels the attempt.
struct ReconnectTimer {
    id: u64,
    handle: JoinHandle<()>,
}

impl ReconnectTimer {
    fn schedule(id: u64, delay: Duration, fire: mpsc::UnboundedSender<u64>) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fire.send(id);
        });
        Self { id, handle }
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

enum Flow {
    Continue,
    Stop,
}

enum Opening {
    Done(Result<Box<dyn Transport>, ClientError>),
    Stopped,
}

struct RoomWorker {
    descriptor: SessionDescriptor,
    connector: Arc<dyn Connector>,
    sessions: Arc<dyn SessionStore>,
    notifier: Arc<Notifier>,
    reconnect_delay: Duration,
    capacity: usize,
    state: Arc<RwLock<RoomState>>,
    connection: ConnectionState,
    reconnect: Option<ReconnectTimer>,
    timer_tx: mpsc::UnboundedSender<u64>,
    timers_scheduled: u64,
    events: mpsc::UnboundedSender<RoomEvent>,
    view: watch::Sender<RoomView>,
}

impl RoomWorker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut timers: mpsc::UnboundedReceiver<u64>,
        mut reused: Option<Box<dyn Transport>>,
    ) {
        loop {
            self.set_connection(ConnectionState::Connecting);

            let opened = match reused.take() {
                Some(transport) => Ok(transport),
                None => match self.open(&mut commands).await {
                    Opening::Done(result) => result,
                    Opening::Stopped => return,
                },
            };

            match opened {
                Ok(transport) => {
                    if let Flow::Stop = self.connected(transport, &mut commands).await {
                        return;
                    }
                },
                Err(e) => warn!("could not open room connection: {e}"),
            }

            self.schedule_reconnect();
            if let Flow::Stop = self.await_reconnect(&mut commands, &mut timers).await {
                return;
            }
        }
    }

    async fn open(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Opening {
        counter!(WS_CONNECT_ATTEMPT).increment(1);

        let connector = Arc::clone(&self.connector);
        let open = connector.open();
        tokio::pin!(open);

        loop {
            tokio::select! {
                result = &mut open => return Opening::Done(result),
                command = commands.recv() => {
                    // A leave here drops the pending open
                    if let Flow::Stop = self.idle_command(command).await {
                        return Opening::Stopped;
                    }
                }
            }
        }
    }

    async fn connected(
        &mut self,
        mut transport: Box<dyn Transport>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Flow {
        let conn_id = Uuid::new_v4();

        let announcement = ClientFrame::Join(JoinRoom {
            room_id: self.descriptor.room_id.clone(),
            email: self.descriptor.email.clone(),
            full_name: self.descriptor.display_name.clone(),
            is_admin: self.descriptor.is_admin,
        });
        let sent = match announcement.to_json() {
            Ok(json) => transport.send(json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            warn!(%conn_id, "could not announce presence: {e}");
            let _ = transport.close().await;
            return Flow::Continue;
        }

        info!(%conn_id, room_id = %self.descriptor.room_id, "connected to room");
        self.set_connection(ConnectionState::Connected);

        loop {
            tokio::select! {
                incoming = transport.recv() => match incoming {
                    Some(Ok(text)) => {
                        debug!(%conn_id, %text, "frame received");
                        if let Some(reason) = self.on_frame(&text) {
                            self.finish(Some(&mut transport), Some(reason)).await;
                            return Flow::Stop;
                        }
                    },
                    Some(Err(e)) => {
                        warn!(%conn_id, "room connection failed: {e}");
                        let _ = transport.close().await;
                        return Flow::Continue;
                    },
                    None => {
                        info!(%conn_id, "room connection closed");
                        return Flow::Continue;
                    },
                },
                command = commands.recv() => match command {
                    Some(Command::Send { body, reply }) => {
                        let outcome = self.send_chat(&mut transport, &body).await;
                        let _ = reply.send(outcome);
                    },
                    Some(Command::Leave { done }) => {
                        self.finish(Some(&mut transport), Some(ExitReason::Left)).await;
                        let _ = done.send(());
                        return Flow::Stop;
                    },
                    None => {
                        self.finish(Some(&mut transport), None).await;
                        return Flow::Stop;
                    },
                },
            }
        }
    }

    async fn await_reconnect(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        timers: &mut mpsc::UnboundedReceiver<u64>,
    ) -> Flow {
        loop {
            tokio::select! {
                fired = timers.recv() => {
                    let current = self.reconnect.as_ref().map(|timer| timer.id);
                    match fired {
                        Some(id) if Some(id) == current => {
                            self.reconnect = None;
                            info!("attempting to reconnect");
                            return Flow::Continue;
                        },
                        Some(id) => debug!(id, "ignoring cancelled reconnect timer"),
                        // The worker owns a sender, so this never closes
                        None => return Flow::Continue,
                    }
                },
                command = commands.recv() => {
                    if let Flow::Stop = self.idle_command(command).await {
                        return Flow::Stop;
                    }
                },
            }
        }
    }

    /// Handle a command while no connection is open
    async fn idle_command(&mut self, command: Option<Command>) -> Flow {
        match command {
            Some(Command::Send { body, reply }) => {
                let outcome = if body.trim().is_empty() {
                    SendOutcome::Empty
                } else {
                    warn!(state = ?self.connection, "not connected; message not sent");
                    SendOutcome::NotConnected
                };
                let _ = reply.send(outcome);
                Flow::Continue
            },
            Some(Command::Leave { done }) => {
                self.finish(None, Some(ExitReason::Left)).await;
                let _ = done.send(());
                Flow::Stop
            },
            None => {
                self.finish(None, None).await;
                Flow::Stop
            },
        }
    }

    /// Apply one inbound frame; returns an exit reason if the session is over
    fn on_frame(&mut self, text: &str) -> Option<ExitReason> {
        let event = match LiveEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("ignoring undecodable frame: {e}");
                return None;
            },
        };
        if let LiveEvent::Unrecognized(kind) = &event {
            debug!(%kind, "ignoring unrecognized frame");
        }

        let applied = self.state.write().apply(event, now_millis());

        if applied.duplicate {
            counter!(CHAT_DUPLICATE_DROPPED).increment(1);
            debug!("duplicate chat frame dropped");
        }
        for message in &applied.appended {
            self.emit(RoomEvent::Message(message.clone()));
        }
        if applied.roster_changed {
            let participants = self.state.read().participants().to_vec();
            gauge!(ROSTER_SIZE).set(participants.len() as f64);
            self.emit(RoomEvent::Roster(participants));
        }
        self.publish_view();

        match applied.alert {
            Some(Alert::RoomGone(message)) => {
                let err = ClientError::FatalRoom(message);
                error!(code = err.error_code(), "{err}");
                self.notifier.failure(err.user_message());
                Some(ExitReason::RoomNotFound)
            },
            Some(Alert::Server(message)) => {
                warn!(%message, "server reported an error");
                self.emit(RoomEvent::ServerError(message));
                None
            },
            None => None,
        }
    }

    async fn send_chat(&mut self, transport: &mut Box<dyn Transport>, body: &str) -> SendOutcome {
        let body = body.trim();
        if body.is_empty() {
            return SendOutcome::Empty;
        }

        let frame = ClientFrame::Chat(ChatSend {
            room_id: self.descriptor.room_id.clone(),
            email: self.descriptor.email.clone(),
            message: body.to_string(),
        });
        let sent = match frame.to_json() {
            Ok(json) => transport.send(json).await,
            Err(e) => Err(e.into()),
        };

        match sent {
            Ok(()) => {
                counter!(CHAT_SENT).increment(1);
                SendOutcome::Sent
            },
            Err(e) => {
                warn!("chat message not sent: {e}");
                SendOutcome::NotConnected
            },
        }
    }

    fn schedule_reconnect(&mut self) {
        // Replacing the handle drops (and so cancels) the previous timer
        self.timers_scheduled += 1;
        self.reconnect = Some(ReconnectTimer::schedule(
            self.timers_scheduled,
            self.reconnect_delay,
            self.timer_tx.clone(),
        ));
        counter!(WS_RECONNECT_SCHEDULED).increment(1);
        info!(delay_ms = self.reconnect_delay.as_millis() as u64, "reconnect scheduled");
        self.set_connection(ConnectionState::Reconnecting);
    }

    /// Tear down. `reason` is `None` when the handle was dropped: the
    /// descriptor is kept and no exit is signalled.
    async fn finish(
        &mut self,
        transport: Option<&mut Box<dyn Transport>>,
        reason: Option<ExitReason>,
    ) {
        self.reconnect = None;

        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                debug!("error while closing room connection: {e}");
            }
        }

        if reason.is_some() {
            if let Err(e) = self.sessions.clear().await {
                error!("could not discard session descriptor: {e}");
            }
        }

        self.set_connection(ConnectionState::Disconnected);

        if let Some(reason) = reason {
            info!(?reason, room_id = %self.descriptor.room_id, "left room");
            self.emit(RoomEvent::Exit(reason));
        }
    }

    fn set_connection(&mut self, connection: ConnectionState) {
        if self.connection == connection {
            return;
        }
        debug!(from = ?self.connection, to = ?connection, "connection state");
        self.connection = connection;
        self.emit(RoomEvent::Connection(connection));
        self.publish_view();
    }

    fn publish_view(&self) {
        let state = self.state.read();
        self.view.send_replace(RoomView {
            connection: self.connection,
            message_count: state.messages().len(),
            participants: state.participants().to_vec(),
            capacity: self.capacity,
        });
    }

    fn emit(&self, event: RoomEvent) {
        // The front end may have stopped listening; the session carries on
        let _ = self.events.send(event);
    }
}

fn now_millis() -> Millis {
    chrono::Utc::now().timestamp_millis()
}
