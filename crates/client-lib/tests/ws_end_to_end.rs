//! Create, join, chat and leave against a small in-test room server speaking
//! the real wire protocol over WebSocket.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use slang_client::{
    config::Settings,
    error::ClientError,
    room::{RoomClient, RoomEvent, RoomView, SendOutcome},
    ClientContext,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

struct Member {
    email: String,
    full_name: String,
    is_admin: bool,
    tx: mpsc::UnboundedSender<String>,
}

struct Room {
    title: String,
    members: Vec<Member>,
}

struct FakeServer {
    capacity: usize,
    rooms: Mutex<HashMap<String, Room>>,
    clock: Mutex<i64>,
}

enum Admission {
    Admitted { title: String, roster: Value },
    NotFound,
    Full,
}

impl FakeServer {
    fn create(&self, room_id: &str, title: &str) {
        self.rooms.lock().insert(
            room_id.to_string(),
            Room {
                title: title.to_string(),
                members: Vec::new(),
            },
        );
    }

    fn admit(&self, room_id: &str, payload: &Value, tx: &mpsc::UnboundedSender<String>) -> Admission {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return Admission::NotFound;
        };

        let email = payload["email"].as_str().unwrap_or_default();
        let is_new = !room.members.iter().any(|m| m.email == email);
        if is_new {
            if room.members.len() >= self.capacity {
                return Admission::Full;
            }
            let member = Member {
                email: email.to_string(),
                full_name: payload["fullName"].as_str().unwrap_or_default().to_string(),
                is_admin: payload["isAdmin"].as_bool().unwrap_or_default(),
                tx: tx.clone(),
            };
            let joined = json!({
                "type": "user_joined",
                "payload": { "email": member.email, "fullName": member.full_name, "isAdmin": member.is_admin }
            })
            .to_string();
            for other in &room.members {
                let _ = other.tx.send(joined.clone());
            }
            room.members.push(member);
        }

        let roster: Vec<Value> = room
            .members
            .iter()
            .map(|m| json!({ "email": m.email, "fullName": m.full_name, "isAdmin": m.is_admin }))
            .collect();
        Admission::Admitted {
            title: room.title.clone(),
            roster: Value::Array(roster),
        }
    }

    fn chat(&self, room_id: &str, email: &str, message: &str) {
        let timestamp = {
            let mut clock = self.clock.lock();
            *clock += 1_000;
            *clock
        };
        let frame = json!({
            "type": "chat",
            "payload": { "email": email, "message": message, "timestamp": timestamp }
        })
        .to_string();
        if let Some(room) = self.rooms.lock().get(room_id) {
            for member in &room.members {
                let _ = member.tx.send(frame.clone());
            }
        }
    }

    fn depart(&self, room_id: &str, email: &str) {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        let Some(index) = room.members.iter().position(|m| m.email == email) else {
            return;
        };
        let member = room.members.remove(index);
        let left = json!({
            "type": "user_left",
            "payload": { "email": member.email, "fullName": member.full_name }
        })
        .to_string();
        for other in &room.members {
            let _ = other.tx.send(left.clone());
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(server): State<Arc<FakeServer>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, server))
}

async fn handle_socket(socket: WebSocket, server: Arc<FakeServer>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let forward = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut membership: Option<(String, String)> = None;
    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let payload = &frame["payload"];
        let room_id = payload["roomId"].as_str().unwrap_or_default().to_string();

        match frame["type"].as_str() {
            Some("create") => {
                let title = payload["roomTitle"].as_str().unwrap_or_default();
                server.create(&room_id, title);
                let _ = tx.send(json!({ "type": "success", "payload": { "roomTitle": title } }).to_string());
            },
            Some("join") => match server.admit(&room_id, payload, &tx) {
                Admission::Admitted { title, roster } => {
                    let email = payload["email"].as_str().unwrap_or_default().to_string();
                    membership = Some((room_id, email));
                    let _ = tx.send(json!({ "type": "join", "roomTitle": title, "participants": roster }).to_string());
                },
                Admission::NotFound => {
                    let _ = tx.send(json!({ "type": "error", "payload": { "message": "Room not found" } }).to_string());
                },
                Admission::Full => {
                    let _ = tx.send(json!({ "type": "limit" }).to_string());
                },
            },
            Some("chat") => {
                let email = payload["email"].as_str().unwrap_or_default();
                let message = payload["message"].as_str().unwrap_or_default();
                server.chat(&room_id, email, message);
            },
            _ => {},
        }
    }

    if let Some((room_id, email)) = membership {
        server.depart(&room_id, &email);
    }
    forward.abort();
}

/// Start a room server on an ephemeral port; returns its WebSocket URL
async fn spawn_server(capacity: usize) -> String {
    let server = Arc::new(FakeServer {
        capacity,
        rooms: Mutex::new(HashMap::new()),
        clock: Mutex::new(1_700_000_000_000),
    });
    let app = Router::new().route("/ws", get(ws_handler)).with_state(server);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

fn context(url: &str) -> ClientContext {
    let settings = Settings {
        server_url: url.to_string(),
        ..Settings::default()
    };
    let (ctx, _notices) = ClientContext::from_settings(settings);
    ctx
}

async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future).await.expect("timed out")
}

async fn view_until(client: &RoomClient, done: impl FnMut(&RoomView) -> bool) -> RoomView {
    let mut view = client.view();
    let snapshot = within(view.wait_for(done)).await.unwrap().clone();
    snapshot
}

async fn wait_until_exit(events: &mut mpsc::UnboundedReceiver<RoomEvent>) {
    within(async {
        while let Some(event) = events.recv().await {
            if matches!(event, RoomEvent::Exit(_)) {
                return;
            }
        }
    })
    .await;
}

#[tokio::test]
async fn test_create_join_chat_leave() {
    let url = spawn_server(10).await;

    let ana_ctx = context(&url);
    let handoff = within(ana_ctx.establisher().create_room("Standup", "Ana", "ana@x.io"))
        .await
        .unwrap();
    let room_id = handoff.descriptor.room_id.clone();
    assert!(handoff.descriptor.is_admin);
    let (ana, _ana_events) = RoomClient::start(&ana_ctx, Some(handoff.transport)).await.unwrap();
    view_until(&ana, |v| v.participants.len() == 1).await;

    let bob_ctx = context(&url);
    let handoff = within(bob_ctx.establisher().join_room(&room_id, "Bob", "bob@x.io"))
        .await
        .unwrap();
    assert_eq!(handoff.descriptor.room_title, "Standup");
    assert!(!handoff.descriptor.is_admin);
    let (bob, mut bob_events) = RoomClient::start(&bob_ctx, Some(handoff.transport)).await.unwrap();

    view_until(&ana, |v| v.participants.len() == 2).await;
    assert_eq!(ana.messages().last().unwrap().body, "Bob joined the room");
    let seen_by_bob = view_until(&bob, |v| v.participants.len() == 2).await;
    assert!(seen_by_bob.participants.iter().any(|p| p.email == "ana@x.io" && p.is_admin));

    let counts = [ana.snapshot().message_count, bob.snapshot().message_count];
    assert_eq!(bob.send("hello").await, SendOutcome::Sent);
    for (client, before) in [&ana, &bob].into_iter().zip(counts) {
        view_until(client, |v| v.message_count > before).await;
        let messages = client.messages();
        let message = messages.iter().find(|m| m.body == "hello").unwrap();
        assert_eq!(message.sender_email, "bob@x.io");
        assert!(message.sent_at.is_some());
    }

    bob.leave().await.unwrap();
    wait_until_exit(&mut bob_events).await;
    assert_eq!(bob_ctx.sessions.load().await.unwrap(), None);

    view_until(&ana, |v| v.participants.len() == 1).await;
    assert_eq!(ana.messages().last().unwrap().body, "Bob left the room");
    assert!(ana_ctx.sessions.load().await.unwrap().is_some());
}

#[tokio::test]
async fn test_join_unknown_room_is_rejected() {
    let url = spawn_server(10).await;
    let ctx = context(&url);

    let err = within(ctx.establisher().join_room("dead-beef", "Bob", "bob@x.io"))
        .await
        .unwrap_err();
    assert!(matches!(&err, ClientError::ServerRejected(m) if m == "Room not found"));
    assert_eq!(ctx.sessions.load().await.unwrap(), None);
}

#[tokio::test]
async fn test_full_room_is_refused() {
    let url = spawn_server(1).await;

    let ana_ctx = context(&url);
    let handoff = within(ana_ctx.establisher().create_room("Pair", "Ana", "ana@x.io"))
        .await
        .unwrap();
    let room_id = handoff.descriptor.room_id.clone();
    let (ana, _events) = RoomClient::start(&ana_ctx, Some(handoff.transport)).await.unwrap();
    view_until(&ana, |v| v.participants.len() == 1).await;

    let bob_ctx = context(&url);
    let err = within(bob_ctx.establisher().join_room(&room_id, "Bob", "bob@x.io"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RoomFull));
    assert_eq!(bob_ctx.sessions.load().await.unwrap(), None);
}

#[tokio::test]
async fn test_unreachable_server() {
    // Nothing listens on this port once the listener is dropped
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    drop(listener);

    let ctx = context(&url);
    let err = within(ctx.establisher().create_room("Standup", "Ana", "ana@x.io"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)));
    assert_eq!(err.user_message(), "Failed to connect to server");
}
