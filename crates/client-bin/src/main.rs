use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use slang_client::{
    config::Settings,
    notify::{Notice, NoticeEvent, NoticeKind},
    room::{ChatMessage, Composer, ConnectionState, ExitReason, RoomClient, RoomEvent, SendOutcome},
    ClientContext,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slang", about = "Chat in a Slang room from the terminal")]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Room server URL, overrides the settings file
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new room and enter it as admin
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Join an existing room by id
    Join {
        #[arg(long)]
        room: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    if let Some(url) = cli.server {
        settings.server_url = url;
        settings.validate()?;
    }

    init_tracing(&settings);
    info!(server_url = %settings.server_url, "starting slang");

    let (ctx, mut notices) = ClientContext::from_settings(settings);

    let establisher = ctx.establisher();
    let handoff = match cli.command {
        Command::Create { title, name, email } => {
            establisher.create_room(&title, &name, &email).await
        },
        Command::Join { room, name, email } => establisher.join_room(&room, &name, &email).await,
    };

    // The handshake raises its notice before returning; print it before a
    // failure ends the process
    for notice in pending_notices(&mut notices) {
        render_notice(&notice);
    }
    let handoff = handoff?;
    tokio::spawn(render_notices(notices));

    let descriptor = &handoff.descriptor;
    println!("== {} ==", descriptor.room_title);
    println!("Room id: {} (share it to invite others)", descriptor.room_id);
    println!("Type to chat. /who lists participants, /leave exits.");

    let (client, events) = RoomClient::start(&ctx, Some(handoff.transport)).await?;
    chat(client, events).await
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if settings.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn chat(client: RoomClient, mut events: mpsc::UnboundedReceiver<RoomEvent>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut composer = Composer::new();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(RoomEvent::Exit(reason)) => {
                    match reason {
                        ExitReason::Left => println!("You left the room."),
                        ExitReason::RoomNotFound => println!("Room not found. Returning to home."),
                    }
                    break;
                },
                Some(event) => render_event(&client, event),
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                None => {
                    stdin_open = false;
                    client.leave().await?;
                },
                Some(line) => match line.trim() {
                    "/leave" => client.leave().await?,
                    "/who" => render_roster(&client),
                    text => {
                        // An empty line retries a message kept from a failed send
                        if !text.is_empty() {
                            composer.set(text);
                        }
                        if composer.submit(&client).await == SendOutcome::NotConnected {
                            println!("! Not connected. Press enter to retry.");
                        }
                    },
                },
            },
        }
    }

    Ok(())
}

fn render_event(client: &RoomClient, event: RoomEvent) {
    match event {
        RoomEvent::Connection(ConnectionState::Connected) => println!("* connected"),
        RoomEvent::Connection(ConnectionState::Reconnecting) => println!("* connection lost, reconnecting..."),
        RoomEvent::Connection(_) => {},
        RoomEvent::Message(message) => render_message(client, &message),
        RoomEvent::Roster(_) => {},
        RoomEvent::ServerError(message) => println!("! {message}"),
        RoomEvent::Exit(_) => {},
    }
}

fn render_message(client: &RoomClient, message: &ChatMessage) {
    let time = message
        .sent_at
        .and_then(|at| DateTime::<Utc>::from_timestamp_millis(at.as_millis()))
        .map(|at| at.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());

    if message.is_system() {
        println!("[{time}] * {}", message.body);
        return;
    }

    let view = client.snapshot();
    let sender = view
        .participants
        .iter()
        .find(|p| p.email == message.sender_email && !p.display_name.is_empty())
        .map(|p| p.display_name.as_str())
        .unwrap_or(message.sender_email.as_str());
    let marker = if message.sender_email == client.descriptor().email {
        " (you)"
    } else {
        ""
    };
    println!("[{time}] {sender}{marker}: {}", message.body);
}

fn render_roster(client: &RoomClient) {
    let view = client.snapshot();
    println!("Participants {}/{}", view.participants.len(), view.capacity);
    for participant in &view.participants {
        let role = if participant.is_admin { " (admin)" } else { "" };
        println!("  {} <{}>{role}", participant.display_name, participant.email);
    }
}

async fn render_notices(mut notices: mpsc::UnboundedReceiver<NoticeEvent>) {
    while let Some(event) = notices.recv().await {
        if let NoticeEvent::Shown(notice) = event {
            render_notice(&notice);
        }
    }
}

/// Notices already shown but not yet rendered
fn pending_notices(notices: &mut mpsc::UnboundedReceiver<NoticeEvent>) -> Vec<Notice> {
    let mut pending = Vec::new();
    while let Ok(event) = notices.try_recv() {
        if let NoticeEvent::Shown(notice) = event {
            pending.push(notice);
        }
    }
    pending
}

fn render_notice(notice: &Notice) {
    match notice.kind {
        NoticeKind::Success => println!("+ {}", notice.text),
        NoticeKind::Failure => eprintln!("x {}", notice.text),
    }
}
