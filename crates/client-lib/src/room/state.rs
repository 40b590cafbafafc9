// ============================
// crates/client-lib/src/room/state.rs
// ============================
//! Message log and roster, reconciled from live events.
//!
//! [`RoomState::apply`] is the only way live events change local state, and
//! every case is idempotent under redelivery of the same frame:
//! - chat lines are deduplicated on `(sender, body, sent_at)`
//! - `user_joined` for a known email leaves the roster untouched
//! - `user_left` for an unknown email leaves the roster untouched
use std::collections::HashSet;

use slang_common::{
    is_room_not_found, ChatLine, Departure, LiveEvent, Millis, Participant, Timestamp, SYSTEM_SENDER,
};

/// One entry of the message log
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatMessage {
    pub sender_email: String,
    pub body: String,
    pub sent_at: Option<Timestamp>,
}

impl ChatMessage {
    /// Locally generated join/leave announcement; never sent over the wire
    pub fn system(body: impl Into<String>, at: Millis) -> Self {
        Self {
            sender_email: SYSTEM_SENDER.to_string(),
            body: body.into(),
            sent_at: Some(Timestamp::from(at)),
        }
    }

    pub fn is_system(&self) -> bool {
        self.sender_email == SYSTEM_SENDER
    }
}

impl From<ChatLine> for ChatMessage {
    fn from(line: ChatLine) -> Self {
        Self {
            sender_email: line.email,
            body: line.message,
            sent_at: line.timestamp,
        }
    }
}

/// Append-only log in receipt order, without duplicate entries
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<ChatMessage>,
    seen: HashSet<ChatMessage>,
}

impl MessageLog {
    /// Append unless an equal entry is already retained
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.clone()) {
            return false;
        }
        self.entries.push(message);
        true
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Participants keyed by email, in arrival order
#[derive(Debug, Clone, Default)]
pub struct Roster {
    members: Vec<Participant>,
}

impl Roster {
    /// Replace the roster wholesale. Later duplicates of an email are dropped.
    pub fn replace(&mut self, participants: Vec<Participant>) {
        let mut seen = HashSet::new();
        self.members = participants
            .into_iter()
            .filter(|p| seen.insert(p.email.clone()))
            .collect();
    }

    pub fn add(&mut self, participant: Participant) -> bool {
        if self.contains(&participant.email) {
            return false;
        }
        self.members.push(participant);
        true
    }

    pub fn remove(&mut self, email: &str) -> Option<Participant> {
        let index = self.members.iter().position(|p| p.email == email)?;
        Some(self.members.remove(index))
    }

    pub fn get(&self, email: &str) -> Option<&Participant> {
        self.members.iter().find(|p| p.email == email)
    }

    pub fn contains(&self, email: &str) -> bool {
        self.get(email).is_some()
    }

    pub fn members(&self) -> &[Participant] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Error reported by the server on the live channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// The room no longer exists; the session is over
    RoomGone(String),
    /// Anything else; surfaced but not fatal
    Server(String),
}

/// What one applied event changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub appended: Vec<ChatMessage>,
    pub roster_changed: bool,
    pub duplicate: bool,
    pub alert: Option<Alert>,
}

impl Applied {
    pub fn is_noop(&self) -> bool {
        self.appended.is_empty() && !self.roster_changed && self.alert.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoomState {
    log: MessageLog,
    roster: Roster,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.log.entries()
    }

    pub fn participants(&self) -> &[Participant] {
        self.roster.members()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Apply one live event. `now` stamps synthetic system messages.
    pub fn apply(&mut self, event: LiveEvent, now: Millis) -> Applied {
        let mut applied = Applied::default();

        match event {
            LiveEvent::RosterSnapshot(participants) => {
                self.roster.replace(participants);
                applied.roster_changed = true;
            },
            LiveEvent::Chat(line) => {
                let message = ChatMessage::from(line);
                if self.log.push(message.clone()) {
                    applied.appended.push(message);
                } else {
                    applied.duplicate = true;
                }
            },
            LiveEvent::UserJoined(participant) => {
                let announcement = format!("{} joined the room", name_of(&participant));
                applied.roster_changed = self.roster.add(participant);
                self.announce(announcement, now, &mut applied);
            },
            LiveEvent::UserLeft(departure) => {
                let removed = self.roster.remove(&departure.email);
                let announcement = format!("{} left the room", departure_name(&departure, removed.as_ref()));
                applied.roster_changed = removed.is_some();
                self.announce(announcement, now, &mut applied);
            },
            LiveEvent::Error { message } => {
                let message = message.unwrap_or_else(|| "An error occurred".to_string());
                applied.alert = Some(if is_room_not_found(&message) {
                    Alert::RoomGone(message)
                } else {
                    Alert::Server(message)
                });
            },
            LiveEvent::Unrecognized(_) => {},
        }

        applied
    }

    fn announce(&mut self, body: String, now: Millis, applied: &mut Applied) {
        let message = ChatMessage::system(body, now);
        if self.log.push(message.clone()) {
            applied.appended.push(message);
        }
    }
}

fn name_of(participant: &Participant) -> &str {
    if participant.display_name.trim().is_empty() {
        &participant.email
    } else {
        &participant.display_name
    }
}

fn departure_name<'a>(departure: &'a Departure, known: Option<&'a Participant>) -> &'a str {
    departure
        .display_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| known.map(name_of))
        .unwrap_or(&departure.email)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(email: &str, name: &str) -> Participant {
        Participant {
            email: email.to_string(),
            display_name: name.to_string(),
            is_admin: false,
        }
    }

    fn chat(email: &str, message: &str, timestamp: Option<Millis>) -> LiveEvent {
        chat_at(email, message, timestamp.map(Timestamp::from))
    }

    fn chat_at(email: &str, message: &str, timestamp: Option<Timestamp>) -> LiveEvent {
        LiveEvent::Chat(ChatLine {
            email: email.to_string(),
            message: message.to_string(),
            timestamp,
        })
    }

    #[test]
    fn test_redelivered_chat_is_dropped() {
        let mut state = RoomState::new();

        let first = state.apply(chat("bob@x.com", "hi", Some(1000)), 0);
        assert_eq!(first.appended.len(), 1);

        let again = state.apply(chat("bob@x.com", "hi", Some(1000)), 0);
        assert!(again.duplicate);
        assert!(again.is_noop());
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn test_chat_dedup_key_is_the_full_triple() {
        let mut state = RoomState::new();
        state.apply(chat("bob@x.com", "hi", Some(1000)), 0);
        state.apply(chat("bob@x.com", "hi", Some(1001)), 0);
        state.apply(chat("cy@x.com", "hi", Some(1000)), 0);
        state.apply(chat("bob@x.com", "hey", Some(1000)), 0);
        state.apply(chat("bob@x.com", "hi", None), 0);
        state.apply(chat("bob@x.com", "hi", None), 0);

        assert_eq!(state.messages().len(), 5);
    }

    #[test]
    fn test_fractional_timestamps_are_distinct_keys() {
        let mut state = RoomState::new();
        state.apply(chat_at("bob@x.com", "hi", Timestamp::from_f64(1000.2)), 0);
        state.apply(chat_at("bob@x.com", "hi", Timestamp::from_f64(1000.7)), 0);
        let again = state.apply(chat_at("bob@x.com", "hi", Timestamp::from_f64(1000.7)), 0);

        assert!(again.duplicate);
        assert_eq!(state.messages().len(), 2);
    }

    #[test]
    fn test_interleaved_redelivery_keeps_receipt_order() {
        let events = vec![
            chat("a@x.com", "one", Some(1)),
            chat("b@x.com", "two", Some(2)),
            chat("a@x.com", "one", Some(1)),
            chat("c@x.com", "three", Some(3)),
            chat("b@x.com", "two", Some(2)),
        ];

        let mut state = RoomState::new();
        for event in events {
            state.apply(event, 0);
        }

        let bodies: Vec<&str> = state.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["one", "two", "three"]);
    }

    #[test]
    fn test_user_joined_is_idempotent_on_roster() {
        let mut state = RoomState::new();
        state.apply(
            LiveEvent::RosterSnapshot(vec![participant("ana@x.com", "Ana")]),
            0,
        );

        let applied = state.apply(LiveEvent::UserJoined(participant("bob@x.com", "Bob")), 10);
        assert!(applied.roster_changed);
        assert_eq!(applied.appended, vec![ChatMessage::system("Bob joined the room", 10)]);

        let again = state.apply(LiveEvent::UserJoined(participant("bob@x.com", "Bob")), 20);
        assert!(!again.roster_changed);
        assert_eq!(state.participants().len(), 2);
        // The announcement is still logged, stamped with its own receipt time
        assert_eq!(again.appended.len(), 1);
    }

    #[test]
    fn test_user_left_for_absent_email_leaves_roster_unchanged() {
        let mut state = RoomState::new();
        state.apply(
            LiveEvent::RosterSnapshot(vec![participant("ana@x.com", "Ana")]),
            0,
        );

        let applied = state.apply(
            LiveEvent::UserLeft(Departure {
                email: "ghost@x.com".to_string(),
                display_name: Some("Ghost".to_string()),
            }),
            5,
        );
        assert!(!applied.roster_changed);
        assert_eq!(state.participants(), &[participant("ana@x.com", "Ana")]);
        assert_eq!(applied.appended[0].body, "Ghost left the room");
    }

    #[test]
    fn test_user_left_name_falls_back_to_roster_then_email() {
        let mut state = RoomState::new();
        state.apply(
            LiveEvent::RosterSnapshot(vec![participant("ana@x.com", "Ana")]),
            0,
        );

        let from_roster = state.apply(
            LiveEvent::UserLeft(Departure {
                email: "ana@x.com".to_string(),
                display_name: None,
            }),
            1,
        );
        assert!(from_roster.roster_changed);
        assert_eq!(from_roster.appended[0].body, "Ana left the room");
        assert!(state.roster().is_empty());

        let from_email = state.apply(
            LiveEvent::UserLeft(Departure {
                email: "ana@x.com".to_string(),
                display_name: None,
            }),
            2,
        );
        assert_eq!(from_email.appended[0].body, "ana@x.com left the room");
    }

    #[test]
    fn test_snapshot_replaces_roster_and_keeps_emails_unique() {
        let mut state = RoomState::new();
        state.apply(LiveEvent::UserJoined(participant("old@x.com", "Old")), 0);

        state.apply(
            LiveEvent::RosterSnapshot(vec![
                participant("ana@x.com", "Ana"),
                participant("bob@x.com", "Bob"),
                participant("ana@x.com", "Ana again"),
            ]),
            1,
        );

        let emails: Vec<&str> = state.participants().iter().map(|p| p.email.as_str()).collect();
        assert_eq!(emails, ["ana@x.com", "bob@x.com"]);
    }

    #[test]
    fn test_roster_beyond_capacity_is_reflected() {
        let mut state = RoomState::new();
        let crowd: Vec<Participant> = (0..12)
            .map(|i| participant(&format!("p{i}@x.com"), &format!("P{i}")))
            .collect();

        state.apply(LiveEvent::RosterSnapshot(crowd), 0);
        assert_eq!(state.participants().len(), 12);
    }

    #[test]
    fn test_errors_are_classified() {
        let mut state = RoomState::new();

        let gone = state.apply(
            LiveEvent::Error {
                message: Some("Room not found".to_string()),
            },
            0,
        );
        assert_eq!(gone.alert, Some(Alert::RoomGone("Room not found".to_string())));

        let other = state.apply(
            LiveEvent::Error {
                message: Some("Message too long".to_string()),
            },
            0,
        );
        assert_eq!(other.alert, Some(Alert::Server("Message too long".to_string())));

        let blank = state.apply(LiveEvent::Error { message: None }, 0);
        assert_eq!(blank.alert, Some(Alert::Server("An error occurred".to_string())));
    }

    #[test]
    fn test_unrecognized_events_change_nothing() {
        let mut state = RoomState::new();
        let applied = state.apply(LiveEvent::Unrecognized("typing".to_string()), 0);
        assert!(applied.is_noop());
        assert!(state.messages().is_empty());
    }
}
