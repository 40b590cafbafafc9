//! Transient user notifications.
//!
//! Every notice is followed by a `Dismissed` event once its time to live has
//! elapsed. The front end decides how to render them.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeEvent {
    Shown(Notice),
    Dismissed(u64),
}

pub struct Notifier {
    tx: mpsc::UnboundedSender<NoticeEvent>,
    ttl: Duration,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new(ttl: Duration) -> (Self, mpsc::UnboundedReceiver<NoticeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            tx,
            ttl,
            next_id: AtomicU64::new(1),
        };
        (notifier, rx)
    }

    pub fn success(&self, text: impl Into<String>) -> u64 {
        self.show(NoticeKind::Success, text.into())
    }

    pub fn failure(&self, text: impl Into<String>) -> u64 {
        self.show(NoticeKind::Failure, text.into())
    }

    /// Show a notice and schedule its dismissal. Must be called within a
    /// tokio runtime.
    pub fn show(&self, kind: NoticeKind, text: String) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, ?kind, %text, "notice shown");

        if self.tx.send(NoticeEvent::Shown(Notice { id, kind, text })).is_err() {
            // Nobody is rendering notices
            return id;
        }

        let tx = self.tx.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = tx.send(NoticeEvent::Dismissed(id));
        });

        id
    }
}
