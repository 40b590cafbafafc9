//! Chat input buffer.
use super::client::{RoomClient, SendOutcome};

/// Holds the text being typed. Submitting clears it only when the message
/// actually went out, so nothing is lost while reconnecting.
#[derive(Debug, Default, Clone)]
pub struct Composer {
    buffer: String,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn set(&mut self, text: impl Into<String>) {
        self.buffer = text.into();
    }

    pub fn push_str(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub async fn submit(&mut self, client: &RoomClient) -> SendOutcome {
        let outcome = client.send(&self.buffer).await;
        if outcome == SendOutcome::Sent {
            self.buffer.clear();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editing() {
        let mut composer = Composer::new();
        composer.set("hel");
        composer.push_str("lo");
        assert_eq!(composer.text(), "hello");
        composer.clear();
        assert!(composer.text().is_empty());
    }
}
