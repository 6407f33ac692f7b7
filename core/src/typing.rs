//! Typing indicator, both directions.

use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Typing,
    StopTyping,
}

/// Outbound side: every keystroke emits `Typing` and pushes the idle
/// deadline out; once the deadline passes with no keystroke, `StopTyping`
/// is emitted exactly once.
#[derive(Debug)]
pub struct TypingEmitter {
    idle: Duration,
    deadline: Option<Instant>,
}

impl TypingEmitter {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            deadline: None,
        }
    }

    pub fn keystroke(&mut self, now: Instant) -> TypingSignal {
        self.deadline = Some(now + self.idle);
        TypingSignal::Typing
    }

    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(TypingSignal::StopTyping)
            }
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    /// Ends the typing burst early (message sent). Returns `StopTyping` if
    /// one was owed to the peer.
    pub fn reset(&mut self) -> Option<TypingSignal> {
        self.deadline.take().map(|_| TypingSignal::StopTyping)
    }
}

/// Inbound side. A peer stays "typing" until it says otherwise or a message
/// from it arrives.
#[derive(Debug, Default)]
pub struct PeerTyping {
    typing: HashSet<String>,
}

impl PeerTyping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the flag changed.
    pub fn start(&mut self, peer: &str) -> bool {
        self.typing.insert(peer.to_string())
    }

    pub fn stop(&mut self, peer: &str) -> bool {
        self.typing.remove(peer)
    }

    pub fn message_from(&mut self, peer: &str) -> bool {
        self.stop(peer)
    }

    pub fn is_typing(&self, peer: &str) -> bool {
        self.typing.contains(peer)
    }

    pub fn any(&self) -> bool {
        !self.typing.is_empty()
    }

    pub fn clear(&mut self) {
        self.typing.clear();
    }
}
