//! Turn and state bookkeeping for a live conversation.
//!
//! Pure data: no I/O happens here. `LiveChatSession` drives it from transport
//! events and performs the side effects each transition implies.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Listening,
    Speaking,
    Error,
}

impl SessionState {
    /// Whether a session is open (events are being processed)
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Listening | SessionState::Speaking)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Speaking => "speaking",
            SessionState::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

/// Conversation log plus the partial transcripts of the turn in progress
#[derive(Debug, Default)]
pub struct Conversation {
    state: SessionState,
    log: Vec<ConversationTurn>,
    user_partial: String,
    assistant_partial: String,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn log(&self) -> &[ConversationTurn] {
        &self.log
    }

    pub fn user_partial(&self) -> &str {
        &self.user_partial
    }

    pub fn assistant_partial(&self) -> &str {
        &self.assistant_partial
    }

    /// Session opened: enter `Listening` with empty accumulators
    pub fn begin(&mut self) {
        self.user_partial.clear();
        self.assistant_partial.clear();
        self.state = SessionState::Listening;
    }

    pub fn on_input_transcript(&mut self, text: &str) {
        if !self.state.is_active() {
            return;
        }
        self.user_partial.push_str(text);
    }

    pub fn on_output_transcript(&mut self, text: &str) {
        if !self.state.is_active() {
            return;
        }
        self.assistant_partial.push_str(text);
        self.state = SessionState::Speaking;
    }

    /// Commit the user turn then the assistant turn, either possibly empty.
    ///
    /// Returns the number of turns committed (0 when inactive).
    pub fn on_turn_complete(&mut self) -> usize {
        if !self.state.is_active() {
            return 0;
        }
        self.log.push(ConversationTurn {
            role: Role::User,
            text: std::mem::take(&mut self.user_partial),
        });
        self.log.push(ConversationTurn {
            role: Role::Assistant,
            text: std::mem::take(&mut self.assistant_partial),
        });
        self.state = SessionState::Listening;
        debug!(turns = self.log.len(), "Turn committed");
        2
    }

    /// Discard both partials; the next turn accumulates from empty
    pub fn on_interrupted(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.user_partial.clear();
        self.assistant_partial.clear();
        self.state = SessionState::Listening;
        true
    }

    pub fn fail(&mut self) {
        self.state = SessionState::Error;
    }

    /// User stop: uncommitted text is dropped
    pub fn stop(&mut self) {
        self.user_partial.clear();
        self.assistant_partial.clear();
        self.state = SessionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_transcript_moves_to_speaking() {
        let mut conv = Conversation::new();
        conv.begin();
        conv.on_output_transcript("Hi");
        assert_eq!(conv.state(), SessionState::Speaking);
        assert_eq!(conv.assistant_partial(), "Hi");
    }

    #[test]
    fn empty_turns_are_still_committed() {
        let mut conv = Conversation::new();
        conv.begin();
        assert_eq!(conv.on_turn_complete(), 2);
        assert_eq!(conv.log()[0], ConversationTurn { role: Role::User, text: String::new() });
        assert_eq!(conv.log()[1].role, Role::Assistant);
    }

    #[test]
    fn events_ignored_when_idle_or_failed() {
        let mut conv = Conversation::new();
        conv.on_input_transcript("lost");
        assert_eq!(conv.on_turn_complete(), 0);
        assert_eq!(conv.state(), SessionState::Idle);

        conv.begin();
        conv.fail();
        conv.on_output_transcript("late");
        assert_eq!(conv.state(), SessionState::Error);
        assert!(conv.assistant_partial().is_empty());
    }

    #[test]
    fn interrupt_then_turn_complete_commits_empty_turns() {
        let mut conv = Conversation::new();
        conv.begin();
        conv.on_input_transcript("before");
        conv.on_output_transcript("partial");
        assert!(conv.on_interrupted());
        assert!(conv.log().is_empty());

        conv.on_turn_complete();
        assert_eq!(conv.log()[0], ConversationTurn { role: Role::User, text: String::new() });
        assert_eq!(conv.log()[1], ConversationTurn { role: Role::Assistant, text: String::new() });
    }

    #[test]
    fn stop_discards_partials() {
        let mut conv = Conversation::new();
        conv.begin();
        conv.on_input_transcript("half a sent");
        conv.stop();
        assert_eq!(conv.state(), SessionState::Idle);
        assert!(conv.user_partial().is_empty());
        assert!(conv.log().is_empty());
    }
}
