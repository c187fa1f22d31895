//! Session-scoped conversation memory.
//!
//! A [`MemoryWindow`] holds one session's turns in order and evicts the
//! oldest once either the turn budget or the token budget is exceeded.
//! A [`Session`] wraps a window with its lifecycle timestamps; the agent
//! keeps one per explicit session ID.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::models::ConversationTurn;

/// Marker appended to a turn cut down to fit the token budget.
const TRUNCATION_MARKER: &str = " [...]";

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Size limits of a [`MemoryWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBudget {
    pub max_turns: usize,
    pub max_tokens: usize,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_tokens: 4000,
        }
    }
}

impl MemoryBudget {
    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 || self.max_tokens == 0 {
            return Err(HarnessError::InvalidConfig(
                "memory.max_turns and memory.max_tokens must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounded, ordered history of one session.
#[derive(Debug, Clone)]
pub struct MemoryWindow {
    budget: MemoryBudget,
    turns: VecDeque<ConversationTurn>,
    tokens: usize,
    evicted: usize,
}

impl MemoryWindow {
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            budget,
            turns: VecDeque::new(),
            tokens: 0,
            evicted: 0,
        }
    }

    /// Append a turn, evicting oldest turns until both budgets hold.
    ///
    /// A turn that alone exceeds the token budget is truncated to fit.
    /// Returns the number of turns evicted.
    pub fn append(&mut self, mut turn: ConversationTurn) -> usize {
        if estimate_tokens(&turn.text) > self.budget.max_tokens {
            let room = self.budget.max_tokens * 4;
            let marker = TRUNCATION_MARKER.chars().count();
            turn.text = if room > marker {
                let mut text: String = turn.text.chars().take(room - marker).collect();
                text.push_str(TRUNCATION_MARKER);
                text
            } else {
                // No room for the marker.
                turn.text.chars().take(room).collect()
            };
        }
        self.tokens += estimate_tokens(&turn.text);
        self.turns.push_back(turn);

        let mut evicted = 0;
        while self.turns.len() > self.budget.max_turns || self.tokens > self.budget.max_tokens {
            match self.turns.pop_front() {
                Some(old) => {
                    self.tokens -= estimate_tokens(&old.text);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            debug!(evicted, retained = self.turns.len(), tokens = self.tokens, "memory window trimmed");
        }
        self.evicted += evicted;
        evicted
    }

    /// Every retained turn, oldest first.
    pub fn window(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    /// Retained turns that completed normally; these are what prompts replay.
    pub fn history(&self) -> Vec<&ConversationTurn> {
        self.turns.iter().filter(|t| t.is_complete()).collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Total turns evicted over the window's lifetime.
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    pub fn budget(&self) -> MemoryBudget {
        self.budget
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.tokens = 0;
    }
}

/// One conversation session: a memory window plus lifecycle timestamps.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub memory: MemoryWindow,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, budget: MemoryBudget) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            memory: MemoryWindow::new(budget),
            created_at: now,
            last_active: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_active > ttl
    }
}
