//! In-memory conversation store for multi-turn sessions.
//!
//! The store exclusively owns the turn lists; stages read snapshots and the
//! orchestrator appends exactly one user and one assistant turn atomically on
//! success. Expired conversations are swept lazily on access and by a
//! periodic sweep the server drives. A global capacity bound evicts the
//! least-recently-active conversation when full.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use gauntlet_types::config::ConversationLimits;
use gauntlet_types::Domain;

use crate::estimate_tokens;

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn in a conversation.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub at: Instant,
    /// Domain the assistant answered in, for assistant turns.
    pub domain: Option<Domain>,
    /// End-to-end response time, for assistant turns.
    pub response_time_ms: Option<u64>,
}

struct Conversation {
    turns: Vec<Turn>,
    created_at: Instant,
    last_activity: Instant,
}

impl Conversation {
    fn new(now: Instant) -> Self {
        Self {
            turns: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    fn user_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .count()
    }

    fn expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.last_activity) > ttl
    }
}

/// Read-only view of a conversation handed to stages.
#[derive(Debug, Clone)]
pub struct ConversationSnapshot {
    pub id: String,
    pub turns: Vec<Turn>,
    pub turn_count: usize,
    pub is_new: bool,
}

impl ConversationSnapshot {
    /// The last `n` user turns, oldest first, each truncated to
    /// `max_chars` -- the window the jailbreak classifier sees for
    /// multi-turn detection.
    pub fn recent_user_turns(&self, n: usize, max_chars: usize) -> Vec<String> {
        self.turns
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .rev()
            .take(n)
            .map(|t| t.content.chars().take(max_chars).collect())
            .collect::<Vec<String>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// History for the generator prompt, token-bounded.
    ///
    /// Drops oldest turns pairwise until the estimate fits `max_tokens`,
    /// which keeps user/assistant alternation valid. The current user
    /// message is not part of history; the prompt assembler appends it
    /// separately, so it is always present.
    pub fn bounded_history(&self, max_tokens: usize) -> Vec<&Turn> {
        let mut start = 0;
        loop {
            let window = &self.turns[start..];
            let total: usize = window.iter().map(|t| estimate_tokens(&t.content)).sum();
            if total <= max_tokens || window.is_empty() {
                return window.iter().collect();
            }
            // Drop the oldest user+assistant pair together.
            let step = if window.len() >= 2 && window[0].role == TurnRole::User {
                2
            } else {
                1
            };
            start += step.min(window.len());
        }
    }
}

/// The conversation store.
pub struct ConversationStore {
    limits: ConversationLimits,
    inner: Mutex<HashMap<String, Conversation>>,
}

impl ConversationStore {
    pub fn new(limits: ConversationLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a conversation id to a snapshot, creating a fresh
    /// conversation when the id is absent, unknown, or expired.
    pub async fn get_or_create(&self, id: Option<&str>) -> ConversationSnapshot {
        let now = Instant::now();
        let mut map = self.inner.lock().await;

        if let Some(id) = id {
            let live = match map.get(id) {
                Some(conv) => !conv.expired(now, self.limits.ttl),
                None => false,
            };
            if live {
                let conv = &map[id];
                return ConversationSnapshot {
                    id: id.to_string(),
                    turns: conv.turns.clone(),
                    turn_count: conv.user_turns(),
                    is_new: false,
                };
            }
            // Expired ids are removed here; unknown ids fall through to a
            // fresh conversation rather than resurrecting client-supplied
            // state.
            map.remove(id);
        }

        self.evict_if_full(&mut map, now);
        let fresh_id = Uuid::new_v4().to_string();
        map.insert(fresh_id.clone(), Conversation::new(now));

        ConversationSnapshot {
            id: fresh_id,
            turns: Vec::new(),
            turn_count: 0,
            is_new: true,
        }
    }

    /// Atomically append one user and one assistant turn.
    ///
    /// Both turns land or neither; `last_activity` is bumped and oldest
    /// pairs are evicted until the conversation is back within
    /// `max_turns` user turns.
    pub async fn append_exchange(
        &self,
        id: &str,
        user_content: &str,
        assistant_content: &str,
        domain: Domain,
        response_time_ms: u64,
    ) -> bool {
        let now = Instant::now();
        let mut map = self.inner.lock().await;

        let Some(conv) = map.get_mut(id) else {
            return false;
        };
        if conv.expired(now, self.limits.ttl) {
            map.remove(id);
            return false;
        }

        conv.turns.push(Turn {
            role: TurnRole::User,
            content: user_content.to_string(),
            at: now,
            domain: None,
            response_time_ms: None,
        });
        conv.turns.push(Turn {
            role: TurnRole::Assistant,
            content: assistant_content.to_string(),
            at: now,
            domain: Some(domain),
            response_time_ms: Some(response_time_ms),
        });
        conv.last_activity = now;

        while conv.user_turns() > self.limits.max_turns {
            // Oldest pair first; turns always alternate user/assistant.
            let take = conv.turns.len().min(2);
            conv.turns.drain(..take);
        }

        true
    }

    /// Evict expired conversations. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut map = self.inner.lock().await;
        let before = map.len();
        map.retain(|_, conv| !conv.expired(now, self.limits.ttl));
        before - map.len()
    }

    /// Number of live conversations.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Capacity-bound eviction: drop the least-recently-active conversation
    /// when the store is full. Called with the lock held.
    fn evict_if_full(&self, map: &mut HashMap<String, Conversation>, now: Instant) {
        // Expired entries go first.
        map.retain(|_, conv| !conv.expired(now, self.limits.ttl));

        while map.len() >= self.limits.capacity {
            let oldest = map
                .iter()
                .min_by_key(|(_, conv)| conv.last_activity)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    map.remove(&id);
                }
                None => break,
            }
        }
    }
}
