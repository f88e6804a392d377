//! In-memory conversation history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::answer::StructuredAnswer;

/// One question and the answer given to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// The question as asked.
    pub question: String,
    /// The answer returned.
    pub answer: StructuredAnswer,
    /// When the answer was recorded.
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SessionState {
    turns: VecDeque<Turn>,
    bank: Option<String>,
}

/// Bounded per-session history plus the bank a session last asked about.
///
/// Each session's history is a ring buffer of at most `capacity` turns; the
/// oldest turn is evicted first. Sessions are created on first use and live
/// until cleared. Every session has its own lock, so sessions never contend
/// with each other.
#[derive(Debug)]
pub struct SessionStore {
    capacity: usize,
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SessionStore {
    /// Create a store keeping at most `capacity` turns per session.
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), sessions: RwLock::new(HashMap::new()) }
    }

    async fn session(&self, session_id: &str) -> Arc<Mutex<SessionState>> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(session_id.to_string()).or_default())
    }

    async fn existing(&self, session_id: &str) -> Option<Arc<Mutex<SessionState>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Record a completed turn, evicting the oldest when full.
    pub async fn append(&self, session_id: &str, question: &str, answer: StructuredAnswer) {
        let session = self.session(session_id).await;
        let mut state = session.lock().await;
        while state.turns.len() >= self.capacity {
            state.turns.pop_front();
        }
        state.turns.push_back(Turn {
            question: question.to_string(),
            answer,
            answered_at: Utc::now(),
        });
        debug!(session_id, turns = state.turns.len(), "appended turn");
    }

    /// The last `limit` turns of a session, oldest first.
    pub async fn recent(&self, session_id: &str, limit: usize) -> Vec<Turn> {
        let Some(session) = self.existing(session_id).await else { return Vec::new() };
        let state = session.lock().await;
        let skip = state.turns.len().saturating_sub(limit);
        state.turns.iter().skip(skip).cloned().collect()
    }

    /// The bank a session last asked about.
    pub async fn bank(&self, session_id: &str) -> Option<String> {
        let session = self.existing(session_id).await?;
        let state = session.lock().await;
        state.bank.clone()
    }

    /// Remember the bank a session is asking about.
    pub async fn set_bank(&self, session_id: &str, bank: Option<String>) {
        let session = self.session(session_id).await;
        session.lock().await.bank = bank;
    }

    /// Forget a session. Returns `true` if it existed.
    pub async fn clear(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// Forget every session.
    pub async fn clear_all(&self) {
        self.sessions.write().await.clear();
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` if no session exists.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(summary: &str) -> StructuredAnswer {
        StructuredAnswer { summary: summary.into(), ..StructuredAnswer::no_policy_found() }
    }

    #[tokio::test]
    async fn append_then_recent_returns_latest_turn() {
        let store = SessionStore::new(20);
        store.append("s1", "first?", answer("one")).await;
        store.append("s1", "second?", answer("two")).await;

        let recent = store.recent("s1", 1).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].question, "second?");
        assert_eq!(recent[0].answer.summary, "two");

        let all = store.recent("s1", 10).await;
        assert_eq!(all.iter().map(|t| t.question.as_str()).collect::<Vec<_>>(), ["first?", "second?"]);
    }

    #[tokio::test]
    async fn oldest_turn_is_evicted_at_capacity() {
        let store = SessionStore::new(3);
        for i in 0..5 {
            store.append("s", &format!("q{i}"), answer("a")).await;
        }
        let turns = store.recent("s", 10).await;
        assert_eq!(turns.iter().map(|t| t.question.as_str()).collect::<Vec<_>>(), ["q2", "q3", "q4"]);
    }

    #[tokio::test]
    async fn sessions_are_isolated_and_clearable() {
        let store = SessionStore::new(5);
        store.append("a", "q", answer("x")).await;
        store.set_bank("a", Some("sbi".into())).await;

        assert!(store.recent("b", 5).await.is_empty());
        assert_eq!(store.bank("b").await, None);
        assert_eq!(store.bank("a").await.as_deref(), Some("sbi"));

        assert_eq!(store.len().await, 1);
        assert!(store.clear("a").await);
        assert!(!store.clear("a").await);
        assert!(store.recent("a", 5).await.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_kept() {
        let store = Arc::new(SessionStore::new(100));
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.append("shared", &format!("q{i}"), answer("a")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.recent("shared", 100).await.len(), 32);
    }
}
