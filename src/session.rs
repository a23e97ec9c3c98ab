use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Who said a turn in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Caller,
    Agent,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Ephemeral state for one active call, keyed by the provider's call id.
///
/// Owned by whichever handler created it; all turn processing for a call
/// happens under this session's lock so turns are strictly serialized.
#[derive(Debug)]
pub struct CallSession {
    pub tenant_id: String,
    pub history: Vec<Turn>,
    pub reprompts: u32,
    last_used: Instant,
}

impl CallSession {
    fn new(tenant_id: String) -> Self {
        Self {
            tenant_id,
            history: Vec::new(),
            reprompts: 0,
            last_used: Instant::now(),
        }
    }

    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.history.push(Turn {
            speaker,
            text: text.into(),
        });
        self.last_used = Instant::now();
    }

    /// The last `max_turns` turns, oldest first.
    pub fn recent_history(&self, max_turns: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(max_turns);
        &self.history[start..]
    }
}

/// Registry of active call sessions.
///
/// Lookup hands out an `Arc<Mutex<CallSession>>`; callers hold that lock for
/// the duration of a turn, which serializes racing webhook deliveries for
/// the same call id without blocking other calls.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<CallSession>>>>>,
    timeout: Duration,
}

impl SessionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Get the session for a call, creating it transparently if absent.
    ///
    /// A gather event arriving before any lifecycle event is not an error —
    /// the provider may retry webhooks out of order.
    pub async fn get_or_create(
        &self,
        call_id: &str,
        tenant_id: &str,
    ) -> Arc<Mutex<CallSession>> {
        let mut sessions = self.inner.lock().await;

        // Drop sessions from abandoned calls that never sent a hangup
        let timeout = self.timeout;
        sessions.retain(|_, s| match s.try_lock() {
            Ok(guard) => guard.last_used.elapsed() < timeout,
            // In use right now, so clearly not expired
            Err(_) => true,
        });

        Arc::clone(
            sessions
                .entry(call_id.to_string())
                .or_insert_with(|| {
                    tracing::info!(call_id, tenant_id, "Session created");
                    Arc::new(Mutex::new(CallSession::new(tenant_id.to_string())))
                }),
        )
    }

    /// Look up an existing session without creating one.
    pub async fn get(&self, call_id: &str) -> Option<Arc<Mutex<CallSession>>> {
        self.inner.lock().await.get(call_id).map(Arc::clone)
    }

    /// Release a call's session. No-op when none exists.
    pub async fn end(&self, call_id: &str) {
        if self.inner.lock().await.remove(call_id).is_some() {
            tracing::info!(call_id, "Session released");
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_session_transparently() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        assert_eq!(registry.len().await, 0);

        let session = registry.get_or_create("abc123", "acme").await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(session.lock().await.tenant_id, "acme");
    }

    #[tokio::test]
    async fn end_releases_and_is_idempotent() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        registry.get_or_create("abc123", "acme").await;

        registry.end("abc123").await;
        assert_eq!(registry.len().await, 0);
        // Hangup for an unknown call is a no-op
        registry.end("abc123").await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn history_is_bounded_by_recent_window() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let session = registry.get_or_create("abc123", "acme").await;

        let mut guard = session.lock().await;
        for i in 0..20 {
            guard.push(Speaker::Caller, format!("utterance {i}"));
        }
        let recent = guard.recent_history(6);
        assert_eq!(recent.len(), 6);
        assert_eq!(recent[0].text, "utterance 14");
        assert_eq!(recent[5].text, "utterance 19");
    }

    #[tokio::test]
    async fn expired_sessions_are_swept_on_access() {
        let registry = SessionRegistry::new(Duration::from_millis(0));
        registry.get_or_create("old", "acme").await;

        // Zero timeout: the old entry expires before the next access
        registry.get_or_create("new", "acme").await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn turns_serialize_under_session_lock() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let session = registry.get_or_create("abc123", "acme").await;

        // Simulate two racing webhook deliveries: each task appends the
        // caller turn and its reply under one lock acquisition.
        let mut handles = Vec::new();
        for i in 0..2 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                let mut guard = session.lock().await;
                guard.push(Speaker::Caller, format!("question {i}"));
                tokio::task::yield_now().await;
                guard.push(Speaker::Agent, format!("answer {i}"));
            }));
        }
        for handle in handles {
            handle.await.expect("task should not panic");
        }

        // Replies must directly follow their own question, never interleave
        let guard = session.lock().await;
        assert_eq!(guard.history.len(), 4);
        for pair in guard.history.chunks(2) {
            let q = pair[0].text.strip_prefix("question ").unwrap();
            let a = pair[1].text.strip_prefix("answer ").unwrap();
            assert_eq!(q, a);
        }
    }
}
