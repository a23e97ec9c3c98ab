use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

/// Bookkeeping for one live bridge session.
#[derive(Debug, Clone)]
pub struct BridgeSession {
    pub tenant_id: String,
    pub started_at: Instant,
}

/// Registry of live bridge sessions, keyed by session id.
///
/// Injected into the bridge handler rather than living as module state so
/// tests can run isolated registries. Every connection path must remove its
/// entry exactly once — a slow leak under churn is the principal risk here,
/// so `remove` reports whether it actually found the entry.
#[derive(Clone)]
pub struct BridgeRegistry {
    inner: Arc<Mutex<HashMap<String, BridgeSession>>>,
}

impl Default for BridgeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a session when provisioning starts.
    pub async fn insert(&self, session_id: String, tenant_id: String) {
        tracing::info!(session_id = %session_id, tenant_id = %tenant_id, "Bridge session registered");
        self.inner.lock().await.insert(
            session_id,
            BridgeSession {
                tenant_id,
                started_at: Instant::now(),
            },
        );
    }

    /// Remove a session. Returns whether the entry existed.
    pub async fn remove(&self, session_id: &str) -> bool {
        let removed = self.inner.lock().await.remove(session_id);
        if let Some(ref session) = removed {
            tracing::info!(
                session_id = %session_id,
                duration_secs = session.started_at.elapsed().as_secs(),
                "Bridge session removed"
            );
        }
        removed.is_some()
    }

    pub async fn get(&self, session_id: &str) -> Option<BridgeSession> {
        self.inner.lock().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
