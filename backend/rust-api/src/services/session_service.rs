use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::metrics::{SESSIONS_ACTIVE, SESSIONS_TOTAL};
use crate::models::session::{SessionError, TutorSession};

pub type SharedSession = Arc<Mutex<TutorSession>>;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

struct SessionEntry {
    session: SharedSession,
    last_seen: Instant,
}

impl SessionEntry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) >= ttl
    }
}

/// In-memory registry of live sessions. Nothing here is persisted; a
/// restart drops every conversation.
///
/// A session idle for longer than `ttl` counts as gone: `get` reports it
/// missing and the sweeper drops it.
#[derive(Clone)]
pub struct SessionService {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    ttl: Duration,
}

impl Default for SessionService {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create(&self, learner_id: &str) -> (String, SharedSession) {
        let session = TutorSession::new(learner_id);
        let session_id = session.id().to_string();
        let shared = Arc::new(Mutex::new(session));

        self.sessions.write().await.insert(
            session_id.clone(),
            SessionEntry {
                session: shared.clone(),
                last_seen: Instant::now(),
            },
        );

        SESSIONS_TOTAL.with_label_values(&["created"]).inc();
        SESSIONS_ACTIVE.inc();
        tracing::info!("Session created: {} for learner: {}", session_id, learner_id);

        (session_id, shared)
    }

    /// Looks a session up and refreshes its idle timer.
    pub async fn get(&self, session_id: &str) -> Result<SharedSession, SessionError> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        let expired = match sessions.get_mut(session_id) {
            Some(entry) if !entry.is_expired(self.ttl, now) => {
                entry.last_seen = now;
                return Ok(entry.session.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            sessions.remove(session_id);
            record_expired(1);
            tracing::info!("Session expired on access: {}", session_id);
        }
        Err(SessionError::NotFound(session_id.to_string()))
    }

    pub async fn remove(&self, session_id: &str) -> Result<(), SessionError> {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(_) => {
                SESSIONS_TOTAL.with_label_values(&["ended"]).inc();
                SESSIONS_ACTIVE.dec();
                tracing::info!("Session ended: {}", session_id);
                Ok(())
            }
            None => Err(SessionError::NotFound(session_id.to_string())),
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops every session idle for longer than the TTL. Returns how many went.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.is_expired(self.ttl, now));
        let purged = before - sessions.len();

        if purged > 0 {
            record_expired(purged);
            tracing::info!("Purged {} expired sessions", purged);
        }
        purged
    }

    /// Periodically purges expired sessions for as long as the runtime lives.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                service.purge_expired().await;
            }
        })
    }
}

fn record_expired(count: usize) {
    SESSIONS_TOTAL
        .with_label_values(&["expired"])
        .inc_by(count as u64);
    SESSIONS_ACTIVE.sub(count as i64);
}
