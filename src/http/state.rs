use crate::config::Config;
use crate::session::{SessionState, VoiceSession};
use crate::transcription::SpeechConnector;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Finished sessions kept around for their transcripts
pub const MAX_FINISHED_SESSIONS: usize = 64;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Voice sessions (session_id → session), kept after they stop so the
    /// transcript stays readable
    pub sessions: Arc<RwLock<HashMap<String, Arc<VoiceSession>>>>,

    /// Loaded configuration
    pub config: Arc<Config>,

    /// Opens dictation connections for new sessions
    pub connector: Arc<dyn SpeechConnector>,
}

/// A session that is running or has been reserved but not started yet
fn is_occupied(session: &VoiceSession) -> bool {
    session.is_active() || session.state() == SessionState::Idle
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let connector = config.connector();
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: Config, connector: Arc<dyn SpeechConnector>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            connector,
        }
    }

    /// Claim the session's ID before it starts
    ///
    /// Returns false when another session under that ID is starting or
    /// running. A finished session under the same ID is replaced.
    pub async fn reserve(&self, session: &Arc<VoiceSession>) -> bool {
        let mut sessions = self.sessions.write().await;
        let id = session.session_id();

        if sessions.get(id).is_some_and(|existing| is_occupied(existing)) {
            return false;
        }

        sessions.insert(id.to_string(), Arc::clone(session));
        prune_finished(&mut sessions, MAX_FINISHED_SESSIONS);
        true
    }

    /// Drop a reservation whose start failed, unless it was already replaced
    pub async fn unreserve(&self, session: &Arc<VoiceSession>) {
        let mut sessions = self.sessions.write().await;
        let id = session.session_id();

        if sessions
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(id);
        }
    }
}

/// Evict the oldest finished sessions beyond `keep`
fn prune_finished(sessions: &mut HashMap<String, Arc<VoiceSession>>, keep: usize) {
    let mut finished: Vec<_> = sessions
        .iter()
        .filter(|(_, session)| session.state() == SessionState::Closed)
        .map(|(id, session)| (session.stats().started_at, id.clone()))
        .collect();

    if finished.len() <= keep {
        return;
    }

    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        debug!("Evicting finished voice session {}", id);
        sessions.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionConfig, TracingListener};
    use crate::audio::{CaptureConstraints, PushBackend};
    use crate::Credentials;

    async fn closed_session(id: &str) -> Arc<VoiceSession> {
        // No credentials: the start is rejected and the session ends Closed
        let session = Arc::new(VoiceSession::new(
            SessionConfig::default().with_session_id(id),
            Config::default().connector(),
            Arc::new(TracingListener::new(id)),
        ));
        let (backend, _handle) = PushBackend::new(CaptureConstraints::default());
        assert!(session.start(Box::new(backend)).await.is_err());
        session
    }

    fn idle_session(id: &str) -> Arc<VoiceSession> {
        Arc::new(VoiceSession::new(
            SessionConfig {
                credentials: Credentials::new("a", "b", "c"),
                ..SessionConfig::default().with_session_id(id)
            },
            Config::default().connector(),
            Arc::new(TracingListener::new(id)),
        ))
    }

    #[tokio::test]
    async fn test_reserved_id_cannot_be_taken_twice() {
        let state = AppState::new(Config::default());

        let first = idle_session("trip");
        assert!(state.reserve(&first).await);
        assert!(!state.reserve(&idle_session("trip")).await);

        state.unreserve(&first).await;
        assert!(state.sessions.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreserve_keeps_a_replacement() {
        let state = AppState::new(Config::default());

        let old = closed_session("trip").await;
        assert!(state.reserve(&old).await);
        let new = idle_session("trip");
        assert!(state.reserve(&new).await);

        state.unreserve(&old).await;
        let sessions = state.sessions.read().await;
        assert!(Arc::ptr_eq(&sessions["trip"], &new));
    }

    #[tokio::test]
    async fn test_prune_keeps_running_sessions() {
        let mut sessions = HashMap::new();
        for i in 0..5 {
            let id = format!("done-{}", i);
            sessions.insert(id.clone(), closed_session(&id).await);
        }
        sessions.insert("waiting".to_string(), idle_session("waiting"));

        prune_finished(&mut sessions, 2);

        assert_eq!(sessions.len(), 3);
        assert!(sessions.contains_key("waiting"));
    }
}
