use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use super::Session;

/// All live sessions, keyed by connection id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        tracing::info!(
            connection_id = %session.id(),
            device = %session.identity().uid,
            "Session registered"
        );
        self.sessions.insert(session.id(), session);
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| {
            tracing::info!(connection_id = %id, "Session unregistered");
            session
        })
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    /// Sessions whose transport is gone but which never reached `Closing`
    /// through the normal event path.
    pub async fn find_half_closed(&self) -> Vec<Arc<Session>> {
        let mut half_closed = Vec::new();
        for session in self.all() {
            if session.is_half_closed().await {
                half_closed.push(session);
            }
        }
        half_closed
    }
}
