use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::{context::SharedContext, error::Result};

/// Trait for persisting shared contexts across suspend/resume cycles and turns
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<SharedContext>>;
    async fn save(&self, session_id: &str, context: &SharedContext) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// In-memory implementation of SessionStore
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, SharedContext>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SharedContext>> {
        Ok(self.sessions.get(session_id).map(|entry| entry.clone()))
    }

    async fn save(&self, session_id: &str, context: &SharedContext) -> Result<()> {
        self.sessions.insert(session_id.to_string(), context.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.remove(session_id);
        Ok(())
    }
}
