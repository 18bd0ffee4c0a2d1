use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::config::SessionSettings;
use crate::registry::ConnectionRegistry;
use crate::store::{HistoryStore, MemoryStore, UserDirectory};

/// Shared application state
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub verifier: Arc<dyn TokenVerifier>,
    pub users: Arc<dyn UserDirectory>,
    pub history: Arc<dyn HistoryStore>,
    pub settings: SessionSettings,
}

impl AppState {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        users: Arc<dyn UserDirectory>,
        history: Arc<dyn HistoryStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            verifier,
            users,
            history,
            settings,
        }
    }

    /// State backed by a single in-memory store for both users and history
    pub fn in_memory(
        verifier: Arc<dyn TokenVerifier>,
        store: Arc<MemoryStore>,
        settings: SessionSettings,
    ) -> Self {
        Self::new(verifier, store.clone(), store, settings)
    }
}
