//! Current-identity state.
//!
//! There is one [`SessionStore`] per process. The guard and the auth client
//! write it; everything else receives a [`SessionView`], which can only take
//! snapshots. Writes are plain last-write-wins swaps: two requests failing
//! at once both clear the session, which is harmless.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};

/// Identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque user identifier.
    pub user_id: String,
    /// Roles granted to the user.
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, roles: impl IntoIterator<Item = String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Owner of the process-wide session value.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    current: Arc<ArcSwapOption<Session>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<Session>> {
        self.current.load_full()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn set(&self, session: Session) {
        tracing::debug!(user_id = %session.user_id, "Session established");
        self.current.store(Some(Arc::new(session)));
    }

    /// Clear the session. Returns true if one was present.
    pub fn clear(&self) -> bool {
        let previous = self.current.swap(None);
        if let Some(session) = &previous {
            tracing::debug!(user_id = %session.user_id, "Session cleared");
        }
        previous.is_some()
    }

    /// Read-only handle for consumers of the session.
    pub fn view(&self) -> SessionView {
        SessionView {
            current: self.current.clone(),
        }
    }
}

/// Read-only access to the session.
#[derive(Debug, Clone)]
pub struct SessionView {
    current: Arc<ArcSwapOption<Session>>,
}

impl SessionView {
    pub fn get(&self) -> Option<Arc<Session>> {
        self.current.load_full()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.load().is_some()
    }
}
