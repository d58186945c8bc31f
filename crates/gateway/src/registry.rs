use std::collections::{HashMap, HashSet};

use manifold_protocol::ChannelKind;

/// One logical conversation thread. The registry owns the canonical
/// in-memory copy; the durable store owns the persistent one.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: i64,
    pub channel: ChannelKind,
    pub active: bool,
}

/// Dual-index session registry: session id → context and user id → set of
/// session ids. Every mutation updates both indices under one `&mut self`
/// call, so no caller can observe one index without the other.
pub struct SessionRegistry {
    by_id: HashMap<String, SessionContext>,
    /// Reverse index for per-user enumeration; entries are removed when the
    /// set empties.
    by_user: HashMap<i64, HashSet<String>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_user: HashMap::new(),
        }
    }

    pub fn insert(&mut self, ctx: SessionContext) {
        self.by_user
            .entry(ctx.user_id)
            .or_default()
            .insert(ctx.session_id.clone());
        self.by_id.insert(ctx.session_id.clone(), ctx);
    }

    /// Remove a session from both indices. Unknown ids return `None`.
    pub fn remove(&mut self, session_id: &str) -> Option<SessionContext> {
        let ctx = self.by_id.remove(session_id)?;
        if let Some(set) = self.by_user.get_mut(&ctx.user_id) {
            set.remove(session_id);
            if set.is_empty() {
                self.by_user.remove(&ctx.user_id);
            }
        }
        Some(ctx)
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionContext> {
        self.by_id.get(session_id)
    }

    /// True if the session exists and belongs to `user_id`.
    pub fn is_owned_by(&self, session_id: &str, user_id: i64) -> bool {
        self.by_id
            .get(session_id)
            .is_some_and(|ctx| ctx.user_id == user_id)
    }

    pub fn sessions_for_user(&self, user_id: i64) -> Vec<SessionContext> {
        self.by_user
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.by_id.len()
    }

    /// Number of users holding at least one session.
    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }
}
