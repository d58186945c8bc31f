//! Correlation table for asynchronous pairing-code exchanges.
//!
//! A caller asks for a pairing code, the gateway answers some time later
//! with a `QR_CODE` frame carrying the same `(user, channel)` key. Each
//! entry resolves exactly once: the oneshot sender is consumed on send, and
//! every resolution path removes the entry from the map first, so a second
//! resolution is unrepresentable.

use std::collections::HashMap;

use {
    thiserror::Error,
    tokio::{sync::oneshot, task::JoinHandle},
    tracing::debug,
};

use manifold_protocol::ChannelKind;

/// Correlation key: one pending request per user per channel.
pub type PairingKey = (i64, ChannelKind);

/// A pairing code and its absolute expiry in unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCode {
    pub code: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    #[error("superseded by a newer pairing request")]
    Superseded,
    #[error("pairing request timed out")]
    TimedOut,
    #[error("gateway connection shutting down")]
    Shutdown,
    #[error("gateway error: {0}")]
    Gateway(String),
}

/// Handle returned to the caller; resolves with the code or a typed error.
pub type PairingTicket = oneshot::Receiver<Result<PairingCode, PairingError>>;

struct PendingEntry {
    resolver: oneshot::Sender<Result<PairingCode, PairingError>>,
    timeout: JoinHandle<()>,
}

impl PendingEntry {
    fn resolve(self, outcome: Result<PairingCode, PairingError>) {
        self.timeout.abort();
        // The caller may have dropped its ticket; that's fine.
        let _ = self.resolver.send(outcome);
    }
}

/// Outstanding pairing requests, at most one per key.
pub struct PendingPairings {
    entries: HashMap<PairingKey, PendingEntry>,
}

impl Default for PendingPairings {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingPairings {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Install a new entry for `key`, superseding (and failing) any entry
    /// already pending under the same key. `timeout` is the already-spawned
    /// expiry task for the new entry; it is aborted if the entry resolves
    /// some other way first.
    pub fn install(&mut self, key: PairingKey, timeout: JoinHandle<()>) -> PairingTicket {
        if let Some(prev) = self.entries.remove(&key) {
            debug!(user_id = key.0, channel = %key.1, "superseding pending pairing request");
            prev.resolve(Err(PairingError::Superseded));
        }
        let (tx, rx) = oneshot::channel();
        self.entries.insert(key, PendingEntry {
            resolver: tx,
            timeout,
        });
        rx
    }

    /// Fulfil the entry for `key`. Returns false if none was pending.
    pub fn fulfill(&mut self, key: &PairingKey, code: PairingCode) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                entry.resolve(Ok(code));
                true
            },
            None => false,
        }
    }

    /// Fail the entry for `key`. Returns false if none was pending.
    pub fn fail(&mut self, key: &PairingKey, err: PairingError) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                entry.resolve(Err(err));
                true
            },
            None => false,
        }
    }

    /// Fail every pending entry (component shutdown). Returns the count.
    pub fn fail_all(&mut self, err: PairingError) -> usize {
        let drained: Vec<_> = self.entries.drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            entry.resolve(Err(err.clone()));
        }
        count
    }

    pub fn contains(&self, key: &PairingKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_timeout() -> JoinHandle<()> {
        tokio::spawn(async {})
    }

    #[tokio::test]
    async fn test_fulfill_resolves_ticket() {
        let mut table = PendingPairings::new();
        let key = (7, ChannelKind::Whatsapp);
        let ticket = table.install(key, noop_timeout());

        let code = PairingCode {
            code: "ABC123".into(),
            expires_at: 1_000,
        };
        assert!(table.fulfill(&key, code.clone()));
        assert!(table.is_empty());

        assert_eq!(ticket.await, Ok(Ok(code)));
    }

    #[tokio::test]
    async fn test_supersession_fails_first_keeps_second() {
        let mut table = PendingPairings::new();
        let key = (7, ChannelKind::Whatsapp);
        let first = table.install(key, noop_timeout());
        let second = table.install(key, noop_timeout());

        assert_eq!(table.len(), 1);
        assert_eq!(first.await, Ok(Err(PairingError::Superseded)));

        let code = PairingCode {
            code: "XYZ".into(),
            expires_at: 2_000,
        };
        assert!(table.fulfill(&key, code.clone()));
        assert_eq!(second.await, Ok(Ok(code)));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let mut table = PendingPairings::new();
        let wa = (7, ChannelKind::Whatsapp);
        let tg = (7, ChannelKind::Telegram);
        let t1 = table.install(wa, noop_timeout());
        let _t2 = table.install(tg, noop_timeout());

        assert_eq!(table.len(), 2);
        assert!(table.fail(&wa, PairingError::TimedOut));
        assert!(table.contains(&tg));
        assert_eq!(t1.await, Ok(Err(PairingError::TimedOut)));
    }

    #[tokio::test]
    async fn test_fulfill_unknown_key_is_false() {
        let mut table = PendingPairings::new();
        assert!(!table.fulfill(&(1, ChannelKind::Slack), PairingCode {
            code: "Q".into(),
            expires_at: 0,
        }));
    }

    #[tokio::test]
    async fn test_fail_all_rejects_everything_once() {
        let mut table = PendingPairings::new();
        let t1 = table.install((1, ChannelKind::Whatsapp), noop_timeout());
        let t2 = table.install((2, ChannelKind::Telegram), noop_timeout());

        assert_eq!(table.fail_all(PairingError::Shutdown), 2);
        assert!(table.is_empty());
        assert_eq!(t1.await, Ok(Err(PairingError::Shutdown)));
        assert_eq!(t2.await, Ok(Err(PairingError::Shutdown)));
    }
}
