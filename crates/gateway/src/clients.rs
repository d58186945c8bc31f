use std::collections::HashMap;

use {
    tokio::sync::mpsc,
    tracing::{debug, trace},
};

use manifold_protocol::client::ClientEvent;

/// A user's live front-end connection. Frames are queued to the socket's
/// write loop; dropping the sender ends that loop and closes the socket.
#[derive(Debug)]
pub struct ClientLink {
    /// Distinguishes this connection from a later one for the same user, so
    /// a superseded connection's cleanup can't evict its replacement.
    pub conn_id: String,
    sender: mpsc::UnboundedSender<String>,
}

impl ClientLink {
    pub fn new(conn_id: String, sender: mpsc::UnboundedSender<String>) -> Self {
        Self { conn_id, sender }
    }

    fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

/// user id → live front-end link. Last-connected-wins: registering over an
/// existing entry silently supersedes it. Never persisted.
pub struct ClientRegistry {
    links: HashMap<i64, ClientLink>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            links: HashMap::new(),
        }
    }

    pub fn register(&mut self, user_id: i64, link: ClientLink) {
        if let Some(old) = self.links.insert(user_id, link) {
            debug!(user_id, old_conn = %old.conn_id, "client link replaced");
        }
    }

    /// Remove the user's link, but only if it is still the connection that
    /// asked. Idempotent.
    pub fn unregister(&mut self, user_id: i64, conn_id: &str) {
        if self
            .links
            .get(&user_id)
            .is_some_and(|l| l.conn_id == conn_id)
        {
            self.links.remove(&user_id);
        }
    }

    /// Push an event to the user's front-end. Returns false if no link is
    /// open (the event is simply not delivered in real time).
    pub fn send_to(&self, user_id: i64, event: &ClientEvent) -> bool {
        let Some(link) = self.links.get(&user_id) else {
            trace!(user_id, "no live client link");
            return false;
        };
        match serde_json::to_string(event) {
            Ok(text) => link.send(&text),
            Err(_) => false,
        }
    }

    pub fn is_connected(&self, user_id: i64) -> bool {
        self.links.contains_key(&user_id)
    }

    /// Drop every link (component shutdown). Write loops observe the closed
    /// channel and close their sockets.
    pub fn clear(&mut self) -> usize {
        let count = self.links.len();
        self.links.clear();
        count
    }

    pub fn count(&self) -> usize {
        self.links.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(conn_id: &str) -> (ClientLink, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientLink::new(conn_id.into(), tx), rx)
    }

    #[tokio::test]
    async fn test_send_reaches_registered_link() {
        let mut reg = ClientRegistry::new();
        let (l, mut rx) = link("c1");
        reg.register(5, l);

        assert!(reg.send_to(5, &ClientEvent::Pong));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, r#"{"type":"pong"}"#);
    }

    #[tokio::test]
    async fn test_send_to_absent_user_is_false() {
        let reg = ClientRegistry::new();
        assert!(!reg.send_to(9, &ClientEvent::Pong));
    }

    #[tokio::test]
    async fn test_last_connected_wins() {
        let mut reg = ClientRegistry::new();
        let (a, mut rx_a) = link("a");
        let (b, mut rx_b) = link("b");
        reg.register(5, a);
        reg.register(5, b);

        assert!(reg.send_to(5, &ClientEvent::Pong));
        // Old link's channel is closed, new one got the frame.
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_replacement() {
        let mut reg = ClientRegistry::new();
        let (a, _rx_a) = link("a");
        let (b, _rx_b) = link("b");
        reg.register(5, a);
        reg.register(5, b);

        // The superseded connection cleans up after itself; "b" must survive.
        reg.unregister(5, "a");
        assert!(reg.is_connected(5));
        reg.unregister(5, "b");
        assert!(!reg.is_connected(5));
        // Idempotent.
        reg.unregister(5, "b");
    }

    #[tokio::test]
    async fn test_clear_drops_all_links() {
        let mut reg = ClientRegistry::new();
        let (a, mut rx_a) = link("a");
        let (b, mut rx_b) = link("b");
        reg.register(1, a);
        reg.register(2, b);

        assert_eq!(reg.clear(), 2);
        assert_eq!(reg.count(), 0);
        assert!(rx_a.recv().await.is_none());
        assert!(rx_b.recv().await.is_none());
    }
}
