//! The single upstream link to the external gateway process.
//!
//! All outbound gateway traffic is serialized through this link. Frames are
//! best-effort: while the link is down they are dropped with a warning, and
//! nothing is buffered or retried across a reconnect. The transport is an
//! injectable seam so tests run against an in-process mock instead of a
//! second maintained service implementation.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    tokio::{
        sync::{Mutex, RwLock, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use manifold_config::GatewayConfig;
use manifold_protocol::upstream::{InboundFrame, OutboundFrame, parse_inbound};

// ── Transport seam ───────────────────────────────────────────────────────────

/// A live connection produced by a transport: a text sink feeding the remote
/// side, and a text stream of what it sends back. The connection is over
/// when the stream ends.
pub struct UpstreamConn {
    pub tx: mpsc::UnboundedSender<String>,
    pub rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn connect(&self) -> Result<UpstreamConn>;
}

/// Production transport: dials the gateway over WebSocket and pumps text
/// frames both ways.
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl UpstreamTransport for WsTransport {
    async fn connect(&self) -> Result<UpstreamConn> {
        let (ws, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .with_context(|| format!("failed to connect to gateway at {}", self.url))?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        // Write pump: drains queued frames into the socket.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if sink
                    .send(tokio_tungstenite::tungstenite::Message::Text(text.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Read pump: forwards text frames; ends (dropping in_tx) on close or
        // error, which is how the link observes the connection dying.
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                        if in_tx.send(text.to_string()).is_err() {
                            break;
                        }
                    },
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    Ok(_) => {},
                }
            }
        });

        Ok(UpstreamConn { tx: out_tx, rx: in_rx })
    }
}

// ── Link policy ──────────────────────────────────────────────────────────────

/// Timing knobs for the upstream link.
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    pub heartbeat: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max_attempts: u32,
}

impl From<&GatewayConfig> for LinkPolicy {
    fn from(cfg: &GatewayConfig) -> Self {
        Self {
            heartbeat: Duration::from_secs(cfg.heartbeat_secs),
            reconnect_base: Duration::from_secs(cfg.reconnect_base_secs),
            reconnect_max_attempts: cfg.reconnect_max_attempts,
        }
    }
}

// ── Gateway link ─────────────────────────────────────────────────────────────

/// Owns the one upstream connection: connect, heartbeat, linear-backoff
/// reconnect, best-effort send. Inbound frames are forwarded to the
/// multiplexer's event channel.
pub struct GatewayLink {
    transport: Arc<dyn UpstreamTransport>,
    policy: LinkPolicy,
    /// Outbound sender of the currently-open connection, if any. This is the
    /// only state other components read; they treat it via `send` only.
    outbound: RwLock<Option<mpsc::UnboundedSender<String>>>,
    attempts: AtomicU32,
    closing: AtomicBool,
    events: mpsc::UnboundedSender<InboundFrame>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl GatewayLink {
    pub fn new(
        transport: Arc<dyn UpstreamTransport>,
        policy: LinkPolicy,
        events: mpsc::UnboundedSender<InboundFrame>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            policy,
            outbound: RwLock::new(None),
            attempts: AtomicU32::new(0),
            closing: AtomicBool::new(false),
            events,
            heartbeat: Mutex::new(None),
        })
    }

    /// Establish the upstream link. A failure here is the bootstrapper's to
    /// report; reconnection is still scheduled in the background. Failures
    /// after a successful open never surface to callers — they only drive
    /// reconnection.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        match self.transport.connect().await {
            Ok(conn) => {
                self.install(conn).await;
                Ok(())
            },
            Err(e) => {
                self.schedule_reconnect();
                Err(e)
            },
        }
    }

    async fn install(self: &Arc<Self>, conn: UpstreamConn) {
        self.attempts.store(0, Ordering::Relaxed);
        *self.outbound.write().await = Some(conn.tx);
        self.start_heartbeat().await;

        let link = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = conn.rx;
            while let Some(text) = rx.recv().await {
                match parse_inbound(&text) {
                    Some(frame) => {
                        if link.events.send(frame).is_err() {
                            break;
                        }
                    },
                    None => debug!(raw = %text, "ignoring unknown gateway frame"),
                }
            }
            link.on_closed().await;
        });

        info!("gateway link established");
    }

    async fn on_closed(self: &Arc<Self>) {
        self.stop_heartbeat().await;
        *self.outbound.write().await = None;
        if self.closing.load(Ordering::Relaxed) {
            return;
        }
        warn!("gateway link closed");
        self.schedule_reconnect();
    }

    /// Schedule the next reconnect attempt with linear backoff
    /// (base × attempt). After the maximum number of attempts the link stays
    /// down until the process restarts; gateway-dependent operations keep
    /// failing until an operator intervenes.
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.closing.load(Ordering::Relaxed) {
            return;
        }
        let attempt = self.attempts.load(Ordering::Relaxed) + 1;
        if attempt > self.policy.reconnect_max_attempts {
            warn!(
                max = self.policy.reconnect_max_attempts,
                "gateway reconnect attempts exhausted, staying down until restart"
            );
            return;
        }
        self.attempts.store(attempt, Ordering::Relaxed);
        let delay = self.policy.reconnect_base * attempt;
        info!(attempt, delay_secs = delay.as_secs(), "scheduling gateway reconnect");

        let link = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if link.closing.load(Ordering::Relaxed) {
                return;
            }
            match link.transport.connect().await {
                Ok(conn) => link.install(conn).await,
                Err(e) => {
                    warn!(attempt, error = %e, "gateway reconnect failed");
                    link.schedule_reconnect();
                },
            }
        });
    }

    /// Transmit a frame if the link is open. Otherwise the frame is dropped
    /// and a warning is the only observable effect — callers must not assume
    /// delivery.
    pub async fn send(&self, frame: &OutboundFrame) {
        let guard = self.outbound.read().await;
        let Some(tx) = guard.as_ref() else {
            warn!("gateway link down, dropping outbound frame");
            return;
        };
        match serde_json::to_string(frame) {
            Ok(text) => {
                if tx.send(text).is_err() {
                    warn!("gateway link closing, dropped outbound frame");
                }
            },
            Err(e) => warn!(error = %e, "failed to serialize outbound frame"),
        }
    }

    pub async fn is_open(&self) -> bool {
        self.outbound.read().await.is_some()
    }

    /// Stop the heartbeat and inhibit any further reconnection, leaving the
    /// socket itself to `close`. First stage of an orderly shutdown.
    pub async fn quiesce(&self) {
        self.closing.store(true, Ordering::Relaxed);
        self.stop_heartbeat().await;
    }

    /// Close the link for good: quiesce, then drop the outbound side (which
    /// ends the write pump and closes the socket).
    pub async fn close(&self) {
        self.quiesce().await;
        *self.outbound.write().await = None;
    }

    async fn start_heartbeat(self: &Arc<Self>) {
        self.stop_heartbeat().await;
        let link = Arc::clone(self);
        let interval = self.policy.heartbeat;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick is not a heartbeat.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                link.send(&OutboundFrame::Ping).await;
            }
        });
        *self.heartbeat.lock().await = Some(handle);
    }

    async fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
    }
}

// ── Test transport ───────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{
        Arc,
        Mutex as StdMutex,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    /// In-process transport standing in for the external gateway. Captures
    /// everything the link sends and lets tests inject inbound frames or
    /// drop the connection.
    pub struct MockTransport {
        sent: Arc<StdMutex<Vec<String>>>,
        inbound: Arc<StdMutex<Option<mpsc::UnboundedSender<String>>>>,
        connects: AtomicU32,
        /// Number of upcoming connect calls that should fail.
        fail_next: AtomicU32,
    }

    impl MockTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Arc::new(StdMutex::new(Vec::new())),
                inbound: Arc::new(StdMutex::new(None)),
                connects: AtomicU32::new(0),
                fail_next: AtomicU32::new(0),
            })
        }

        pub fn fail_next_connects(&self, n: u32) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        pub fn connect_count(&self) -> u32 {
            self.connects.load(Ordering::SeqCst)
        }

        /// Frames the link has sent upstream, in order.
        pub fn sent_frames(&self) -> Vec<String> {
            self.sent.lock().map(|v| v.clone()).unwrap_or_default()
        }

        /// Inject a frame as if the gateway sent it.
        pub fn push(&self, text: &str) {
            if let Ok(guard) = self.inbound.lock()
                && let Some(tx) = guard.as_ref()
            {
                let _ = tx.send(text.to_string());
            }
        }

        /// Sever the current connection, as if the gateway dropped it.
        pub fn drop_link(&self) {
            if let Ok(mut guard) = self.inbound.lock() {
                guard.take();
            }
        }
    }

    #[async_trait]
    impl UpstreamTransport for MockTransport {
        async fn connect(&self) -> Result<UpstreamConn> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_next.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("mock gateway refused connection");
            }

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
            if let Ok(mut guard) = self.inbound.lock() {
                *guard = Some(in_tx);
            }

            let sent = Arc::clone(&self.sent);
            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if let Ok(mut v) = sent.lock() {
                        v.push(text);
                    }
                }
            });

            Ok(UpstreamConn { tx: out_tx, rx: in_rx })
        }
    }
}
