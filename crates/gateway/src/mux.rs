//! The session multiplexer: composes the session registry, pending-pairing
//! table, client registry, and the upstream gateway link.
//!
//! Front-end actions flow ownership-check → durable store → gateway.
//! Gateway frames flow classify → durable store → pending table or client
//! link. Lock order: `sessions` before `pairing`, never the reverse; the
//! `clients` lock never nests with either.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    anyhow::Result,
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, info, warn},
};

use {
    manifold_config::GatewayConfig,
    manifold_protocol::{
        ChannelKind,
        client::{ClientAction, ClientEvent},
        upstream::{InboundFrame, OutboundFrame},
    },
    manifold_storage::{MessageRecord, MessageRole, SessionStore},
};

use crate::{
    clients::{ClientLink, ClientRegistry},
    pairing::{PairingCode, PairingError, PairingKey, PairingTicket, PendingPairings},
    registry::{SessionContext, SessionRegistry},
    upstream::{GatewayLink, LinkPolicy, UpstreamTransport},
};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Orchestrator for all session traffic through the gateway.
pub struct Multiplexer {
    store: Arc<dyn SessionStore>,
    link: Arc<GatewayLink>,
    sessions: RwLock<SessionRegistry>,
    pairing: RwLock<PendingPairings>,
    clients: RwLock<ClientRegistry>,
    pairing_timeout: Duration,
    qr_expiry: Duration,
}

impl Multiplexer {
    /// Build the multiplexer and start its gateway-event worker. The
    /// upstream link is not connected yet; call [`Multiplexer::connect`].
    pub fn new(
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn UpstreamTransport>,
        cfg: &GatewayConfig,
    ) -> Arc<Self> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let link = GatewayLink::new(transport, LinkPolicy::from(cfg), events_tx);

        let mux = Arc::new(Self {
            store,
            link,
            sessions: RwLock::new(SessionRegistry::new()),
            pairing: RwLock::new(PendingPairings::new()),
            clients: RwLock::new(ClientRegistry::new()),
            pairing_timeout: Duration::from_secs(cfg.pairing_timeout_secs),
            qr_expiry: Duration::from_secs(cfg.qr_expiry_secs),
        });

        let worker = Arc::clone(&mux);
        tokio::spawn(async move {
            while let Some(frame) = events_rx.recv().await {
                worker.handle_gateway_frame(frame).await;
            }
        });

        mux
    }

    /// Connect the upstream link. Only the very first failure surfaces
    /// here; the link keeps retrying in the background either way.
    pub async fn connect(&self) -> Result<()> {
        self.link.connect().await
    }

    // ── Sessions ─────────────────────────────────────────────────────────

    /// Start a new session: durable record first, then the in-memory
    /// indices, then a fire-and-forget notification to the gateway.
    /// Creation succeeds once the record is durable and locally indexed.
    pub async fn create_session(
        &self,
        user_id: i64,
        channel: ChannelKind,
    ) -> Result<SessionContext> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.store
            .insert_session(user_id, channel, &session_id)
            .await?;

        let ctx = SessionContext {
            session_id: session_id.clone(),
            user_id,
            channel,
            active: true,
        };
        self.sessions.write().await.insert(ctx.clone());

        self.link
            .send(&OutboundFrame::SessionCreate {
                session_id,
                user_id,
                channel_type: channel,
            })
            .await;

        info!(session_id = %ctx.session_id, user_id, channel = %channel, "session created");
        Ok(ctx)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<SessionContext> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn sessions_for_user(&self, user_id: i64) -> Vec<SessionContext> {
        self.sessions.read().await.sessions_for_user(user_id)
    }

    /// Terminate a session. Unknown ids are a no-op, not an error; a
    /// terminated id is dead forever. In-flight gateway messages for the
    /// session are not cancelled, only future routing stops.
    pub async fn terminate_session(&self, session_id: &str) -> Result<()> {
        if self.sessions.read().await.get(session_id).is_none() {
            return Ok(());
        }
        self.store.mark_session_inactive(session_id).await?;
        if self.sessions.write().await.remove(session_id).is_none() {
            // Lost a termination race; the winner already notified.
            return Ok(());
        }
        self.link
            .send(&OutboundFrame::SessionTerminate {
                session_id: session_id.to_string(),
            })
            .await;
        info!(session_id, "session terminated");
        Ok(())
    }

    /// Message history for an owned session, oldest first. Unknown and
    /// foreign sessions both yield `None` — no session leakage.
    pub async fn session_history(
        &self,
        user_id: i64,
        session_id: &str,
        limit: u32,
    ) -> Result<Option<Vec<MessageRecord>>> {
        if !self.sessions.read().await.is_owned_by(session_id, user_id) {
            return Ok(None);
        }
        let Some(record) = self.store.get_session_by_public_id(session_id).await? else {
            return Ok(None);
        };
        Ok(Some(self.store.list_messages(record.id, limit).await?))
    }

    // ── Pairing ──────────────────────────────────────────────────────────

    /// Request a pairing code for `(user_id, channel)`. The returned ticket
    /// resolves exactly once, with whichever of gateway response, timeout,
    /// supersession, or shutdown happens first.
    pub async fn request_pairing(
        self: &Arc<Self>,
        user_id: i64,
        channel: ChannelKind,
    ) -> PairingTicket {
        let key: PairingKey = (user_id, channel);

        let timeout = {
            let mux = Arc::clone(self);
            let deadline = self.pairing_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                if mux.pairing.write().await.fail(&key, PairingError::TimedOut) {
                    warn!(user_id = key.0, channel = %key.1, "pairing request timed out");
                }
            })
        };

        let ticket = self.pairing.write().await.install(key, timeout);

        self.link
            .send(&OutboundFrame::RequestPairing {
                user_id,
                channel_type: channel,
            })
            .await;

        ticket
    }

    // ── Client links and actions ─────────────────────────────────────────

    pub async fn register_client(&self, user_id: i64, link: ClientLink) {
        self.clients.write().await.register(user_id, link);
    }

    pub async fn unregister_client(&self, user_id: i64, conn_id: &str) {
        self.clients.write().await.unregister(user_id, conn_id);
    }

    /// Dispatch a front-end action. Actions against sessions the caller
    /// does not own are silently ignored — fail closed, no surfaced
    /// authorization error.
    pub async fn handle_client_action(&self, user_id: i64, action: ClientAction) {
        match action {
            ClientAction::Message {
                session_id,
                content,
            } => {
                if !self.sessions.read().await.is_owned_by(&session_id, user_id) {
                    debug!(user_id, session_id, "ignoring message for session not owned by caller");
                    return;
                }
                // Persist the outbound message, then forward.
                match self.store.get_session_by_public_id(&session_id).await {
                    Ok(Some(record)) => {
                        if let Err(e) = self
                            .store
                            .insert_message(record.id, MessageRole::User, &content, None)
                            .await
                        {
                            warn!(session_id, error = %e, "failed to persist outbound message");
                        }
                    },
                    Ok(None) => warn!(session_id, "session indexed but missing from store"),
                    Err(e) => warn!(session_id, error = %e, "store lookup failed"),
                }
                self.link
                    .send(&OutboundFrame::MessageSend {
                        session_id,
                        content,
                        user_id,
                    })
                    .await;
            },
            ClientAction::Ping => {
                // Answered locally; never reaches the gateway.
                self.clients.read().await.send_to(user_id, &ClientEvent::Pong);
            },
            ClientAction::Terminate { session_id } => {
                if !self.sessions.read().await.is_owned_by(&session_id, user_id) {
                    debug!(user_id, session_id, "ignoring terminate for session not owned by caller");
                    return;
                }
                if let Err(e) = self.terminate_session(&session_id).await {
                    warn!(session_id, error = %e, "terminate failed");
                }
            },
        }
    }

    // ── Gateway frames ───────────────────────────────────────────────────

    async fn handle_gateway_frame(&self, frame: InboundFrame) {
        match frame {
            InboundFrame::MessageResponse {
                session_id,
                content,
                metadata,
            } => {
                // Resolve the owning user via the durable record so replies
                // for terminated-but-stored sessions still land in history.
                let record = match self.store.get_session_by_public_id(&session_id).await {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        debug!(session_id, "response for unknown session");
                        return;
                    },
                    Err(e) => {
                        warn!(session_id, error = %e, "store lookup failed");
                        return;
                    },
                };
                if let Err(e) = self
                    .store
                    .insert_message(
                        record.id,
                        MessageRole::Assistant,
                        &content,
                        metadata.as_ref(),
                    )
                    .await
                {
                    warn!(session_id, error = %e, "failed to persist assistant message");
                }
                let delivered = self.clients.read().await.send_to(
                    record.user_id,
                    &ClientEvent::Message {
                        session_id,
                        content,
                        metadata,
                    },
                );
                if !delivered {
                    debug!(user_id = record.user_id, "no live client link, message stored only");
                }
            },
            InboundFrame::QrCode {
                user_id,
                channel_type,
                code,
                expires_at,
            } => {
                let expires_at =
                    expires_at.unwrap_or_else(|| now_ms() + self.qr_expiry.as_millis() as i64);
                let resolved = self.pairing.write().await.fulfill(
                    &(user_id, channel_type),
                    PairingCode {
                        code: code.clone(),
                        expires_at,
                    },
                );
                if !resolved {
                    debug!(user_id, channel = %channel_type, "pairing code with no pending request");
                }
                // Push to the live front-end too, so a UI can show the code
                // even if the original caller detached.
                self.clients.read().await.send_to(user_id, &ClientEvent::QrCode {
                    channel_type,
                    code,
                    expires_at,
                });
            },
            InboundFrame::PairingSuccess { session_id } => {
                match self.store.get_session_by_public_id(&session_id).await {
                    Ok(Some(record)) => {
                        self.clients
                            .read()
                            .await
                            .send_to(record.user_id, &ClientEvent::PairingSuccess { session_id });
                    },
                    Ok(None) => debug!(session_id, "pairing success for unknown session"),
                    Err(e) => warn!(session_id, error = %e, "store lookup failed"),
                }
            },
            InboundFrame::Error {
                error,
                session_id,
                user_id,
                channel_type,
            } => {
                warn!(?session_id, ?user_id, error = %error, "gateway reported error");
                if let (Some(uid), Some(channel)) = (user_id, channel_type) {
                    self.pairing
                        .write()
                        .await
                        .fail(&(uid, channel), PairingError::Gateway(error));
                }
            },
        }
    }

    // ── Lifecycle / introspection ────────────────────────────────────────

    /// Shut the whole component down: stop the heartbeat and upstream link,
    /// reject every still-pending pairing request (exactly once each), and
    /// close every registered client link. The only path that fully drains
    /// pending state.
    pub async fn shutdown(&self) {
        self.link.quiesce().await;
        let rejected = self.pairing.write().await.fail_all(PairingError::Shutdown);
        if rejected > 0 {
            info!(count = rejected, "rejected pending pairing requests on shutdown");
        }
        let closed = self.clients.write().await.clear();
        if closed > 0 {
            info!(count = closed, "closed client links on shutdown");
        }
        self.link.close().await;
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.count()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.count()
    }

    pub async fn link_open(&self) -> bool {
        self.link.is_open().await
    }
}
