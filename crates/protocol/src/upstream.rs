//! Frames exchanged with the external gateway process.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::channel::ChannelKind;

// ── Outbound (multiplexer → gateway) ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundFrame {
    #[serde(rename_all = "camelCase")]
    SessionCreate {
        session_id: String,
        user_id: i64,
        channel_type: ChannelKind,
    },
    #[serde(rename_all = "camelCase")]
    SessionTerminate { session_id: String },
    #[serde(rename_all = "camelCase")]
    MessageSend {
        session_id: String,
        content: String,
        user_id: i64,
    },
    #[serde(rename_all = "camelCase")]
    RequestPairing {
        user_id: i64,
        channel_type: ChannelKind,
    },
    /// Heartbeat no-op. Any reply the gateway sends is ignored.
    Ping,
}

// ── Inbound (gateway → multiplexer) ──────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundFrame {
    #[serde(rename_all = "camelCase")]
    MessageResponse {
        session_id: String,
        content: String,
        #[serde(default)]
        metadata: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    QrCode {
        user_id: i64,
        channel_type: ChannelKind,
        code: String,
        /// Absolute expiry in unix milliseconds, if the gateway supplies one.
        #[serde(default)]
        expires_at: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    PairingSuccess { session_id: String },
    #[serde(rename_all = "camelCase")]
    Error {
        error: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        user_id: Option<i64>,
        #[serde(default)]
        channel_type: Option<ChannelKind>,
    },
}

/// Parse an inbound gateway frame. Unknown or malformed frame types yield
/// `None`; the caller logs and moves on.
pub fn parse_inbound(text: &str) -> Option<InboundFrame> {
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_response() {
        let frame = parse_inbound(
            r#"{"type":"MESSAGE_RESPONSE","sessionId":"s1","content":"hi"}"#,
        );
        match frame {
            Some(InboundFrame::MessageResponse {
                session_id,
                content,
                metadata,
            }) => {
                assert_eq!(session_id, "s1");
                assert_eq!(content, "hi");
                assert!(metadata.is_none());
            },
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_qr_code_without_expiry() {
        let frame = parse_inbound(
            r#"{"type":"QR_CODE","userId":7,"channelType":"whatsapp","code":"ABC123"}"#,
        );
        match frame {
            Some(InboundFrame::QrCode {
                user_id,
                channel_type,
                code,
                expires_at,
            }) => {
                assert_eq!(user_id, 7);
                assert_eq!(channel_type, ChannelKind::Whatsapp);
                assert_eq!(code, "ABC123");
                assert!(expires_at.is_none());
            },
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_ignored() {
        assert!(parse_inbound(r#"{"type":"TYPING_INDICATOR","sessionId":"s1"}"#).is_none());
        assert!(parse_inbound("not json at all").is_none());
    }

    #[test]
    fn outbound_tags_are_screaming_snake() {
        let json = serde_json::to_string(&OutboundFrame::SessionCreate {
            session_id: "s1".into(),
            user_id: 42,
            channel_type: ChannelKind::Webchat,
        })
        .ok();
        let json = json.unwrap_or_default();
        assert!(json.contains(r#""type":"SESSION_CREATE""#));
        assert!(json.contains(r#""sessionId":"s1""#));
        assert!(json.contains(r#""channelType":"webchat""#));
    }

    #[test]
    fn ping_serializes_bare() {
        let json = serde_json::to_string(&OutboundFrame::Ping).ok();
        assert_eq!(json.as_deref(), Some(r#"{"type":"PING"}"#));
    }
}
