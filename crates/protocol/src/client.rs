//! Frames exchanged with a user's front-end over the real-time channel.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::channel::ChannelKind;

/// An action submitted by a connected front-end.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientAction {
    #[serde(rename_all = "camelCase")]
    Message { session_id: String, content: String },
    /// Liveness probe, answered locally with [`ClientEvent::Pong`].
    Ping,
    #[serde(rename_all = "camelCase")]
    Terminate { session_id: String },
}

/// An event pushed to a connected front-end.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Message {
        session_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    QrCode {
        channel_type: ChannelKind,
        code: String,
        expires_at: i64,
    },
    #[serde(rename_all = "camelCase")]
    PairingSuccess { session_id: String },
    Pong,
}

/// Parse a front-end action. Unknown types yield `None` and are ignored.
pub fn parse_action(text: &str) -> Option<ClientAction> {
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_action() {
        let action = parse_action(r#"{"type":"message","sessionId":"s1","content":"hey"}"#);
        assert!(matches!(
            action,
            Some(ClientAction::Message { session_id, content })
                if session_id == "s1" && content == "hey"
        ));
    }

    #[test]
    fn parses_ping() {
        assert!(matches!(
            parse_action(r#"{"type":"ping"}"#),
            Some(ClientAction::Ping)
        ));
    }

    #[test]
    fn unknown_action_ignored() {
        assert!(parse_action(r#"{"type":"subscribe","topic":"x"}"#).is_none());
    }

    #[test]
    fn pong_serializes_bare() {
        let json = serde_json::to_string(&ClientEvent::Pong).ok();
        assert_eq!(json.as_deref(), Some(r#"{"type":"pong"}"#));
    }

    #[test]
    fn message_event_omits_empty_metadata() {
        let json = serde_json::to_string(&ClientEvent::Message {
            session_id: "s1".into(),
            content: "hi".into(),
            metadata: None,
        })
        .ok()
        .unwrap_or_default();
        assert!(!json.contains("metadata"));
    }
}
