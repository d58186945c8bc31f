use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The medium a session runs over. Fixed at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Webchat,
    Whatsapp,
    Telegram,
    Slack,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webchat => "webchat",
            Self::Whatsapp => "whatsapp",
            Self::Telegram => "telegram",
            Self::Slack => "slack",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown channel type: {0}")]
pub struct UnknownChannel(String);

impl FromStr for ChannelKind {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webchat" => Ok(Self::Webchat),
            "whatsapp" => Ok(Self::Whatsapp),
            "telegram" => Ok(Self::Telegram),
            "slack" => Ok(Self::Slack),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for kind in [
            ChannelKind::Webchat,
            ChannelKind::Whatsapp,
            ChannelKind::Telegram,
            ChannelKind::Slack,
        ] {
            assert_eq!(kind.as_str().parse::<ChannelKind>().ok(), Some(kind));
        }
    }

    #[test]
    fn rejects_unknown() {
        assert!("irc".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&ChannelKind::Whatsapp).ok();
        assert_eq!(json.as_deref(), Some("\"whatsapp\""));
    }
}
