//! Disconnect messages shown to players.

use serde_json::{json, Value};

const HEADER: &str = "◆ Shulker ◆\n";

/// Named chat colours used by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatColor {
    Red,
    LightPurple,
}

impl ChatColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::LightPurple => "light_purple",
        }
    }
}

/// A fixed disconnect reason: the bold Shulker header followed by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectMessage {
    pub text: &'static str,
    pub color: ChatColor,
}

/// Sent to players connecting after the proxy stopped accepting.
pub const NOT_ACCEPTING_PLAYERS: DisconnectMessage = DisconnectMessage {
    text: "Proxy is not accepting players, try reconnect.",
    color: ChatColor::Red,
};

/// Sent when no limbo backend is registered.
pub const NO_LIMBO_FOUND: DisconnectMessage = DisconnectMessage {
    text: "No limbo server found, please check your cluster configuration.",
    color: ChatColor::Red,
};

impl DisconnectMessage {
    /// Render as a JSON chat component.
    pub fn to_component(&self) -> Value {
        json!({
            "text": "",
            "extra": [
                {
                    "text": HEADER,
                    "color": ChatColor::LightPurple.as_str(),
                    "bold": true
                },
                {
                    "text": self.text,
                    "color": self.color.as_str(),
                    "bold": false
                }
            ]
        })
    }

    pub fn to_json(&self) -> String {
        self.to_component().to_string()
    }
}
