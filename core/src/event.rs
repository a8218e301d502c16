//! Structured messages delivered to frontend subscribers
//!
//! Each variant corresponds to one interpreted wire command. The serialized
//! `type` tags and the declaration order are part of the frontend contract:
//! new variants are appended, existing tags never change.

use crate::message::Prefix;
use serde::{Deserialize, Serialize};

/// Channel-membership flag carried in a names reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserFlag {
    Owner,
    Admin,
    Op,
    HalfOp,
    Voice,
}

impl UserFlag {
    /// Map a names-reply prefix character to a flag.
    pub fn from_prefix_char(c: char) -> Option<Self> {
        match c {
            '~' => Some(UserFlag::Owner),
            '&' => Some(UserFlag::Admin),
            '@' => Some(UserFlag::Op),
            '%' => Some(UserFlag::HalfOp),
            '+' => Some(UserFlag::Voice),
            _ => None,
        }
    }
}

/// One occupant entry of a names reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    pub nick: String,
    pub flag: Option<UserFlag>,
}

impl NameEntry {
    /// Parse one token of a 353 reply, splitting off the flag prefix.
    pub fn parse(token: &str) -> Self {
        let mut chars = token.chars();
        match chars.next().and_then(UserFlag::from_prefix_char) {
            Some(flag) => NameEntry {
                nick: chars.as_str().to_string(),
                flag: Some(flag),
            },
            None => NameEntry {
                nick: token.to_string(),
                flag: None,
            },
        }
    }
}

/// Structured message stream, one connection's view of the network.
///
/// `user: None` on join/part/quit/nick marks the connection's own identity
/// as the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Privmsg {
        from: Option<Prefix>,
        to: String,
        text: String,
    },
    Notice {
        from: Option<Prefix>,
        to: String,
        text: String,
    },
    Join {
        channel: String,
        user: Option<Prefix>,
    },
    Part {
        channel: String,
        user: Option<Prefix>,
    },
    Kick {
        channel: String,
        nick: Option<String>,
        reason: Option<String>,
    },
    Quit {
        user: Option<Prefix>,
        reason: Option<String>,
    },
    Motd {
        line: String,
    },
    Topic {
        channel: String,
        topic: Option<String>,
    },
    NickChange {
        user: Option<Prefix>,
        new_nick: String,
    },
    NamesReply {
        channel: String,
        names: Vec<NameEntry>,
    },
    ErrorReply {
        command: String,
    },
    Raw {
        prefix: Option<Prefix>,
        command: String,
        params: Vec<String>,
        trail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_entry_flags() {
        assert_eq!(
            NameEntry::parse("@alice"),
            NameEntry {
                nick: "alice".to_string(),
                flag: Some(UserFlag::Op),
            }
        );
        assert_eq!(
            NameEntry::parse("+bob"),
            NameEntry {
                nick: "bob".to_string(),
                flag: Some(UserFlag::Voice),
            }
        );
        assert_eq!(NameEntry::parse("carol").flag, None);
    }

    #[test]
    fn test_serialized_tags_are_stable() {
        let event = Event::Privmsg {
            from: None,
            to: "#chan".to_string(),
            text: "hi".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"privmsg\""));

        let event = Event::NickChange {
            user: None,
            new_nick: "alice_".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"nick_change\""));

        let event = Event::Raw {
            prefix: None,
            command: "315".to_string(),
            params: vec!["bob".to_string()],
            trail: "End of WHO".to_string(),
        };
        let round: Event = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(round, event);
    }
}
