//! IRC message parsing and handling
//!
//! This module implements the IRC wire format as defined in RFC 1459/2812.
//! Parsing is lenient: unknown commands are kept as raw strings, a missing
//! trailing argument becomes the empty string, and an absent prefix becomes
//! `None`. Only a line without a command token is rejected.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// IRC message prefix (server or user)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prefix {
    /// Server name
    Server(String),
    /// User prefix (nick[!user][@host])
    User {
        nick: String,
        user: Option<String>,
        host: Option<String>,
    },
}

impl Prefix {
    /// Parse a prefix token (without the leading ':').
    pub fn parse(token: &str) -> Self {
        if !token.contains('!') && !token.contains('@') && token.contains('.') {
            return Prefix::Server(token.to_string());
        }
        let (nick_user, host) = match token.split_once('@') {
            Some((nu, h)) => (nu, Some(h.to_string())),
            None => (token, None),
        };
        let (nick, user) = match nick_user.split_once('!') {
            Some((n, u)) => (n.to_string(), Some(u.to_string())),
            None => (nick_user.to_string(), None),
        };
        Prefix::User { nick, user, host }
    }

    /// Nickname of the sender, if this is a user prefix.
    pub fn nick(&self) -> Option<&str> {
        match self {
            Prefix::Server(_) => None,
            Prefix::User { nick, .. } => Some(nick.as_str()),
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::Server(name) => write!(f, "{}", name),
            Prefix::User { nick, user, host } => {
                write!(f, "{}", nick)?;
                if let Some(user) = user {
                    write!(f, "!{}", user)?;
                }
                if let Some(host) = host {
                    write!(f, "@{}", host)?;
                }
                Ok(())
            }
        }
    }
}

/// IRC command words the gateway recognizes on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Nick,
    User,
    Join,
    Part,
    Quit,
    Kick,
    Kill,
    PrivMsg,
    Notice,
    Ping,
    Pong,
    Error,
    StartTls,
    /// Three-digit numeric reply
    Numeric(u16),
    /// Anything else, preserved verbatim
    Custom(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Nick => write!(f, "NICK"),
            Command::User => write!(f, "USER"),
            Command::Join => write!(f, "JOIN"),
            Command::Part => write!(f, "PART"),
            Command::Quit => write!(f, "QUIT"),
            Command::Kick => write!(f, "KICK"),
            Command::Kill => write!(f, "KILL"),
            Command::PrivMsg => write!(f, "PRIVMSG"),
            Command::Notice => write!(f, "NOTICE"),
            Command::Ping => write!(f, "PING"),
            Command::Pong => write!(f, "PONG"),
            Command::Error => write!(f, "ERROR"),
            Command::StartTls => write!(f, "STARTTLS"),
            Command::Numeric(n) => write!(f, "{:03}", n),
            Command::Custom(cmd) => write!(f, "{}", cmd),
        }
    }
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        if s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit()) {
            // Always in range: three ASCII digits
            return Command::Numeric(s.parse().unwrap_or(0));
        }
        match s.to_uppercase().as_str() {
            "NICK" => Command::Nick,
            "USER" => Command::User,
            "JOIN" => Command::Join,
            "PART" => Command::Part,
            "QUIT" => Command::Quit,
            "KICK" => Command::Kick,
            "KILL" => Command::Kill,
            "PRIVMSG" => Command::PrivMsg,
            "NOTICE" => Command::Notice,
            "PING" => Command::Ping,
            "PONG" => Command::Pong,
            "ERROR" => Command::Error,
            "STARTTLS" => Command::StartTls,
            _ => Command::Custom(s.to_string()),
        }
    }
}

/// IRC message as defined in RFC 1459
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Optional prefix (server or user)
    pub prefix: Option<Prefix>,
    /// Message command
    pub command: Command,
    /// Middle parameters (never contain spaces)
    pub params: Vec<String>,
    /// Trailing parameter; empty when the line carried none
    pub trail: String,
}

impl Message {
    /// Create a new message without prefix or trail
    pub fn new(command: Command, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command,
            params,
            trail: String::new(),
        }
    }

    /// Create a new message with a trailing argument
    pub fn with_trail(command: Command, params: Vec<String>, trail: impl Into<String>) -> Self {
        Self {
            prefix: None,
            command,
            params,
            trail: trail.into(),
        }
    }

    /// USER registration command
    pub fn user(user_name: &str, real_name: &str) -> Self {
        Self::with_trail(
            Command::User,
            vec![user_name.to_string(), "0".to_string(), "*".to_string()],
            real_name,
        )
    }

    /// NICK command
    pub fn nick(nick: &str) -> Self {
        Self::new(Command::Nick, vec![nick.to_string()])
    }

    /// JOIN command with an optional channel key
    pub fn join(channel: &str, key: Option<&str>) -> Self {
        let mut params = vec![channel.to_string()];
        if let Some(key) = key {
            params.push(key.to_string());
        }
        Self::new(Command::Join, params)
    }

    /// PONG reply echoing the server token
    pub fn pong(token: &str) -> Self {
        Self::with_trail(Command::Pong, Vec::new(), token)
    }

    /// QUIT command with an optional reason
    pub fn quit(reason: Option<&str>) -> Self {
        match reason {
            Some(reason) => Self::with_trail(Command::Quit, Vec::new(), reason),
            None => Self::new(Command::Quit, Vec::new()),
        }
    }

    /// STARTTLS probe
    pub fn starttls() -> Self {
        Self::new(Command::StartTls, Vec::new())
    }

    /// Parse an IRC line (CRLF already stripped).
    pub fn parse(input: &str) -> Result<Self> {
        let mut rest = input.trim_end_matches(|c| c == '\r' || c == '\n');
        let mut offset = 0;

        let prefix = if let Some(after) = rest.strip_prefix(':') {
            let (token, remainder) = match after.split_once(' ') {
                Some((t, r)) => (t, r),
                None => {
                    return Err(Error::MessageParse {
                        offset: input.len(),
                        reason: "prefix without command".to_string(),
                    })
                }
            };
            offset += 1 + token.len() + 1;
            rest = remainder.trim_start();
            Some(Prefix::parse(token))
        } else {
            None
        };

        let (command_str, after_command) = match rest.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (rest, ""),
        };
        if command_str.is_empty() {
            return Err(Error::MessageParse {
                offset,
                reason: "missing command token".to_string(),
            });
        }
        let command = Command::from(command_str);

        let mut params = Vec::new();
        let mut trail = String::new();
        let mut remainder = after_command;
        loop {
            let token = remainder.trim_start();
            if token.is_empty() {
                break;
            }
            if let Some(t) = token.strip_prefix(':') {
                trail = t.to_string();
                break;
            }
            match token.split_once(' ') {
                Some((param, r)) => {
                    params.push(param.to_string());
                    remainder = r;
                }
                None => {
                    params.push(token.to_string());
                    break;
                }
            }
        }

        Ok(Message {
            prefix,
            command,
            params,
            trail,
        })
    }

    /// Serialize to the wire form, CRLF terminated.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(ref prefix) = self.prefix {
            out.push(':');
            out.push_str(&prefix.to_string());
            out.push(' ');
        }
        out.push_str(&self.command.to_string());
        for param in &self.params {
            out.push(' ');
            out.push_str(param);
        }
        if !self.trail.is_empty() {
            out.push_str(" :");
            out.push_str(&self.trail);
        }
        out.push_str("\r\n");
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire().trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_message() {
        let msg = Message::parse("NICK alice").unwrap();
        assert_eq!(msg.command, Command::Nick);
        assert_eq!(msg.params, vec!["alice"]);
        assert!(msg.prefix.is_none());
        assert!(msg.trail.is_empty());
    }

    #[test]
    fn test_parse_message_with_prefix_and_trail() {
        let msg = Message::parse(":alice!user@host PRIVMSG #channel :Hello world").unwrap();
        match msg.prefix {
            Some(Prefix::User { nick, user, host }) => {
                assert_eq!(nick, "alice");
                assert_eq!(user.as_deref(), Some("user"));
                assert_eq!(host.as_deref(), Some("host"));
            }
            _ => panic!("Expected user prefix"),
        }
        assert_eq!(msg.command, Command::PrivMsg);
        assert_eq!(msg.params, vec!["#channel"]);
        assert_eq!(msg.trail, "Hello world");
    }

    #[test]
    fn test_parse_server_prefix_numeric() {
        let msg = Message::parse(":irc.example.org 001 alice :Welcome").unwrap();
        assert_eq!(msg.prefix, Some(Prefix::Server("irc.example.org".to_string())));
        assert_eq!(msg.command, Command::Numeric(1));
        assert_eq!(msg.params, vec!["alice"]);
        assert_eq!(msg.trail, "Welcome");
    }

    #[test]
    fn test_parse_bare_nick_prefix() {
        let msg = Message::parse(":carol QUIT :bye").unwrap();
        assert_eq!(
            msg.prefix,
            Some(Prefix::User {
                nick: "carol".to_string(),
                user: None,
                host: None,
            })
        );
    }

    #[test]
    fn test_parse_lf_only_line() {
        let msg = Message::parse("PING :token\n").unwrap();
        assert_eq!(msg.command, Command::Ping);
        assert_eq!(msg.trail, "token");
    }

    #[test]
    fn test_parse_unknown_command_kept_raw() {
        let msg = Message::parse("BATCH +ref example").unwrap();
        assert_eq!(msg.command, Command::Custom("BATCH".to_string()));
        assert_eq!(msg.params, vec!["+ref", "example"]);
    }

    #[test]
    fn test_parse_rejects_missing_command() {
        assert!(matches!(
            Message::parse(":prefix.only"),
            Err(Error::MessageParse { .. })
        ));
        assert!(matches!(Message::parse(""), Err(Error::MessageParse { .. })));
    }

    #[test]
    fn test_serialize_round_trip() {
        for line in [
            "PONG :irc.example.org",
            ":srv.example.org 433 * alice :Nickname is already in use",
            ":carol!c@h JOIN :#a,#b",
            "JOIN #chan key",
            "USER alice 0 * :Alice Example",
        ] {
            let msg = Message::parse(line).unwrap();
            assert_eq!(msg.to_wire(), format!("{}\r\n", line));
        }
    }

    #[test]
    fn test_serialize_without_trail() {
        let msg = Message::nick("alice");
        assert_eq!(msg.to_wire(), "NICK alice\r\n");
    }
}
