//! Incoming message dispatch
//!
//! `dispatch` maps one parsed wire message to replies, structured events,
//! and an optional quit reason. It reads no connection state: when the
//! outcome depends on the current nickname (own join/part/quit/nick
//! detection), it returns a `NeedNick` continuation that the connection
//! runtime resolves against the nick cell at dispatch time.

use crate::event::{Event, NameEntry};
use crate::message::{Command, Message, Prefix};
use crate::numeric::NumericReply;

/// Outcome of dispatching one inbound message
pub enum IncomingResult {
    /// Fully resolved: messages to send back, events to publish, and an
    /// optional reason to terminate the connection.
    Done {
        send: Vec<Message>,
        add: Vec<Event>,
        quit: Option<String>,
    },
    /// Needs the connection's current nickname to finish.
    NeedNick(Box<dyn FnOnce(&str) -> IncomingResult + Send>),
}

/// Resolved side effects of one inbound message
#[derive(Debug, Default)]
pub struct Effects {
    pub send: Vec<Message>,
    pub add: Vec<Event>,
    pub quit: Option<String>,
}

impl IncomingResult {
    fn empty() -> Self {
        IncomingResult::Done {
            send: Vec::new(),
            add: Vec::new(),
            quit: None,
        }
    }

    fn event(event: Event) -> Self {
        IncomingResult::Done {
            send: Vec::new(),
            add: vec![event],
            quit: None,
        }
    }

    fn reply(message: Message) -> Self {
        IncomingResult::Done {
            send: vec![message],
            add: Vec::new(),
            quit: None,
        }
    }

    fn quit(reason: String) -> Self {
        IncomingResult::Done {
            send: Vec::new(),
            add: Vec::new(),
            quit: Some(reason),
        }
    }
}

/// Resolve any pending continuation against the connection's nickname.
pub fn resolve(mut result: IncomingResult, nick: &str) -> Effects {
    loop {
        match result {
            IncomingResult::Done { send, add, quit } => return Effects { send, add, quit },
            IncomingResult::NeedNick(cont) => result = cont(nick),
        }
    }
}

/// Preserve a message verbatim as a raw event.
fn raw(message: Message) -> IncomingResult {
    IncomingResult::event(Event::Raw {
        prefix: message.prefix,
        command: message.command.to_string(),
        params: message.params,
        trail: message.trail,
    })
}

fn none_if_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Dispatch one inbound message. Total over all inputs: a message is either
/// interpreted structurally, explicitly ignored (376, 366), or preserved as
/// a raw event. Malformed variants of interpreted commands fall back to the
/// raw event rather than being dropped.
pub fn dispatch(message: Message) -> IncomingResult {
    match message.command.clone() {
        Command::Ping => {
            let token = if !message.trail.is_empty() {
                message.trail.clone()
            } else {
                message.params.first().cloned().unwrap_or_default()
            };
            IncomingResult::reply(Message::pong(&token))
        }
        Command::Join => dispatch_join(message),
        Command::Part => dispatch_part(message),
        Command::Quit => dispatch_quit(message),
        Command::Kick => {
            let Some(channel) = message.params.first().cloned() else {
                return raw(message);
            };
            IncomingResult::event(Event::Kick {
                channel,
                nick: message.params.get(1).cloned(),
                reason: none_if_empty(&message.trail),
            })
        }
        Command::Kill => IncomingResult::quit("KILL received".to_string()),
        Command::PrivMsg => {
            let Some(to) = message.params.first().cloned() else {
                return raw(message);
            };
            IncomingResult::event(Event::Privmsg {
                from: message.prefix,
                to,
                text: message.trail,
            })
        }
        Command::Notice => {
            let Some(to) = message.params.first().cloned() else {
                return raw(message);
            };
            IncomingResult::event(Event::Notice {
                from: message.prefix,
                to,
                text: message.trail,
            })
        }
        Command::Nick => dispatch_nick(message),
        Command::Error => {
            let reason = if message.trail.is_empty() {
                "ERROR from server".to_string()
            } else {
                message.trail.clone()
            };
            IncomingResult::quit(reason)
        }
        Command::Numeric(code) => dispatch_numeric(code, message),
        _ => raw(message),
    }
}

fn dispatch_join(message: Message) -> IncomingResult {
    let Some(sender) = sender_nick(&message) else {
        return raw(message);
    };
    let first_param = message.params.first().cloned();
    let list = if !message.trail.is_empty() {
        message.trail.clone()
    } else {
        match first_param {
            Some(p) => p,
            None => return raw(message),
        }
    };
    let prefix = message.prefix.clone();
    IncomingResult::NeedNick(Box::new(move |nick: &str| {
        let own = sender == nick;
        let add = list
            .split(',')
            .filter(|c| !c.is_empty())
            .map(|channel| Event::Join {
                channel: channel.to_string(),
                user: if own { None } else { prefix.clone() },
            })
            .collect();
        IncomingResult::Done {
            send: Vec::new(),
            add,
            quit: None,
        }
    }))
}

fn dispatch_part(message: Message) -> IncomingResult {
    let Some(sender) = sender_nick(&message) else {
        return raw(message);
    };
    let first_param = message.params.first().cloned();
    let channel = match first_param {
        Some(p) => p,
        None if !message.trail.is_empty() => message.trail.clone(),
        None => return raw(message),
    };
    let prefix = message.prefix.clone();
    IncomingResult::NeedNick(Box::new(move |nick: &str| {
        let own = sender == nick;
        IncomingResult::event(Event::Part {
            channel,
            user: if own { None } else { prefix },
        })
    }))
}

fn dispatch_quit(message: Message) -> IncomingResult {
    let Some(sender) = sender_nick(&message) else {
        return raw(message);
    };
    let reason = none_if_empty(&message.trail);
    let prefix = message.prefix.clone();
    IncomingResult::NeedNick(Box::new(move |nick: &str| {
        let own = sender == nick;
        IncomingResult::event(Event::Quit {
            user: if own { None } else { prefix },
            reason,
        })
    }))
}

fn dispatch_nick(message: Message) -> IncomingResult {
    let Some(sender) = sender_nick(&message) else {
        return raw(message);
    };
    let first_param = message.params.first().cloned();
    let new_nick = match first_param {
        Some(p) => p,
        None if !message.trail.is_empty() => message.trail.clone(),
        None => return raw(message),
    };
    let prefix = message.prefix.clone();
    IncomingResult::NeedNick(Box::new(move |nick: &str| {
        let own = sender == nick;
        IncomingResult::event(Event::NickChange {
            user: if own { None } else { prefix },
            new_nick,
        })
    }))
}

fn dispatch_numeric(code: u16, message: Message) -> IncomingResult {
    match NumericReply::from_code(code) {
        Some(NumericReply::RplMotdStart) | Some(NumericReply::RplMotd) => {
            IncomingResult::event(Event::Motd {
                line: message.trail,
            })
        }
        // End-of-list markers carry no information of their own
        Some(NumericReply::RplEndOfMotd) | Some(NumericReply::RplEndOfNames) => {
            IncomingResult::empty()
        }
        Some(NumericReply::RplTopic) => {
            let Some(channel) = message.params.last().cloned() else {
                return raw(message);
            };
            IncomingResult::event(Event::Topic {
                channel,
                topic: Some(message.trail),
            })
        }
        Some(NumericReply::RplNoTopic) => {
            let Some(channel) = message.params.last().cloned() else {
                return raw(message);
            };
            IncomingResult::event(Event::Topic {
                channel,
                topic: None,
            })
        }
        Some(NumericReply::RplNameReply) => {
            let Some(channel) = message.params.last().cloned() else {
                return raw(message);
            };
            let names = message
                .trail
                .split_whitespace()
                .map(NameEntry::parse)
                .collect();
            IncomingResult::event(Event::NamesReply { channel, names })
        }
        _ if NumericReply::is_nick_error(code) => IncomingResult::event(Event::ErrorReply {
            command: format!("{:03}", code),
        }),
        _ => raw(message),
    }
}

/// Nickname of the message sender. `None` for server prefixes and for the
/// malformed case of a missing prefix.
fn sender_nick(message: &Message) -> Option<String> {
    message
        .prefix
        .as_ref()
        .and_then(Prefix::nick)
        .map(str::to_string)
}
