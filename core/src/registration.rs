//! Registration handshake
//!
//! Drives a freshly opened connection from socket to established: USER/NICK,
//! then consume server responses until the welcome arrives, falling back
//! through the identity's alternate nicknames on collision. Messages the
//! transport consumed during TLS negotiation sit in the connection's replay
//! buffer and are seen here before any live socket read.

use crate::connection::Connection;
use crate::event::Event;
use crate::message::{Command, Message};
use crate::numeric::NumericReply;
use crate::{Error, Identity, Result, ServerSpec};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Handshake state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    /// Waiting for the welcome; the remaining alternate nicks are consumed
    /// left-to-right on collision.
    WaitForOk { alternates: Vec<String> },
    /// Welcome received
    Established,
    /// Handshake failed, connection is being torn down
    Cancelled,
}

/// Side effects of classifying one message during the handshake
#[derive(Debug)]
pub(crate) struct Step {
    pub send: Vec<Message>,
    pub event: Option<Event>,
    pub set_nick: Option<String>,
    pub next: RegistrationState,
}

impl Step {
    fn stay(state: RegistrationState) -> Self {
        Step {
            send: Vec::new(),
            event: None,
            set_nick: None,
            next: state,
        }
    }
}

/// Classify one inbound message against the handshake state. Pure: the
/// driver applies the returned sends, nick update, and event.
pub(crate) fn classify(state: RegistrationState, message: &Message) -> Step {
    let mut alternates = match state {
        RegistrationState::WaitForOk { alternates } => alternates,
        terminal => return Step::stay(terminal),
    };

    match &message.command {
        Command::Numeric(code) if *code == NumericReply::RplWelcome.code() => Step {
            send: Vec::new(),
            event: None,
            set_nick: None,
            next: RegistrationState::Established,
        },
        Command::Numeric(code) if NumericReply::is_nick_error(*code) => {
            if alternates.is_empty() {
                Step {
                    send: vec![Message::quit(Some("no nickname available"))],
                    event: None,
                    set_nick: None,
                    next: RegistrationState::Cancelled,
                }
            } else {
                let alt = alternates.remove(0);
                Step {
                    send: vec![Message::nick(&alt)],
                    event: None,
                    set_nick: Some(alt),
                    next: RegistrationState::WaitForOk { alternates },
                }
            }
        }
        Command::Notice => {
            let to = message.params.first().cloned().unwrap_or_default();
            Step {
                send: Vec::new(),
                event: Some(Event::Notice {
                    from: message.prefix.clone(),
                    to,
                    text: message.trail.clone(),
                }),
                set_nick: None,
                next: RegistrationState::WaitForOk { alternates },
            }
        }
        _ => Step {
            send: Vec::new(),
            event: Some(Event::Raw {
                prefix: message.prefix.clone(),
                command: message.command.to_string(),
                params: message.params.clone(),
                trail: message.trail.clone(),
            }),
            set_nick: None,
            next: RegistrationState::WaitForOk { alternates },
        },
    }
}

/// Run the handshake on a connection that just came off `Transport::connect`.
/// On success the connection is Established and every starting channel has
/// been joined; the returned events are whatever the server said before the
/// welcome. On failure the connection is closed and no events are returned.
pub async fn run(conn: &Arc<Connection>) -> Result<Vec<(DateTime<Utc>, Event)>> {
    conn.send(Message::user(
        &conn.identity.user_name,
        &conn.identity.real_name,
    ));
    conn.send(Message::nick(&conn.identity.nick));

    let mut state = RegistrationState::WaitForOk {
        alternates: conn.identity.nick_alt.clone(),
    };
    let mut events = Vec::new();

    loop {
        let (at, message) = match conn.receive().await {
            Ok(item) => item,
            Err(e) if e.is_transport_fatal() => {
                tracing::warn!(server = %conn.server, "transport lost during registration: {}", e);
                return Err(e);
            }
            // Parse errors are logged by receive(); skip the line.
            Err(_) => continue,
        };

        let step = classify(state, &message);
        if let Some(nick) = step.set_nick {
            tracing::info!(server = %conn.server, "nickname taken, trying {}", nick);
            conn.debug_log()
                .warning("registration", format!("nickname taken, trying {}", nick));
            conn.set_nick(nick);
        }
        for outbound in step.send {
            conn.send(outbound);
        }
        if let Some(event) = step.event {
            events.push((at, event));
        }

        match step.next {
            RegistrationState::WaitForOk { .. } => state = step.next,
            RegistrationState::Established => {
                if !conn.establish() {
                    return Err(Error::Registration(
                        "connection closed during registration".to_string(),
                    ));
                }
                tracing::info!(
                    server = %conn.server,
                    nick = %conn.current_nick(),
                    "registered"
                );
                for (channel, key) in conn.channels() {
                    conn.send(Message::join(&channel, key.as_deref()));
                }
                return Ok(events);
            }
            RegistrationState::Cancelled => {
                conn.debug_log()
                    .error("registration", "nickname collision with no alternates left");
                conn.close();
                return Err(Error::Registration(
                    "nickname collision with no alternates left".to_string(),
                ));
            }
        }
    }
}

/// Open a transport to `server` and register with `identity`, joining
/// `channels` once established. Returns the live connection plus the events
/// collected during the handshake.
pub async fn connect(
    server: &ServerSpec,
    identity: &Identity,
    channels: Vec<(String, Option<String>)>,
) -> Result<(Arc<Connection>, Vec<(DateTime<Utc>, Event)>)> {
    let (transport, consumed) = crate::transport::Transport::connect(server).await?;
    let conn = Connection::new(
        transport,
        server.clone(),
        identity.clone(),
        channels,
        consumed,
    );
    let events = run(&conn).await?;
    Ok((conn, events))
}
