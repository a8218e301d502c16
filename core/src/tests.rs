//! Cross-module tests for the gateway core, driving real connections
//! against scripted loopback servers.

use crate::broadcast::{Broadcast, Subscriber};
use crate::connection::{Connection, ConnectionStatus};
use crate::event::Event;
use crate::message::Message;
use crate::store::{AccountId, NetworkId, NetworkRecord, StaticStore, Store};
use crate::supervisor::{AccountEvent, AccountPayload, Supervisor};
use crate::transport::Transport;
use crate::{incoming, registration, Error, Identity, Result, ServerSpec, TlsMode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, ServerSpec) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = ServerSpec {
        host: "127.0.0.1".to_string(),
        port,
        tls: TlsMode::None,
    };
    (listener, server)
}

fn identity(nick: &str, alternates: &[&str]) -> Identity {
    Identity {
        nick: nick.to_string(),
        nick_alt: alternates.iter().map(|s| s.to_string()).collect(),
        user_name: nick.to_string(),
        real_name: format!("{} (gateway)", nick),
    }
}

/// Accept one client and keep the socket open without answering, so reader
/// tasks stay parked on the socket.
fn spawn_idle_server(listener: TcpListener) {
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        sleep(Duration::from_secs(120)).await;
        drop(socket);
    });
}

struct Collector {
    tx: mpsc::UnboundedSender<Event>,
    closed: Arc<AtomicBool>,
}

impl Collector {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            Arc::new(Self {
                tx,
                closed: Arc::clone(&closed),
            }),
            rx,
            closed,
        )
    }
}

#[async_trait]
impl Subscriber for Collector {
    async fn deliver(&self, _at: DateTime<Utc>, event: &Event) {
        let _ = self.tx.send(event.clone());
    }

    async fn connection_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn registration_falls_back_through_alternates() {
    let (listener, server) = bind().await;
    let server_task = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut joins = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            if line.starts_with("NICK alice_") {
                write
                    .write_all(b":irc.test 001 alice_ :Welcome to the test network\r\n")
                    .await
                    .unwrap();
            } else if line.starts_with("NICK alice") {
                write
                    .write_all(b":irc.test 433 * alice :Nickname is already in use\r\n")
                    .await
                    .unwrap();
            } else if line.starts_with("JOIN") {
                joins.push(line);
                break;
            }
        }
        joins
    });

    let identity = identity("alice", &["alice_", "alice__"]);
    let channels = vec![("#rust".to_string(), None)];
    let (conn, _events) = registration::connect(&server, &identity, channels)
        .await
        .unwrap();

    assert_eq!(conn.current_nick(), "alice_");
    assert_eq!(conn.status(), ConnectionStatus::Established);
    let joins = timeout(WAIT, server_task).await.unwrap().unwrap();
    assert_eq!(joins, vec!["JOIN #rust".to_string()]);
    conn.close();
}

#[tokio::test]
async fn registration_gives_up_when_alternates_run_out() {
    let (listener, server) = bind().await;
    let server_task = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            if line.starts_with("NICK") {
                write
                    .write_all(b":irc.test 433 * alice :Nickname is already in use\r\n")
                    .await
                    .unwrap();
            } else if line.starts_with("QUIT") {
                return line;
            }
        }
        panic!("client never sent QUIT");
    });

    let identity = identity("alice", &["alice_"]);
    let result = registration::connect(&server, &identity, Vec::new()).await;
    assert!(matches!(result, Err(Error::Registration(_))));
    let quit = timeout(WAIT, server_task).await.unwrap().unwrap();
    assert_eq!(quit, "QUIT :no nickname available");
}

#[tokio::test]
async fn own_part_removes_channel_from_map() {
    let (listener, server) = bind().await;
    spawn_idle_server(listener);
    let (transport, consumed) = Transport::connect(&server).await.unwrap();
    let conn = Connection::new(
        transport,
        server,
        identity("bob", &[]),
        vec![("#a".to_string(), None), ("#b".to_string(), None)],
        consumed,
    );

    let message = Message::parse(":bob!~b@h PART #a").unwrap();
    let fx = incoming::resolve(incoming::dispatch(message), &conn.current_nick());
    assert_eq!(
        fx.add,
        vec![Event::Part {
            channel: "#a".to_string(),
            user: None,
        }]
    );
    for event in &fx.add {
        conn.apply(event);
    }

    let channels = conn.channels();
    assert_eq!(channels.len(), 1);
    assert!(channels.contains_key("#b"));
    conn.close();
}

#[tokio::test]
async fn send_on_closed_connection_is_a_logged_noop() {
    let (listener, server) = bind().await;
    spawn_idle_server(listener);
    let (transport, consumed) = Transport::connect(&server).await.unwrap();
    let conn = Connection::new(transport, server, identity("bob", &[]), Vec::new(), consumed);

    conn.close();
    conn.close();
    conn.send(Message::nick("late"));

    assert_eq!(conn.status(), ConnectionStatus::Closed);
    let entries = conn.debug_log().snapshot();
    let closed_notes = entries
        .iter()
        .filter(|e| e.severity == crate::Severity::Info && e.text == "closed")
        .count();
    assert_eq!(closed_notes, 1, "close must record exactly one transition");
    assert!(entries
        .iter()
        .any(|e| e.severity == crate::Severity::Error && e.text.contains("closed connection")));
}

#[tokio::test]
async fn late_subscriber_sees_only_later_events() {
    let (listener, server) = bind().await;
    spawn_idle_server(listener);
    let (transport, consumed) = Transport::connect(&server).await.unwrap();
    let conn = Connection::new(transport, server, identity("bob", &[]), Vec::new(), consumed);
    let hub = Broadcast::start(conn, Vec::new());

    let motd = |line: &str| Event::Motd {
        line: line.to_string(),
    };
    hub.publish(Utc::now(), motd("one"));
    hub.publish(Utc::now(), motd("two"));

    let (collector, mut rx, closed) = Collector::new();
    let id = hub.subscribe(collector);

    hub.publish(Utc::now(), motd("three"));
    hub.publish(Utc::now(), motd("four"));

    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, motd("three"));
    assert_eq!(second, motd("four"));

    sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "no backfill of earlier events");

    hub.stop(None);
    hub.stop(None);
    assert!(!hub.is_open());
    timeout(WAIT, async {
        while !closed.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("subscriber must learn the connection closed");
    hub.unsubscribe(id);
}

#[tokio::test]
async fn reader_replies_to_server_ping() {
    let (listener, server) = bind().await;
    let server_task = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            if line.starts_with("NICK") {
                write.write_all(b":irc.test 001 bob :Welcome\r\n").await.unwrap();
                write.write_all(b"PING :keepalive-token\r\n").await.unwrap();
            } else if line == "PONG :keepalive-token" {
                return true;
            }
        }
        false
    });

    let (conn, initial) = registration::connect(&server, &identity("bob", &[]), Vec::new())
        .await
        .unwrap();
    let hub = Broadcast::start(conn, initial);

    assert!(timeout(WAIT, server_task).await.unwrap().unwrap());
    hub.stop(None);
}

fn single_network_store(server: ServerSpec) -> StaticStore {
    let mut store = StaticStore::new();
    store.insert(
        AccountId(1),
        NetworkId(7),
        NetworkRecord {
            server,
            identity: identity("bob", &["bob_"]),
            channels: Vec::new(),
        },
    );
    store
}

#[tokio::test]
async fn supervisor_connects_and_routes_subscribers() {
    let (listener, server) = bind().await;
    let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<()>();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            if line.starts_with("NICK") {
                write.write_all(b":irc.test 001 bob :Welcome\r\n").await.unwrap();
                break;
            }
        }
        trigger_rx.recv().await;
        write
            .write_all(b":carol!c@h PRIVMSG #rust :hello\r\n")
            .await
            .unwrap();
        sleep(Duration::from_secs(120)).await;
    });

    let supervisor = Arc::new(Supervisor::new(single_network_store(server)));
    supervisor.reconnect_all().await.unwrap();

    let map = supervisor.connections().await;
    let hub = Arc::clone(&map[&AccountId(1)][&NetworkId(7)]);
    assert!(hub.is_open());

    let (events_tx, events_rx) = mpsc::channel(8);
    let event_loop = Arc::clone(&supervisor);
    tokio::spawn(async move { event_loop.run_events(events_rx).await });

    let (collector, mut rx, _closed) = Collector::new();
    events_tx
        .send(AccountEvent {
            account: AccountId(1),
            payload: AccountPayload::ClientConnected {
                client: Uuid::new_v4(),
                handler: collector,
            },
        })
        .await
        .unwrap();

    timeout(WAIT, async {
        while hub.subscriber_count() == 0 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("event loop must attach the subscriber");

    trigger_tx.send(()).unwrap();
    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    match event {
        Event::Privmsg { to, text, .. } => {
            assert_eq!(to, "#rust");
            assert_eq!(text, "hello");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    supervisor.stop_all("shutting down").await;
}

#[tokio::test]
async fn supervisor_skips_live_connections_on_refresh() {
    let (listener, server) = bind().await;
    tokio::spawn(async move {
        // Accept exactly one client; a second connect attempt would hang.
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            if line.starts_with("NICK") {
                write.write_all(b":irc.test 001 bob :Welcome\r\n").await.unwrap();
            }
        }
    });

    let supervisor = Supervisor::new(single_network_store(server));
    supervisor.reconnect_all().await.unwrap();
    let first = supervisor.connections().await;
    let hub_before = Arc::clone(&first[&AccountId(1)][&NetworkId(7)]);

    supervisor.reconnect_all().await.unwrap();
    let second = supervisor.connections().await;
    let hub_after = Arc::clone(&second[&AccountId(1)][&NetworkId(7)]);
    assert!(Arc::ptr_eq(&hub_before, &hub_after));

    supervisor.stop_all("done").await;
}

#[tokio::test]
async fn supervisor_skips_unreachable_servers() {
    let (listener, server) = bind().await;
    drop(listener);

    let supervisor = Supervisor::new(single_network_store(server));
    supervisor.reconnect_all().await.unwrap();
    assert!(!supervisor.connections().await.contains_key(&AccountId(1)));
}

struct FailingStore;

#[async_trait]
impl Store for FailingStore {
    async fn select_accounts(&self) -> Result<Vec<AccountId>> {
        Err(Error::Store("database unavailable".to_string()))
    }

    async fn select_servers_to_reconnect(
        &self,
        _account: AccountId,
    ) -> Result<Vec<(NetworkId, ServerSpec)>> {
        Err(Error::Store("database unavailable".to_string()))
    }

    async fn select_network_identity(
        &self,
        _account: AccountId,
        _network: NetworkId,
    ) -> Result<Option<Identity>> {
        Err(Error::Store("database unavailable".to_string()))
    }

    async fn select_channels(
        &self,
        _account: AccountId,
        _network: NetworkId,
    ) -> Result<Vec<(String, Option<String>)>> {
        Err(Error::Store("database unavailable".to_string()))
    }
}

#[tokio::test]
async fn store_error_aborts_refresh() {
    let supervisor = Supervisor::new(FailingStore);
    assert!(matches!(
        supervisor.reconnect_all().await,
        Err(Error::Store(_))
    ));
    assert!(supervisor.connections().await.is_empty());
}
