//! Outbound transport: plain TCP or TLS with line-oriented IRC framing
//!
//! A `Transport` owns the whole duplex stream until the connection splits
//! into its reader/writer halves. TLS is negotiated here: immediately for
//! `TlsMode::Required`, via a STARTTLS probe for `TlsMode::Opportunistic`.
//! Messages consumed while probing are handed back so the registration
//! handshake can replay them head-first.

use crate::{Error, Message, NumericReply, Result, ServerSpec, TlsMode};
use crate::message::Command;
use chrono::{DateTime, Utc};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf,
    ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// A TCP stream that may have been upgraded to TLS
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Read one IRC message from a buffered stream. Empty lines are skipped,
/// bytes that are not valid UTF-8 are decoded lossily, and the timestamp is
/// taken when the full line has arrived. Returns the raw line length too,
/// for the connection's transfer counters.
async fn read_wire<R>(reader: &mut R) -> Result<(DateTime<Utc>, Message, usize)>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(Error::Eof);
        }
        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }
        let message = Message::parse(&line)?;
        return Ok((Utc::now(), message, n));
    }
}

async fn write_wire<W>(writer: &mut W, message: &Message) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let wire = message.to_wire();
    writer.write_all(wire.as_bytes()).await?;
    writer.flush().await?;
    Ok(wire.len())
}

fn tls_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn tls_handshake(host: &str, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
    let domain = rustls::ServerName::try_from(host)
        .map_err(|e| Error::Connection(format!("invalid TLS server name {}: {}", host, e)))?;
    let stream = tls_connector().connect(domain, stream).await?;
    Ok(stream)
}

/// Bidirectional byte channel to one IRC server
pub struct Transport {
    stream: BufReader<MaybeTlsStream>,
    encrypted: bool,
}

impl Transport {
    /// Open a transport to `server`, performing TLS negotiation according to
    /// its mode. Returns the transport plus any messages consumed while
    /// probing STARTTLS; the caller replays those to the handshake.
    pub async fn connect(server: &ServerSpec) -> Result<(Self, Vec<(DateTime<Utc>, Message)>)> {
        let tcp = TcpStream::connect((server.host.as_str(), server.port))
            .await
            .map_err(|e| Error::Connection(format!("connect to {} failed: {}", server, e)))?;

        match server.tls {
            TlsMode::None => Ok((Self::plain(tcp), Vec::new())),
            TlsMode::Required => {
                let tls = tls_handshake(&server.host, tcp).await?;
                Ok((Self::encrypted(tls), Vec::new()))
            }
            TlsMode::Opportunistic => Self::probe_starttls(server, tcp).await,
        }
    }

    fn plain(tcp: TcpStream) -> Self {
        Self {
            stream: BufReader::new(MaybeTlsStream::Plain(tcp)),
            encrypted: false,
        }
    }

    fn encrypted(tls: TlsStream<TcpStream>) -> Self {
        Self {
            stream: BufReader::new(MaybeTlsStream::Tls(Box::new(tls))),
            encrypted: true,
        }
    }

    /// Probe for STARTTLS on a plain stream. `670` upgrades; `691` or the
    /// unknown-command/not-registered errors mean the server does not offer
    /// it and the session stays plain. Everything else read while probing is
    /// buffered for replay.
    async fn probe_starttls(
        server: &ServerSpec,
        tcp: TcpStream,
    ) -> Result<(Self, Vec<(DateTime<Utc>, Message)>)> {
        let mut transport = Self::plain(tcp);
        transport.write_message(&Message::starttls()).await?;

        let mut consumed = Vec::new();
        loop {
            let (at, message) = match transport.read_message().await {
                Ok(item) => item,
                Err(e) if e.is_transport_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("discarding unparseable line while probing STARTTLS: {}", e);
                    continue;
                }
            };
            match message.command {
                Command::Numeric(code) if code == NumericReply::RplStartTls.code() => {
                    // The server stays silent between 670 and the handshake,
                    // so the read buffer is empty here.
                    let tcp = match transport.stream.into_inner() {
                        MaybeTlsStream::Plain(tcp) => tcp,
                        MaybeTlsStream::Tls(_) => unreachable!("probe runs on a plain stream"),
                    };
                    let tls = tls_handshake(&server.host, tcp).await?;
                    tracing::debug!("STARTTLS upgrade to {} complete", server);
                    return Ok((Self::encrypted(tls), consumed));
                }
                Command::Numeric(code) if code == NumericReply::ErrStartTls.code() => {
                    tracing::debug!("{} refused STARTTLS, continuing in plain text", server);
                    return Ok((transport, consumed));
                }
                // 421 unknown command / 451 not registered: no STARTTLS support
                Command::Numeric(421) | Command::Numeric(451) => {
                    tracing::debug!("{} does not know STARTTLS, continuing in plain text", server);
                    return Ok((transport, consumed));
                }
                _ => consumed.push((at, message)),
            }
        }
    }

    /// Whether the stream is TLS-protected
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Read the next message with its arrival timestamp
    pub async fn read_message(&mut self) -> Result<(DateTime<Utc>, Message)> {
        let (at, message, _) = read_wire(&mut self.stream).await?;
        Ok((at, message))
    }

    /// Write one message and flush
    pub async fn write_message(&mut self, message: &Message) -> Result<usize> {
        write_wire(&mut self.stream, message).await
    }

    /// Split into independently owned read and write halves. The split keeps
    /// the read buffer, so bytes the server pipelined ahead are not lost.
    pub fn split(self) -> (TransportReader, TransportWriter) {
        let (read, write) = tokio::io::split(self.stream);
        (
            TransportReader {
                stream: BufReader::new(read),
            },
            TransportWriter { stream: write },
        )
    }
}

/// Read half of a split transport, owned by the connection's reader task
pub struct TransportReader {
    stream: BufReader<ReadHalf<BufReader<MaybeTlsStream>>>,
}

impl TransportReader {
    /// Read the next message with its arrival timestamp and raw byte length
    pub async fn read_message(&mut self) -> Result<(DateTime<Utc>, Message, usize)> {
        read_wire(&mut self.stream).await
    }
}

/// Write half of a split transport, owned by the connection's writer task
pub struct TransportWriter {
    stream: WriteHalf<BufReader<MaybeTlsStream>>,
}

impl TransportWriter {
    /// Write one message and flush. Returns the number of bytes written.
    pub async fn write_message(&mut self, message: &Message) -> Result<usize> {
        write_wire(&mut self.stream, message).await
    }

    /// Close the write side, sending close_notify on TLS streams.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
