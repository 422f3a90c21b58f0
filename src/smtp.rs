//! Hand-built SMTP delivery.
//!
//! One blocking session per message: dial (implicit TLS or plaintext +
//! STARTTLS upgrade), EHLO, AUTH PLAIN, envelope, DATA, QUIT. The session
//! logic is generic over `Read + Write` so tests drive it with a scripted
//! in-memory stream; the network-facing [`SmtpMailer`] runs it over
//! `TcpStream` / `rustls::StreamOwned` and is called through
//! `spawn_blocking` from the orchestrator.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::config::{ConnectionType, EmailConfig};
use crate::error::TransportError;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);
const EHLO_NAME: &str = "localhost";

/// SMTP envelope: protocol-level sender and recipients, distinct from the
/// message's own headers. BCC addresses exist only here.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: String,
    pub to: Vec<String>,
    pub bcc: Vec<String>,
}

/// Narrow transport seam: accepts envelope + message bytes. Implemented by
/// [`SmtpMailer`]; tests substitute a recording fake.
pub trait MailTransport: Send + Sync {
    fn deliver(&self, envelope: &Envelope, message: &[u8]) -> Result<(), TransportError>;
}

/// Progress of one delivery session. `Failed` absorbs any error; a session
/// never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Secured,
    Authenticated,
    SenderSet,
    RecipientsSet,
    Delivered,
    Closed,
    Failed,
}

/// A parsed server reply: final status code plus all reply lines.
#[derive(Debug)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    fn text(&self) -> String {
        format!("{} {}", self.code, self.lines.join(" / "))
    }
}

/// One SMTP session over a byte stream.
pub struct Session<S: Read + Write> {
    stream: S,
    pub state: SessionState,
}

impl<S: Read + Write> Session<S> {
    pub fn new(stream: S, state: SessionState) -> Self {
        Self { stream, state }
    }

    fn into_stream(self) -> S {
        self.stream
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => {
                    self.state = SessionState::Failed;
                    return Err(TransportError::ConnectionClosed);
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        buf.truncate(buf.len() - 2);
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => {
                    self.state = SessionState::Failed;
                    return Err(TransportError::Io(e));
                }
            }
        }
    }

    /// Read a complete (possibly multiline `NNN-`) reply.
    fn read_reply(&mut self) -> Result<Reply, TransportError> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let code: u16 = line.get(..3).and_then(|c| c.parse().ok()).ok_or_else(|| {
                self.state = SessionState::Failed;
                TransportError::UnexpectedReply {
                    command: "(reply)".into(),
                    reply: line.clone(),
                }
            })?;
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line.get(4..).unwrap_or("").to_string());
            if !more {
                return Ok(Reply { code, lines });
            }
        }
    }

    /// Write to the stream, entering `Failed` on any IO error so the send
    /// path keeps the same state bookkeeping as the read path.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if let Err(e) = self.stream.write_all(bytes) {
            self.state = SessionState::Failed;
            return Err(TransportError::Io(e));
        }
        Ok(())
    }

    fn send_flush(&mut self) -> Result<(), TransportError> {
        if let Err(e) = self.stream.flush() {
            self.state = SessionState::Failed;
            return Err(TransportError::Io(e));
        }
        Ok(())
    }

    fn command(&mut self, line: &str) -> Result<Reply, TransportError> {
        self.send(line.as_bytes())?;
        self.send(b"\r\n")?;
        self.send_flush()?;
        self.read_reply()
    }

    fn expect(
        &mut self,
        command: &str,
        reply: Reply,
        accept: &[u16],
    ) -> Result<Reply, TransportError> {
        if accept.contains(&reply.code) {
            Ok(reply)
        } else {
            self.state = SessionState::Failed;
            Err(TransportError::UnexpectedReply {
                command: command.to_string(),
                reply: reply.text(),
            })
        }
    }

    /// Consume the server greeting (220).
    pub fn greeting(&mut self) -> Result<(), TransportError> {
        let reply = self.read_reply()?;
        self.expect("greeting", reply, &[220])?;
        Ok(())
    }

    pub fn ehlo(&mut self) -> Result<(), TransportError> {
        let reply = self.command(&format!("EHLO {EHLO_NAME}"))?;
        self.expect("EHLO", reply, &[250])?;
        Ok(())
    }

    /// Issue the STARTTLS upgrade command (the caller then wraps the stream).
    pub fn starttls(&mut self) -> Result<(), TransportError> {
        let reply = self.command("STARTTLS")?;
        self.expect("STARTTLS", reply, &[220])?;
        Ok(())
    }

    /// AUTH PLAIN. Failure is terminal for this delivery attempt.
    pub fn auth_plain(&mut self, username: &str, password: &str) -> Result<(), TransportError> {
        let credentials = BASE64.encode(format!("\0{username}\0{password}"));
        let reply = self.command(&format!("AUTH PLAIN {credentials}"))?;
        if reply.code != 235 {
            self.state = SessionState::Failed;
            return Err(TransportError::AuthRejected {
                reply: reply.text(),
            });
        }
        self.state = SessionState::Authenticated;
        Ok(())
    }

    pub fn mail_from(&mut self, sender: &str) -> Result<(), TransportError> {
        let reply = self.command(&format!("MAIL FROM:<{sender}>"))?;
        self.expect("MAIL FROM", reply, &[250])?;
        self.state = SessionState::SenderSet;
        Ok(())
    }

    /// RCPT TO for every To then every BCC address. Any single rejection
    /// aborts the delivery; a partial envelope is never accepted.
    pub fn rcpt_all(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        for address in envelope.to.iter().chain(envelope.bcc.iter()) {
            let reply = self.command(&format!("RCPT TO:<{address}>"))?;
            if reply.code != 250 && reply.code != 251 {
                self.state = SessionState::Failed;
                return Err(TransportError::RecipientRejected {
                    address: address.clone(),
                    reply: reply.text(),
                });
            }
        }
        self.state = SessionState::RecipientsSet;
        Ok(())
    }

    /// DATA phase: transmit the message with leading-dot transparency and a
    /// `CRLF . CRLF` terminator.
    pub fn data(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let reply = self.command("DATA")?;
        self.expect("DATA", reply, &[354])?;

        let mut at_line_start = true;
        for &b in message {
            if at_line_start && b == b'.' {
                self.send(b".")?;
            }
            self.send(&[b])?;
            at_line_start = b == b'\n';
        }
        if !message.ends_with(b"\r\n") {
            self.send(b"\r\n")?;
        }
        self.send(b".\r\n")?;
        self.send_flush()?;

        let reply = self.read_reply()?;
        self.expect("DATA body", reply, &[250])?;
        self.state = SessionState::Delivered;
        Ok(())
    }

    /// QUIT. The delivery already succeeded; a broken reply is ignored.
    pub fn quit(&mut self) {
        let _ = self.stream.write_all(b"QUIT\r\n");
        let _ = self.stream.flush();
        let _ = self.read_reply();
        self.state = SessionState::Closed;
    }
}

/// Drive a secured session through auth, envelope, data and quit.
fn run_delivery<S: Read + Write>(
    session: &mut Session<S>,
    username: &str,
    password: &str,
    envelope: &Envelope,
    message: &[u8],
) -> Result<(), TransportError> {
    debug_assert_eq!(session.state, SessionState::Secured);
    session.auth_plain(username, password)?;
    session.mail_from(&envelope.from)?;
    session.rcpt_all(envelope)?;
    session.data(message)?;
    session.quit();
    Ok(())
}

/// Network-facing SMTP transport.
pub struct SmtpMailer {
    server: String,
    port: u16,
    connection_type: ConnectionType,
    username: String,
    password: SecretString,
    tls_config: Arc<rustls::ClientConfig>,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        Self {
            server: config.server.clone(),
            port: config.port,
            connection_type: config.connection_type,
            username: config.username.clone(),
            password: config.password.clone(),
            tls_config,
        }
    }

    fn connect(&self) -> Result<TcpStream, TransportError> {
        let addr = format!("{}:{}", self.server, self.port);
        let tcp = TcpStream::connect((&*self.server, self.port)).map_err(|source| {
            TransportError::Connect {
                addr: addr.clone(),
                source,
            }
        })?;
        tcp.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        tcp.set_write_timeout(Some(SOCKET_TIMEOUT))?;
        Ok(tcp)
    }

    fn tls_connection(&self) -> Result<rustls::ClientConnection, TransportError> {
        let server_name = rustls::pki_types::ServerName::try_from(self.server.clone())
            .map_err(|e| TransportError::Connect {
                addr: self.server.clone(),
                source: std::io::Error::other(e),
            })?;
        Ok(rustls::ClientConnection::new(
            Arc::clone(&self.tls_config),
            server_name,
        )?)
    }

    fn deliver_tls(&self, envelope: &Envelope, message: &[u8]) -> Result<(), TransportError> {
        let tcp = self.connect()?;
        let conn = self.tls_connection()?;
        let tls = rustls::StreamOwned::new(conn, tcp);

        let mut session = Session::new(tls, SessionState::Connected);
        // A plaintext SMTP banner where a TLS handshake is expected surfaces
        // as an invalid-data read error on the first byte.
        session.greeting().map_err(|e| match e {
            TransportError::Io(ref io) if io.kind() == std::io::ErrorKind::InvalidData => {
                TransportError::ConnectionTypeMismatch {
                    detail: format!(
                        "server {} did not begin a TLS handshake (plaintext SMTP?)",
                        self.server
                    ),
                }
            }
            other => other,
        })?;
        session.ehlo()?;
        session.state = SessionState::Secured;

        run_delivery(
            &mut session,
            &self.username,
            self.password.expose_secret(),
            envelope,
            message,
        )
    }

    fn deliver_starttls(&self, envelope: &Envelope, message: &[u8]) -> Result<(), TransportError> {
        let tcp = self.connect()?;
        let mut session = Session::new(tcp, SessionState::Connected);
        // Implicit-TLS ports drop plaintext clients before any banner.
        session.greeting().map_err(|e| match e {
            TransportError::ConnectionClosed => TransportError::ConnectionTypeMismatch {
                detail: format!(
                    "server {} closed the connection before greeting (implicit-TLS port?)",
                    self.server
                ),
            },
            other => other,
        })?;
        session.ehlo()?;
        session.starttls()?;

        let tcp = session.into_stream();
        let conn = self.tls_connection()?;
        let tls = rustls::StreamOwned::new(conn, tcp);
        let mut session = Session::new(tls, SessionState::Secured);
        session.ehlo()?;

        run_delivery(
            &mut session,
            &self.username,
            self.password.expose_secret(),
            envelope,
            message,
        )
    }
}

impl MailTransport for SmtpMailer {
    fn deliver(&self, envelope: &Envelope, message: &[u8]) -> Result<(), TransportError> {
        debug!(
            server = %self.server,
            port = self.port,
            recipients = envelope.to.len() + envelope.bcc.len(),
            "Starting SMTP delivery"
        );
        match self.connection_type {
            ConnectionType::Tls => self.deliver_tls(envelope, message),
            ConnectionType::Starttls => self.deliver_starttls(envelope, message),
        }
    }
}
