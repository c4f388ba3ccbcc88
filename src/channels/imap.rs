//! IMAP mailbox over TLS.
//!
//! A small blocking IMAP4rev1 client on rustls, driven from async code
//! through `spawn_blocking`. The session is moved into the blocking task
//! for each operation and handed back afterwards, so it always has exactly
//! one owner.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::channels::email_types::parse_raw_message;
use crate::channels::{IncomingMessage, Mailbox};
use crate::config::MailboxConfig;
use crate::error::ChannelError;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest literal (message body) read into memory. Bigger ones are
/// drained from the socket and reported as `TooLarge`.
const MAX_LITERAL_BYTES: usize = 50 * 1024 * 1024;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Low-level IMAP failures.
#[derive(Debug, thiserror::Error)]
pub enum ImapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Invalid server name: {0}")]
    ServerName(#[from] rustls_pki_types::InvalidDnsNameError),

    #[error("Connection closed by server")]
    Closed,

    /// Server answered NO or BAD. The session is still usable.
    #[error("Server rejected {command}: {response}")]
    Rejected { command: String, response: String },

    /// A literal over `MAX_LITERAL_BYTES` was skipped. The session is still usable.
    #[error("Literal of {size} bytes exceeds the {MAX_LITERAL_BYTES} byte limit")]
    TooLarge { size: usize },

    #[error("Not connected")]
    NotConnected,

    #[error("IMAP task failed: {0}")]
    Task(String),
}

impl ImapError {
    /// Whether the session survives this error.
    fn session_usable(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::TooLarge { .. })
    }
}

/// Response to one tagged command.
#[derive(Debug, Default)]
struct Response {
    /// Untagged (`*`) and continuation lines, CRLF stripped.
    untagged: Vec<String>,
    /// Literal payloads in the order received.
    literals: Vec<Vec<u8>>,
}

/// An authenticated session with a selected folder.
struct ImapSession {
    stream: BufReader<TlsStream>,
    next_tag: u32,
}

impl ImapSession {
    /// Connect, log in and select `config.folder`.
    fn open(config: &MailboxConfig) -> Result<(Self, u32), ImapError> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;
        tcp.set_write_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(ImapError::Rejected {
                command: "greeting".into(),
                response: greeting,
            });
        }

        session.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))?;
        let selected = session.command(&format!("SELECT {}", quote(&config.folder)))?;
        let exists = selected
            .untagged
            .iter()
            .find_map(|line| parse_exists(line))
            .unwrap_or(0);

        Ok((session, exists))
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        read_line(&mut self.stream)
    }

    /// Send a tagged command and collect everything up to its completion.
    fn command(&mut self, cmd: &str) -> Result<Response, ImapError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        read_response(&mut self.stream, &tag, cmd)
    }

    fn search_unseen_since(&mut self, since: DateTime<Utc>) -> Result<Vec<u32>, ImapError> {
        let response = self.command(&format!("UID SEARCH UNSEEN SINCE {}", imap_date(since)))?;
        Ok(response
            .untagged
            .iter()
            .flat_map(|line| parse_search(line))
            .collect())
    }

    fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>, ImapError> {
        let mut response = self.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        Ok(response.literals.drain(..).next())
    }

    fn mark_seen(&mut self, uid: u32) -> Result<(), ImapError> {
        self.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
        Ok(())
    }

    fn logout(&mut self) -> Result<(), ImapError> {
        self.command("LOGOUT")?;
        Ok(())
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String, ImapError> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Err(ImapError::Closed);
    }
    let line = String::from_utf8_lossy(&buf);
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Read lines and literals up to the completion line for `tag`.
fn read_response<R: BufRead>(reader: &mut R, tag: &str, cmd: &str) -> Result<Response, ImapError> {
    let mut response = Response::default();
    let mut oversized = None;
    loop {
        let line = read_line(reader)?;
        if let Some(len) = literal_len(&line) {
            if len > MAX_LITERAL_BYTES {
                // Keep the stream in sync without buffering the payload.
                std::io::copy(&mut reader.by_ref().take(len as u64), &mut std::io::sink())?;
                oversized = Some(len);
            } else {
                let mut literal = vec![0u8; len];
                reader.read_exact(&mut literal)?;
                response.literals.push(literal);
            }
        }

        if let Some(status) = line.strip_prefix(tag).and_then(|rest| rest.strip_prefix(' ')) {
            if !status.starts_with("OK") {
                // Never echo credentials back into logs.
                let command = cmd.split_whitespace().next().unwrap_or(cmd).to_string();
                return Err(ImapError::Rejected {
                    command,
                    response: status.to_string(),
                });
            }
            return match oversized {
                Some(size) => Err(ImapError::TooLarge { size }),
                None => Ok(response),
            };
        }
        response.untagged.push(line);
    }
}

/// Fetch and decode every unseen message since `since`.
fn fetch_messages(
    session: &mut ImapSession,
    since: DateTime<Utc>,
) -> Result<Vec<IncomingMessage>, ImapError> {
    let uids = session.search_unseen_since(since)?;
    if uids.is_empty() {
        return Ok(Vec::new());
    }
    info!("Found {} new emails", uids.len());

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let raw = match session.fetch_raw(uid) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!(uid, "FETCH returned no message body, skipping");
                continue;
            }
            Err(e) if e.session_usable() => {
                let too_large = matches!(e, ImapError::TooLarge { .. });
                let e = ChannelError::Parse {
                    reference: format!("uid {uid}"),
                    reason: e.to_string(),
                };
                warn!(uid, error = %e, "Could not fetch message, skipping");
                // An oversized message would be re-downloaded every cycle.
                if too_large {
                    if let Err(e) = session.mark_seen(uid) {
                        warn!(uid, error = %e, "Error marking email as read");
                    }
                }
                continue;
            }
            Err(e) => return Err(e),
        };

        match parse_raw_message(uid, &raw) {
            Ok(message) => {
                info!(
                    from = %message.from,
                    subject = %message.subject,
                    message_id = %message.id,
                    "Parsed new email"
                );
                messages.push(message);
            }
            Err(e) => {
                warn!(uid, error = %e, "Error parsing email");
                // Keep an undecodable message from reappearing every cycle.
                if let Err(e) = session.mark_seen(uid) {
                    warn!(uid, error = %e, "Error marking email as read");
                }
            }
        }
    }
    Ok(messages)
}

/// `Mailbox` backed by an IMAP server.
pub struct ImapMailbox {
    config: Arc<MailboxConfig>,
    session: Option<ImapSession>,
}

impl ImapMailbox {
    pub fn new(config: Arc<MailboxConfig>) -> Self {
        Self {
            config,
            session: None,
        }
    }

    fn target(&self) -> String {
        format!("imaps://{}:{}", self.config.host, self.config.port)
    }

    /// Run `op` on the session in a blocking task. The session is put back
    /// unless the error shows the connection is gone.
    async fn with_session<T, F>(&mut self, op: F) -> Result<T, ImapError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, ImapError> + Send + 'static,
    {
        let mut session = self.session.take().ok_or(ImapError::NotConnected)?;
        let joined = tokio::task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await;

        match joined {
            Ok((session, Ok(value))) => {
                self.session = Some(session);
                Ok(value)
            }
            Ok((session, Err(e))) => {
                if e.session_usable() {
                    self.session = Some(session);
                } else {
                    warn!(error = %e, "IMAP session lost, will reconnect next cycle");
                }
                Err(e)
            }
            Err(e) => Err(ImapError::Task(e.to_string())),
        }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.session.is_some() {
            return Ok(());
        }
        let config = Arc::clone(&self.config);
        let opened = tokio::task::spawn_blocking(move || ImapSession::open(&config))
            .await
            .map_err(|e| ImapError::Task(e.to_string()))
            .and_then(|r| r);

        match opened {
            Ok((session, exists)) => {
                info!(
                    host = %self.config.host,
                    folder = %self.config.folder,
                    total_messages = exists,
                    "IMAP connection ready, inbox opened"
                );
                self.session = Some(session);
                Ok(())
            }
            Err(e) => Err(ChannelError::Connection {
                target: self.target(),
                reason: e.to_string(),
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn fetch_unseen_since(
        &mut self,
        since: DateTime<Utc>,
    ) -> Result<Vec<IncomingMessage>, ChannelError> {
        self.with_session(move |session| fetch_messages(session, since))
            .await
            .map_err(|e| match e {
                ImapError::NotConnected => ChannelError::NotConnected {
                    target: self.target(),
                },
                other => ChannelError::Fetch(other.to_string()),
            })
    }

    async fn mark_read(&mut self, message: &IncomingMessage) -> Result<(), ChannelError> {
        let uid = message.uid;
        self.with_session(move |session| session.mark_seen(uid))
            .await
            .map_err(|e| ChannelError::Fetch(format!("marking uid {uid} read: {e}")))
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        if self.session.is_none() {
            return Ok(());
        }
        let result = self.with_session(|session| session.logout()).await;
        // Dropping the session closes the socket whatever LOGOUT said.
        self.session = None;
        match result {
            Ok(()) => {
                info!("IMAP connection ended");
                Ok(())
            }
            Err(e) => Err(ChannelError::Connection {
                target: self.target(),
                reason: format!("logout failed: {e}"),
            }),
        }
    }
}

// ── Protocol helpers ────────────────────────────────────────────────

/// Quote a string argument, escaping `\` and `"`.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// SEARCH date argument, e.g. `16-Oct-2026`.
fn imap_date(at: DateTime<Utc>) -> String {
    at.format("%d-%b-%Y").to_string()
}

/// Byte count of a literal announced at the end of a line: `... {123}`.
fn literal_len(line: &str) -> Option<usize> {
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].parse().ok()
}

/// UIDs from a `* SEARCH 1 2 3` line.
fn parse_search(line: &str) -> Vec<u32> {
    match line.strip_prefix("* SEARCH") {
        Some(rest) => rest
            .split_whitespace()
            .filter_map(|n| n.parse().ok())
            .collect(),
        None => Vec::new(),
    }
}

/// Message count from a `* 42 EXISTS` line.
fn parse_exists(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("* ")?;
    let (count, kind) = rest.split_once(' ')?;
    (kind.trim() == "EXISTS").then(|| count.parse().ok()).flatten()
}
