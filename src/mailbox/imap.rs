//! Blocking IMAP4rev1 client over TLS.
//!
//! Only the handful of commands the pipeline needs: LOGIN, SELECT,
//! SEARCH ALL, FETCH BODY.PEEK[] and LOGOUT. Responses are read line by
//! line; `{N}` literals are read byte-exact so binary message bodies
//! survive. LOGIN arguments that cannot be quoted are sent as literals.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::debug;

use super::{Credentials, Endpoint, MailboxConnector, MailboxSession};
use crate::error::MailboxError;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Opens [`ImapSession`]s over implicit TLS.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImapConnector;

impl MailboxConnector for ImapConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let tls = open_tls(endpoint)?;
        let mut session = ImapSession::new(tls, &endpoint.host);
        session.read_greeting()?;
        session.login(credentials)?;
        Ok(Box::new(session))
    }
}

fn open_tls(endpoint: &Endpoint) -> Result<TlsStream, MailboxError> {
    let connection_err = |reason: String| MailboxError::Connection {
        host: endpoint.host.clone(),
        reason,
    };

    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .map_err(|e| connection_err(e.to_string()))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls::pki_types::ServerName::try_from(endpoint.host.clone())
        .map_err(|e| connection_err(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connection_err(e.to_string()))?;

    Ok(rustls::StreamOwned::new(conn, tcp))
}

// ── Responses ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    No,
    Bad,
}

/// One untagged (`* ...`) response, with any literals it carried.
#[derive(Debug, Default)]
struct Untagged {
    /// Response text with each literal replaced by its `{N}` marker.
    line: String,
    literals: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct Response {
    untagged: Vec<Untagged>,
    status: Status,
    /// Text after the status word of the tagged completion.
    text: String,
}

impl Response {
    fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Parse a trailing `{N}` or `{N+}` literal marker.
fn literal_len(line: &str) -> Option<usize> {
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].trim_end_matches('+').parse().ok()
}

/// Quote a string for use as an IMAP quoted-string.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// A command argument, sent inline or as a synchronizing literal.
#[derive(Debug, PartialEq, Eq)]
enum Arg<'a> {
    Quoted(String),
    Literal(&'a [u8]),
}

/// Quoted strings cannot carry CR, LF, NUL or 8-bit bytes; those go as `{N}`
/// literals.
fn astring(s: &str) -> Arg<'_> {
    let quotable = |b: u8| b.is_ascii() && !matches!(b, b'\r' | b'\n' | 0);
    if s.bytes().all(quotable) {
        Arg::Quoted(quote(s))
    } else {
        Arg::Literal(s.as_bytes())
    }
}

/// Parse the text after a command's tag into its completion.
fn completion(verb: &str, rest: &str, untagged: Vec<Untagged>) -> Result<Response, MailboxError> {
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        other => {
            return Err(MailboxError::Protocol(format!(
                "unknown completion status {other} for {verb}"
            )));
        }
    };
    Ok(Response {
        untagged,
        status,
        text: text.to_string(),
    })
}

// ── Session ─────────────────────────────────────────────────────────

/// An IMAP session over any byte stream.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    host: String,
    tag_counter: u32,
}

impl<S: Read + Write> ImapSession<S> {
    pub fn new(stream: S, host: &str) -> Self {
        Self {
            stream: BufReader::new(stream),
            host: host.to_string(),
            tag_counter: 0,
        }
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{}", self.tag_counter)
    }

    /// Read one CRLF-terminated line, without the terminator.
    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Connection {
                host: self.host.clone(),
                reason: "connection closed by server".into(),
            });
        }
        while buf.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
            buf.pop();
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read one logical response line, following any literals it announces.
    fn read_logical_line(&mut self) -> Result<Untagged, MailboxError> {
        let mut logical = Untagged::default();
        loop {
            let line = self.read_line()?;
            logical.line.push_str(&line);
            let Some(len) = literal_len(&line) else {
                return Ok(logical);
            };
            let mut literal = vec![0u8; len];
            self.stream.read_exact(&mut literal)?;
            logical.literals.push(literal);
        }
    }

    /// Read the server greeting.
    fn read_greeting(&mut self) -> Result<(), MailboxError> {
        let greeting = self.read_line().map_err(|e| MailboxError::Connection {
            host: self.host.clone(),
            reason: e.to_string(),
        })?;
        if greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(MailboxError::Connection {
                host: self.host.clone(),
                reason: format!("unexpected greeting: {greeting}"),
            })
        }
    }

    /// Send one command and collect responses up to its tagged completion.
    fn run(&mut self, command: &str) -> Result<Response, MailboxError> {
        self.run_with_args(command, &[])
    }

    /// Like [`run`](Self::run), with `args` appended to `command`. Each
    /// literal argument waits for the server's `+` continuation first.
    fn run_with_args(
        &mut self,
        command: &str,
        args: &[Arg<'_>],
    ) -> Result<Response, MailboxError> {
        let tag = self.next_tag();
        let verb = command.split_whitespace().next().unwrap_or_default();
        debug!(tag = %tag, verb, "IMAP command");

        let mut pending = format!("{tag} {command}").into_bytes();
        for arg in args {
            pending.push(b' ');
            match arg {
                Arg::Quoted(text) => pending.extend_from_slice(text.as_bytes()),
                Arg::Literal(data) => {
                    pending.extend_from_slice(format!("{{{}}}\r\n", data.len()).as_bytes());
                    self.send(&pending)?;
                    if let Some(refused) = self.await_continuation(&tag, verb)? {
                        return Ok(refused);
                    }
                    pending = data.to_vec();
                }
            }
        }
        pending.extend_from_slice(b"\r\n");
        self.send(&pending)?;

        let prefix = format!("{tag} ");
        let mut untagged = Vec::new();
        loop {
            let logical = self.read_logical_line()?;
            if let Some(rest) = logical.line.strip_prefix(&prefix) {
                return completion(verb, rest, untagged);
            }
            if !logical.line.starts_with("* ") {
                return Err(MailboxError::Protocol(format!(
                    "unexpected line in response to {verb}: {}",
                    logical.line
                )));
            }
            untagged.push(logical);
        }
    }

    /// Wait for the continuation request that precedes literal data.
    /// Returns the tagged completion instead when the server refuses.
    fn await_continuation(
        &mut self,
        tag: &str,
        verb: &str,
    ) -> Result<Option<Response>, MailboxError> {
        let prefix = format!("{tag} ");
        loop {
            let logical = self.read_logical_line()?;
            if logical.line.starts_with('+') {
                return Ok(None);
            }
            if let Some(rest) = logical.line.strip_prefix(&prefix) {
                return completion(verb, rest, Vec::new()).map(Some);
            }
            if !logical.line.starts_with("* ") {
                return Err(MailboxError::Protocol(format!(
                    "expected continuation for {verb}, got: {}",
                    logical.line
                )));
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), MailboxError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn login(&mut self, credentials: &Credentials) -> Result<(), MailboxError> {
        let args = [
            astring(&credentials.address),
            astring(credentials.secret.expose_secret()),
        ];
        let response = self.run_with_args("LOGIN", &args).map_err(|e| match e {
            MailboxError::Io(io) => MailboxError::Connection {
                host: self.host.clone(),
                reason: io.to_string(),
            },
            other => other,
        })?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(MailboxError::Authentication {
                host: self.host.clone(),
                reason: response.text,
            })
        }
    }
}

impl<S: Read + Write + Send> MailboxSession for ImapSession<S> {
    fn select(&mut self, mailbox: &str) -> Result<u32, MailboxError> {
        let response = self.run(&format!("SELECT {}", quote(mailbox)))?;
        if !response.is_ok() {
            return Err(MailboxError::Select {
                mailbox: mailbox.to_string(),
                reason: response.text,
            });
        }
        let exists = response
            .untagged
            .iter()
            .filter_map(|u| {
                let mut words = u.line.split_whitespace().skip(1);
                let count = words.next()?.parse::<u32>().ok()?;
                words
                    .next()
                    .filter(|w| w.eq_ignore_ascii_case("EXISTS"))
                    .map(|_| count)
            })
            .last()
            .unwrap_or(0);
        Ok(exists)
    }

    fn search_all(&mut self) -> Result<Vec<u32>, MailboxError> {
        let response = self.run("SEARCH ALL")?;
        if !response.is_ok() {
            return Err(MailboxError::Search(response.text));
        }
        let mut ids = Vec::new();
        for u in &response.untagged {
            let mut words = u.line.split_whitespace().skip(1);
            let first = words.next().unwrap_or_default();
            if !first.eq_ignore_ascii_case("SEARCH") {
                continue;
            }
            for word in words {
                let Ok(id) = word.parse() else {
                    let message = format!("bad sequence number in SEARCH: {word}");
                    return Err(MailboxError::Protocol(message));
                };
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn fetch(&mut self, seq: u32) -> Result<Vec<u8>, MailboxError> {
        let response = self.run(&format!("FETCH {seq} BODY.PEEK[]"))?;
        if !response.is_ok() {
            return Err(MailboxError::Fetch {
                seq,
                reason: response.text,
            });
        }
        response
            .untagged
            .into_iter()
            .filter(|u| u.line.to_ascii_uppercase().contains(" FETCH "))
            .find_map(|u| u.literals.into_iter().next())
            .ok_or_else(|| MailboxError::Fetch {
                seq,
                reason: "server returned no message body".into(),
            })
    }

    fn logout(&mut self) -> Result<(), MailboxError> {
        let response = self.run("LOGOUT")?;
        if response.is_ok() {
            Ok(())
        } else {
            let text = response.text;
            Err(MailboxError::Protocol(format!("LOGOUT refused: {text}")))
        }
    }
}
