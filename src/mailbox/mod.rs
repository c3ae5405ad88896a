//! Mailbox client adapter.
//!
//! A [`MailboxSession`] is one authenticated connection bound to one
//! account. Sessions are blocking and owned by a single caller; run them
//! inside `spawn_blocking`.

pub mod imap;

use secrecy::SecretString;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, MailboxError};

pub use imap::{ImapConnector, ImapSession};

/// Account credentials. `Debug` output never includes the secret.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub address: String,
    pub secret: SecretString,
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// An authenticated mailbox session.
pub trait MailboxSession: Send {
    /// Select a mailbox, returning its message count.
    fn select(&mut self, mailbox: &str) -> Result<u32, MailboxError>;

    /// Sequence numbers of every message in the selected mailbox, in
    /// mailbox order.
    fn search_all(&mut self) -> Result<Vec<u32>, MailboxError>;

    /// Raw RFC 822 bytes of one message.
    fn fetch(&mut self, seq: u32) -> Result<Vec<u8>, MailboxError>;

    /// End the session. Called exactly once per session.
    fn logout(&mut self) -> Result<(), MailboxError>;
}

/// Opens sessions. The production implementation is [`ImapConnector`].
pub trait MailboxConnector: Send + Sync {
    fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn MailboxSession>, MailboxError>;
}

/// Resolve `provider` through the configured table and open a session.
///
/// The returned session has no mailbox selected yet.
pub fn connect(
    config: &Config,
    connector: &dyn MailboxConnector,
    credentials: &Credentials,
    provider: &str,
) -> Result<Box<dyn MailboxSession>, Error> {
    let endpoint = Endpoint {
        host: config.providers.host_for(provider)?.to_string(),
        port: config.mailbox.port,
    };

    info!("Connecting to {}...", endpoint.host);
    let session = connector.connect(&endpoint, credentials)?;
    info!(account = %credentials.address, "Logged in successfully");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::ConfigError;

    /// Records the endpoint it was asked to connect to.
    #[derive(Default)]
    struct RecordingConnector {
        seen: Mutex<Vec<Endpoint>>,
    }

    struct NullSession;

    impl MailboxSession for NullSession {
        fn select(&mut self, _mailbox: &str) -> Result<u32, MailboxError> {
            Ok(0)
        }
        fn search_all(&mut self) -> Result<Vec<u32>, MailboxError> {
            Ok(Vec::new())
        }
        fn fetch(&mut self, seq: u32) -> Result<Vec<u8>, MailboxError> {
            Err(MailboxError::Fetch {
                seq,
                reason: "empty".into(),
            })
        }
        fn logout(&mut self) -> Result<(), MailboxError> {
            Ok(())
        }
    }

    impl MailboxConnector for RecordingConnector {
        fn connect(
            &self,
            endpoint: &Endpoint,
            _credentials: &Credentials,
        ) -> Result<Box<dyn MailboxSession>, MailboxError> {
            self.seen.lock().unwrap().push(endpoint.clone());
            Ok(Box::new(NullSession))
        }
    }

    struct RefusingConnector;

    impl MailboxConnector for RefusingConnector {
        fn connect(
            &self,
            endpoint: &Endpoint,
            _credentials: &Credentials,
        ) -> Result<Box<dyn MailboxSession>, MailboxError> {
            Err(MailboxError::Authentication {
                host: endpoint.host.clone(),
                reason: "[AUTHENTICATIONFAILED] Invalid credentials".into(),
            })
        }
    }

    fn creds() -> Credentials {
        Credentials {
            address: "me@example.com".into(),
            secret: SecretString::from("app-password".to_string()),
        }
    }

    #[test]
    fn connect_routes_each_provider_to_its_host() {
        let config = Config::default();
        let connector = RecordingConnector::default();
        let cases = [
            ("Gmail", "imap.gmail.com"),
            ("Outlook / Hotmail", "outlook.office365.com"),
            ("Yahoo", "imap.mail.yahoo.com"),
            ("iCloud", "imap.mail.me.com"),
            ("Zoho", "imap.zoho.com"),
        ];
        for (provider, _) in cases {
            connect(&config, &connector, &creds(), provider).unwrap();
        }
        let seen = connector.seen.lock().unwrap();
        let hosts: Vec<_> = seen.iter().map(|e| e.host.as_str()).collect();
        let expected: Vec<_> = cases.iter().map(|(_, h)| *h).collect();
        assert_eq!(hosts, expected);
        assert!(seen.iter().all(|e| e.port == 993));
    }

    #[test]
    fn connect_unknown_provider_is_config_error() {
        let connector = RecordingConnector::default();
        let result = connect(&Config::default(), &connector, &creds(), "Hotmail");
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::UnknownProvider(_)))
        ));
        assert!(connector.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn connect_surfaces_auth_failure() {
        let result = connect(&Config::default(), &RefusingConnector, &creds(), "Gmail");
        assert!(matches!(
            result,
            Err(Error::Mailbox(MailboxError::Authentication { .. }))
        ));
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let debug = format!("{:?}", creds());
        assert!(debug.contains("me@example.com"));
        assert!(!debug.contains("app-password"));
    }
}
