//! Message selection: the last few messages of the mailbox, newest first,
//! filtered by sent date.
//!
//! Only `recent_window` sequence numbers are ever inspected, whatever the
//! cutoff. Qualifying messages older than that window are missed.

use chrono::{DateTime, Utc};
use mail_parser::{HeaderName, MessageParser};
use tracing::{debug, info, warn};

use super::types::Message;
use crate::config::{MailboxConfig, SelectorConfig};
use crate::error::{MailboxError, MessageError};
use crate::mailbox::MailboxSession;

/// Parse the `Date` header of a raw message into UTC.
pub fn parse_sent_date(seq: u32, raw: &[u8]) -> Result<DateTime<Utc>, MessageError> {
    let parsed = MessageParser::default()
        .parse_headers(raw)
        .ok_or(MessageError::Unparseable { seq })?;

    let header = parsed
        .header_raw(HeaderName::Date)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(MessageError::MissingDate { seq })?;

    parsed
        .date()
        .filter(|d| d.is_valid())
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .ok_or(MessageError::DateParse { seq, raw: header })
}

/// Fetch the most recent messages sent at or after `since`, newest first.
///
/// A failed search is logged and yields no messages. Per-message fetch or
/// date failures skip that message.
pub fn fetch_recent(
    session: &mut dyn MailboxSession,
    mailbox: &MailboxConfig,
    config: &SelectorConfig,
    since: DateTime<Utc>,
) -> Result<Vec<Message>, MailboxError> {
    info!("Selecting {}...", mailbox.mailbox);
    let exists = session.select(&mailbox.mailbox)?;
    if exists == 0 {
        info!("{} is empty", mailbox.mailbox);
        return Ok(Vec::new());
    }

    info!("Fetching all recent message IDs...");
    let ids = match session.search_all() {
        Ok(ids) => ids,
        Err(e) => {
            warn!("Failed to search mailbox: {e}");
            return Ok(Vec::new());
        }
    };
    info!("Found {} messages in {}", ids.len(), mailbox.mailbox);

    let start = ids.len().saturating_sub(config.recent_window);
    let mut selected = Vec::new();

    for &seq in ids[start..].iter().rev() {
        let raw = match session.fetch(seq) {
            Ok(raw) => raw,
            Err(MailboxError::Fetch { reason, .. }) => {
                warn!(seq, "Skipping message (fetch failed): {reason}");
                continue;
            }
            Err(e) => return Err(e),
        };

        let sent_at = match parse_sent_date(seq, &raw) {
            Ok(sent_at) => sent_at,
            Err(e) => {
                warn!("Could not parse email date, skipping: {e}");
                continue;
            }
        };
        info!(seq, "Checking email dated {}", sent_at.to_rfc2822());

        if sent_at < since {
            debug!(seq, "Email is older than the requested duration, skipping");
            continue;
        }

        selected.push(Message { seq, sent_at, raw });
    }

    Ok(selected)
}
