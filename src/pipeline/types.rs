//! Types flowing between pipeline stages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DocumentError;

/// A fetched message that passed the date filter.
#[derive(Debug, Clone)]
pub struct Message {
    /// Mailbox sequence number.
    pub seq: u32,
    pub sent_at: DateTime<Utc>,
    /// Full RFC 822 bytes.
    pub raw: Vec<u8>,
}

/// A PDF attachment pulled out of a message.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Header-decoded filename, case preserved.
    pub filename: String,
    /// Transfer-decoded payload.
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Identifies one attachment within a run.
///
/// Filenames are not unique (two messages may both carry `invoice.pdf`),
/// so results are keyed by discovery index as well.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AttachmentKey {
    pub index: usize,
    pub filename: String,
}

impl fmt::Display for AttachmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index + 1, self.filename)
    }
}

/// OCR result for one attachment.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub key: AttachmentKey,
    pub result: Result<String, DocumentError>,
}

/// All OCR outcomes of a run, in completion order.
#[derive(Debug, Clone, Default)]
pub struct OcrReport {
    outcomes: Vec<OcrOutcome>,
}

impl OcrReport {
    pub fn push(&mut self, outcome: OcrOutcome) {
        self.outcomes.push(outcome);
    }

    /// `true` when no PDF attachments were found.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Outcomes in the order they completed.
    pub fn outcomes(&self) -> &[OcrOutcome] {
        &self.outcomes
    }

    /// Outcomes ordered by discovery index.
    pub fn sorted(&self) -> Vec<&OcrOutcome> {
        let mut sorted: Vec<_> = self.outcomes.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));
        sorted
    }

    pub fn failures(&self) -> impl Iterator<Item = &OcrOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// Serializable view, in completion order.
    pub fn entries(&self) -> Vec<ReportEntry<'_>> {
        self.outcomes
            .iter()
            .map(|o| {
                let (text, error) = match &o.result {
                    Ok(text) => (Some(text.as_str()), None),
                    Err(e) => (None, Some(e.to_string())),
                };
                ReportEntry {
                    index: o.key.index,
                    filename: &o.key.filename,
                    text,
                    error,
                }
            })
            .collect()
    }
}

/// JSON shape of one report entry.
#[derive(Debug, Serialize)]
pub struct ReportEntry<'a> {
    pub index: usize,
    pub filename: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
