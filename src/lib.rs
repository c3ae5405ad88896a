//! Fetch recent PDF attachments over IMAP and OCR them to text.

pub mod config;
pub mod error;
pub mod mailbox;
pub mod ocr;
pub mod pipeline;
