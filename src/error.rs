//! Error types for mail-ocr.

/// Top-level error type for a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown email provider: {0}")]
    UnknownProvider(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox protocol errors.
///
/// Messages never carry the account secret.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Could not connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("Login failed on {host}: {reason}")]
    Authentication { host: String, reason: String },

    #[error("Failed to search mailbox: {0}")]
    Search(String),

    #[error("Failed to fetch message {seq}: {reason}")]
    Fetch { seq: u32, reason: String },

    #[error("Failed to select mailbox {mailbox}: {reason}")]
    Select { mailbox: String, reason: String },

    #[error("Unexpected server response: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-message errors. Logged and skipped by the selector, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Message {seq} could not be parsed as RFC 822")]
    Unparseable { seq: u32 },

    #[error("Message {seq} has no Date header")]
    MissingDate { seq: u32 },

    #[error("Message {seq} has an unparseable Date header: {raw}")]
    DateParse { seq: u32, raw: String },
}

/// Per-document OCR errors. Isolated to the attachment that raised them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DocumentError {
    #[error("Could not open PDF: {0}")]
    Open(String),

    #[error("Failed to rasterize page {page}: {reason}")]
    Render { page: usize, reason: String },

    #[error("Text recognition failed on page {page}: {reason}")]
    Recognize { page: usize, reason: String },

    #[error("OCR engine {binary} is unavailable: {reason}")]
    EngineUnavailable { binary: String, reason: String },

    #[error("OCR task aborted: {0}")]
    TaskFailed(String),
}

/// Result type alias for a pipeline run.
pub type Result<T> = std::result::Result<T, Error>;
