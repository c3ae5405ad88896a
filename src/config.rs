//! Configuration types.
//!
//! Everything the pipeline treats as a constant (provider hosts, the recent
//! message window, worker count, rasterization DPI) lives here and is passed
//! into each component at construction.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;

use crate::error::ConfigError;

/// Implicit-TLS IMAP port.
pub const IMAP_TLS_PORT: u16 = 993;

/// Bounds for the requested look-back window, in hours.
pub const MIN_DURATION_HOURS: u32 = 1;
pub const MAX_DURATION_HOURS: u32 = 24;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub providers: ProviderTable,
    pub mailbox: MailboxConfig,
    pub selector: SelectorConfig,
    pub ocr: OcrConfig,
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Defaults, with OCR binary paths overridable from the environment.
    pub fn from_env() -> Self {
        Self {
            ocr: OcrConfig::from_env(),
            ..Self::default()
        }
    }
}

// ── Providers ───────────────────────────────────────────────────────

/// Closed mapping of provider display name to IMAP hostname.
#[derive(Debug, Clone)]
pub struct ProviderTable {
    entries: Vec<(String, String)>,
}

impl ProviderTable {
    /// Build a table from `(name, host)` pairs. Used by tests to inject hosts.
    pub fn new<N, H>(entries: impl IntoIterator<Item = (N, H)>) -> Self
    where
        N: Into<String>,
        H: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(n, h)| (n.into(), h.into()))
                .collect(),
        }
    }

    /// Resolve a provider name to its IMAP hostname.
    pub fn host_for(&self, provider: &str) -> Result<&str, ConfigError> {
        self.entries
            .iter()
            .find(|(name, _)| name == provider)
            .map(|(_, host)| host.as_str())
            .ok_or_else(|| ConfigError::UnknownProvider(provider.to_string()))
    }
}

impl Default for ProviderTable {
    fn default() -> Self {
        Self::new([
            ("Gmail", "imap.gmail.com"),
            ("Outlook / Hotmail", "outlook.office365.com"),
            ("Yahoo", "imap.mail.yahoo.com"),
            ("iCloud", "imap.mail.me.com"),
            ("Zoho", "imap.zoho.com"),
        ])
    }
}

// ── Stage configs ───────────────────────────────────────────────────

/// IMAP session settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub port: u16,
    /// Mailbox selected before searching.
    pub mailbox: String,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            port: IMAP_TLS_PORT,
            mailbox: "INBOX".to_string(),
        }
    }
}

/// Message selection settings.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// How many of the most recent sequence numbers are inspected.
    ///
    /// This is a hard cap, independent of the requested duration: older
    /// messages inside the window are never looked at.
    pub recent_window: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self { recent_window: 5 }
    }
}

/// OCR settings.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Rasterization resolution.
    pub dpi: u32,
    /// Tesseract language model.
    pub language: String,
    pub pdfinfo_bin: PathBuf,
    pub pdftoppm_bin: PathBuf,
    pub tesseract_bin: PathBuf,
}

impl OcrConfig {
    /// Build from `MAIL_OCR_PDFINFO`, `MAIL_OCR_PDFTOPPM` and
    /// `MAIL_OCR_TESSERACT`, falling back to binaries on `PATH`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let bin = |var: &str, fallback: PathBuf| {
            std::env::var_os(var)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(fallback)
        };
        Self {
            pdfinfo_bin: bin("MAIL_OCR_PDFINFO", defaults.pdfinfo_bin),
            pdftoppm_bin: bin("MAIL_OCR_PDFTOPPM", defaults.pdftoppm_bin),
            tesseract_bin: bin("MAIL_OCR_TESSERACT", defaults.tesseract_bin),
            ..defaults
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            language: "eng".to_string(),
            pdfinfo_bin: PathBuf::from("pdfinfo"),
            pdftoppm_bin: PathBuf::from("pdftoppm"),
            tesseract_bin: PathBuf::from("tesseract"),
        }
    }
}

/// OCR fan-out settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of conversions running at once.
    pub max_workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_workers: 10 }
    }
}

// ── Request ─────────────────────────────────────────────────────────

/// One fetch-and-OCR request, as supplied by the front end.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub address: String,
    pub secret: SecretString,
    pub provider: String,
    pub duration_hours: u32,
}

impl FetchRequest {
    /// Build and validate a request.
    pub fn new(
        address: impl Into<String>,
        secret: SecretString,
        provider: impl Into<String>,
        duration_hours: u32,
    ) -> Result<Self, ConfigError> {
        let request = Self {
            address: address.into(),
            secret,
            provider: provider.into(),
            duration_hours,
        };
        request.validate()?;
        Ok(request)
    }

    /// Build from `MAIL_OCR_ADDRESS`, `MAIL_OCR_PASSWORD`,
    /// `MAIL_OCR_PROVIDER` (default `Gmail`) and `MAIL_OCR_DURATION_HOURS`
    /// (default 1).
    pub fn from_env() -> Result<Self, ConfigError> {
        let address = std::env::var("MAIL_OCR_ADDRESS").unwrap_or_default();
        let password = std::env::var("MAIL_OCR_PASSWORD").unwrap_or_default();
        let provider = std::env::var("MAIL_OCR_PROVIDER").unwrap_or_else(|_| "Gmail".to_string());

        let duration_hours = match std::env::var("MAIL_OCR_DURATION_HOURS") {
            Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "MAIL_OCR_DURATION_HOURS".into(),
                message: format!("expected a whole number of hours, got {raw:?}"),
            })?,
            Err(_) => MIN_DURATION_HOURS,
        };

        Self::new(
            address,
            SecretString::from(password),
            provider,
            duration_hours,
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        use secrecy::ExposeSecret;

        if self.address.trim().is_empty() || self.secret.expose_secret().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "credentials".into(),
                hint: "Please provide email credentials.".into(),
            });
        }
        if !(MIN_DURATION_HOURS..=MAX_DURATION_HOURS).contains(&self.duration_hours) {
            return Err(ConfigError::InvalidValue {
                key: "duration_hours".into(),
                message: format!(
                    "must be between {MIN_DURATION_HOURS} and {MAX_DURATION_HOURS}, got {}",
                    self.duration_hours
                ),
            });
        }
        Ok(())
    }

    /// Oldest sent-date accepted, relative to `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::hours(i64::from(self.duration_hours))
    }
}
