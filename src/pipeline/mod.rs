//! Fetch-and-OCR pipeline.
//!
//! One run flows through:
//! 1. `mailbox::connect()`: provider lookup, TLS, LOGIN
//! 2. `selector::fetch_recent()`: last few messages, filtered by date
//! 3. `extractor::extract_pdfs()`: PDF parts of each message
//! 4. `Dispatcher::ocr_all()`: concurrent OCR, one outcome per attachment
//!
//! Steps 1-3 are blocking and run on `spawn_blocking`; the session is
//! logged out before OCR starts, on both success and failure paths.

pub mod dispatch;
pub mod extractor;
pub mod selector;
pub mod types;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{Instrument, Span, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, FetchRequest};
use crate::error::{Error, Result};
use crate::mailbox::{self, Credentials, ImapConnector, MailboxConnector};
use crate::ocr::OcrConverter;

pub use dispatch::Dispatcher;
pub use types::{Attachment, AttachmentKey, Message, OcrOutcome, OcrReport};

/// Wires the pipeline stages together.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    connector: Arc<dyn MailboxConnector>,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(
        config: Config,
        connector: Arc<dyn MailboxConnector>,
        converter: OcrConverter,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::new(converter), &config.dispatch);
        Self {
            config: Arc::new(config),
            connector,
            dispatcher,
        }
    }

    /// IMAP over TLS, Poppler and Tesseract.
    pub fn from_config(config: Config) -> Self {
        let converter = OcrConverter::from_config(&config.ocr);
        Self::new(config, Arc::new(ImapConnector), converter)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the whole pipeline for `request`.
    pub async fn run(&self, request: &FetchRequest) -> Result<OcrReport> {
        self.run_with(request, Utc::now(), |_| {}).await
    }

    /// Run the pipeline with an explicit clock, reporting each OCR outcome
    /// to `on_outcome` as it completes.
    pub async fn run_with<F>(
        &self,
        request: &FetchRequest,
        now: DateTime<Utc>,
        on_outcome: F,
    ) -> Result<OcrReport>
    where
        F: FnMut(&OcrOutcome),
    {
        let span = info_span!("run", run_id = %Uuid::new_v4(), provider = %request.provider);
        async {
            let since = request.cutoff(now);
            let attachments = self.collect_attachments(request, since).await?;
            if attachments.is_empty() {
                info!("No recent PDF attachments found");
                return Ok(OcrReport::default());
            }
            Ok(self.dispatcher.ocr_all_with(attachments, on_outcome).await)
        }
        .instrument(span)
        .await
    }

    /// Connect, select and extract. The session is released before returning.
    pub async fn collect_attachments(
        &self,
        request: &FetchRequest,
        since: DateTime<Utc>,
    ) -> Result<Vec<Attachment>> {
        let config = Arc::clone(&self.config);
        let connector = Arc::clone(&self.connector);
        let request = request.clone();
        let span = Span::current();

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            fetch_attachments(&config, connector.as_ref(), &request, since)
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?
    }
}

/// The blocking mailbox phase.
fn fetch_attachments(
    config: &Config,
    connector: &dyn MailboxConnector,
    request: &FetchRequest,
    since: DateTime<Utc>,
) -> Result<Vec<Attachment>> {
    let credentials = Credentials {
        address: request.address.clone(),
        secret: request.secret.clone(),
    };
    let mut session = mailbox::connect(config, connector, &credentials, &request.provider)?;

    info!("Fetching recent PDF attachments...");
    let selected = selector::fetch_recent(
        session.as_mut(),
        &config.mailbox,
        &config.selector,
        since,
    );
    let attachments: Vec<Attachment> = match &selected {
        Ok(messages) => messages.iter().flat_map(extractor::extract_pdfs).collect(),
        Err(_) => Vec::new(),
    };

    if let Err(e) = session.logout() {
        warn!("Logout failed: {e}");
    }

    let messages = selected?;
    info!(
        messages = messages.len(),
        attachments = attachments.len(),
        "Finished scanning mailbox"
    );
    Ok(attachments)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration;
    use secrecy::SecretString;

    use super::*;
    use crate::error::{ConfigError, DocumentError, MailboxError};
    use crate::mailbox::{Endpoint, MailboxSession};
    use crate::ocr::{PdfDocument, PdfRenderer, TextRecognizer};

    #[derive(Default)]
    struct Log {
        logouts: usize,
    }

    struct Session {
        log: Arc<Mutex<Log>>,
        fail_select: bool,
        messages: Vec<Vec<u8>>,
    }

    impl MailboxSession for Session {
        fn select(&mut self, mailbox: &str) -> std::result::Result<u32, MailboxError> {
            if self.fail_select {
                return Err(MailboxError::Select {
                    mailbox: mailbox.into(),
                    reason: "gone".into(),
                });
            }
            Ok(self.messages.len() as u32)
        }
        fn search_all(&mut self) -> std::result::Result<Vec<u32>, MailboxError> {
            Ok((1..=self.messages.len() as u32).collect())
        }
        fn fetch(&mut self, seq: u32) -> std::result::Result<Vec<u8>, MailboxError> {
            Ok(self.messages[seq as usize - 1].clone())
        }
        fn logout(&mut self) -> std::result::Result<(), MailboxError> {
            self.log.lock().unwrap().logouts += 1;
            Ok(())
        }
    }

    struct Connector {
        log: Arc<Mutex<Log>>,
        fail_select: bool,
        messages: Vec<Vec<u8>>,
    }

    impl MailboxConnector for Connector {
        fn connect(
            &self,
            _endpoint: &Endpoint,
            _credentials: &Credentials,
        ) -> std::result::Result<Box<dyn MailboxSession>, MailboxError> {
            Ok(Box::new(Session {
                log: Arc::clone(&self.log),
                fail_select: self.fail_select,
                messages: self.messages.clone(),
            }))
        }
    }

    struct TextRenderer;
    struct TextDoc(Vec<u8>);

    #[async_trait]
    impl PdfRenderer for TextRenderer {
        async fn open(
            &self,
            pdf: &[u8],
        ) -> std::result::Result<Box<dyn PdfDocument>, DocumentError> {
            Ok(Box::new(TextDoc(pdf.to_vec())))
        }
    }

    #[async_trait]
    impl PdfDocument for TextDoc {
        fn page_count(&self) -> usize {
            1
        }
        async fn render_page(
            &self,
            _page: usize,
            _dpi: u32,
        ) -> std::result::Result<Vec<u8>, DocumentError> {
            Ok(self.0.clone())
        }
    }

    struct Echo;

    #[async_trait]
    impl TextRecognizer for Echo {
        async fn recognize(
            &self,
            _page: usize,
            png: &[u8],
            _language: &str,
            _dpi: u32,
        ) -> std::result::Result<String, DocumentError> {
            Ok(String::from_utf8_lossy(png).into_owned())
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_773_144_000, 0).unwrap()
    }

    fn message_with_pdf(name: &str) -> Vec<u8> {
        format!(
            "Date: {}\r\n\
             Content-Type: multipart/mixed; boundary=\"B\"\r\n\r\n\
             --B\r\n\
             Content-Type: application/pdf\r\n\
             Content-Disposition: attachment; filename=\"{name}\"\r\n\r\n\
             contents of {name}\r\n\
             --B--\r\n",
            now().to_rfc2822()
        )
        .into_bytes()
    }

    fn pipeline(fail_select: bool, messages: Vec<Vec<u8>>) -> (Pipeline, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let connector = Connector {
            log: Arc::clone(&log),
            fail_select,
            messages,
        };
        let config = Config::default();
        let converter = OcrConverter::new(&config.ocr, Arc::new(TextRenderer), Arc::new(Echo));
        (Pipeline::new(config, Arc::new(connector), converter), log)
    }

    fn request(provider: &str) -> FetchRequest {
        FetchRequest::new(
            "me@example.com",
            SecretString::from("pw".to_string()),
            provider,
            1,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn successful_run_logs_out_once() {
        let (pipeline, log) = pipeline(false, vec![message_with_pdf("a.pdf")]);
        let report = pipeline
            .run_with(&request("Gmail"), now() + Duration::minutes(5), |_| {})
            .await
            .unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(
            report.outcomes()[0].result.as_deref().unwrap().trim(),
            "contents of a.pdf"
        );
        assert_eq!(log.lock().unwrap().logouts, 1);
    }

    #[tokio::test]
    async fn failed_select_still_logs_out() {
        let (pipeline, log) = pipeline(true, vec![message_with_pdf("a.pdf")]);
        let err = pipeline
            .run_with(&request("Gmail"), now(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Mailbox(MailboxError::Select { .. })));
        assert_eq!(log.lock().unwrap().logouts, 1);
    }

    #[tokio::test]
    async fn unknown_provider_never_connects() {
        let (pipeline, log) = pipeline(false, Vec::new());
        let err = pipeline.run(&request("AOL")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::UnknownProvider(_))
        ));
        assert_eq!(log.lock().unwrap().logouts, 0);
    }

    #[tokio::test]
    async fn no_pdfs_is_empty_report_not_error() {
        let (pipeline, log) = pipeline(false, Vec::new());
        let report = pipeline
            .run_with(&request("Gmail"), now(), |_| {})
            .await
            .unwrap();
        assert!(report.is_empty());
        assert_eq!(log.lock().unwrap().logouts, 1);
    }
}
