//! Concurrent OCR fan-out.
//!
//! Every attachment becomes a task in a `JoinSet`; a semaphore caps how many
//! conversions run at once. Each task's result is captured on its own, so a
//! failing (or panicking) conversion never affects its siblings. Outcomes
//! are reported in completion order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::types::{Attachment, AttachmentKey, OcrOutcome, OcrReport};
use crate::config::DispatchConfig;
use crate::error::DocumentError;
use crate::ocr::OcrConverter;

/// Runs an [`OcrConverter`] over many attachments with bounded parallelism.
#[derive(Clone)]
pub struct Dispatcher {
    converter: Arc<OcrConverter>,
    max_workers: usize,
}

impl Dispatcher {
    pub fn new(converter: Arc<OcrConverter>, config: &DispatchConfig) -> Self {
        Self {
            converter,
            max_workers: config.max_workers.max(1),
        }
    }

    /// OCR every attachment, collecting all outcomes.
    pub async fn ocr_all(&self, attachments: Vec<Attachment>) -> OcrReport {
        self.ocr_all_with(attachments, |_| {}).await
    }

    /// Like [`ocr_all`](Self::ocr_all), calling `on_outcome` as each
    /// attachment finishes.
    pub async fn ocr_all_with<F>(
        &self,
        attachments: Vec<Attachment>,
        mut on_outcome: F,
    ) -> OcrReport
    where
        F: FnMut(&OcrOutcome),
    {
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        let mut keys = HashMap::new();

        for (index, attachment) in attachments.into_iter().enumerate() {
            let key = AttachmentKey {
                index,
                filename: attachment.filename,
            };
            let data = attachment.data;
            let converter = Arc::clone(&self.converter);
            let permits = Arc::clone(&permits);
            let task_key = key.clone();

            let handle = tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => converter.convert(&data).await,
                    Err(_) => Err(DocumentError::TaskFailed("worker pool closed".into())),
                };
                OcrOutcome {
                    key: task_key,
                    result,
                }
            });
            keys.insert(handle.id(), key);
        }

        info!(
            count = keys.len(),
            workers = self.max_workers,
            "Running OCR on PDFs concurrently"
        );

        let mut report = OcrReport::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            let outcome = match joined {
                Ok((_, outcome)) => outcome,
                Err(e) => {
                    let Some(key) = keys.get(&e.id()).cloned() else {
                        warn!("OCR task for an unknown attachment failed: {e}");
                        continue;
                    };
                    OcrOutcome {
                        key,
                        result: Err(DocumentError::TaskFailed(e.to_string())),
                    }
                }
            };

            match &outcome.result {
                Ok(text) => info!(attachment = %outcome.key, chars = text.len(), "OCR finished"),
                Err(e) => warn!(attachment = %outcome.key, "Error processing attachment: {e}"),
            }
            on_outcome(&outcome);
            report.push(outcome);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::OcrConfig;
    use crate::ocr::{PdfDocument, PdfRenderer, TextRecognizer};

    /// One-page documents whose text is the PDF bytes. Tracks how many
    /// recognitions are in flight and the peak.
    #[derive(Default)]
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    struct SlowRenderer;

    struct OnePage(Vec<u8>);

    #[async_trait]
    impl PdfRenderer for SlowRenderer {
        async fn open(&self, pdf: &[u8]) -> Result<Box<dyn PdfDocument>, DocumentError> {
            if pdf == b"broken" {
                return Err(DocumentError::Open("not a PDF".into()));
            }
            if pdf == b"panic" {
                panic!("renderer blew up");
            }
            Ok(Box::new(OnePage(pdf.to_vec())))
        }
    }

    #[async_trait]
    impl PdfDocument for OnePage {
        fn page_count(&self) -> usize {
            1
        }
        async fn render_page(&self, _page: usize, _dpi: u32) -> Result<Vec<u8>, DocumentError> {
            Ok(self.0.clone())
        }
    }

    struct GaugedRecognizer(Arc<Gauge>);

    #[async_trait]
    impl TextRecognizer for GaugedRecognizer {
        async fn recognize(
            &self,
            _page: usize,
            png: &[u8],
            _language: &str,
            _dpi: u32,
        ) -> Result<String, DocumentError> {
            let now = self.0.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.0.active.fetch_sub(1, Ordering::SeqCst);
            Ok(String::from_utf8_lossy(png).into_owned())
        }
    }

    fn dispatcher(max_workers: usize) -> (Dispatcher, Arc<Gauge>) {
        let gauge = Arc::new(Gauge::default());
        let converter = OcrConverter::new(
            &OcrConfig::default(),
            Arc::new(SlowRenderer),
            Arc::new(GaugedRecognizer(gauge.clone())),
        );
        (
            Dispatcher::new(Arc::new(converter), &DispatchConfig { max_workers }),
            gauge,
        )
    }

    fn attachments(n: usize) -> Vec<Attachment> {
        (0..n)
            .map(|i| Attachment::new(format!("doc{i}.pdf"), format!("text {i}").into_bytes()))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_worker_cap_and_isolates_failure() {
        let (dispatcher, gauge) = dispatcher(10);
        let mut input = attachments(12);
        input[5].data = b"broken".to_vec();

        let report = dispatcher.ocr_all(input).await;

        assert_eq!(report.len(), 12);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 10);
        assert!(gauge.peak.load(Ordering::SeqCst) > 1);

        let failures: Vec<_> = report.failures().map(|o| o.key.index).collect();
        assert_eq!(failures, vec![5]);
        for outcome in report.sorted() {
            if outcome.key.index != 5 {
                assert_eq!(
                    outcome.result.as_deref().unwrap(),
                    format!("text {}", outcome.key.index)
                );
            }
        }
    }

    #[tokio::test]
    async fn small_pool_serializes_work() {
        let (dispatcher, gauge) = dispatcher(2);
        let report = dispatcher.ocr_all(attachments(6)).await;
        assert_eq!(report.len(), 6);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panicking_task_is_reported_not_propagated() {
        let (dispatcher, _) = dispatcher(10);
        let mut input = attachments(3);
        input[1].data = b"panic".to_vec();

        let report = dispatcher.ocr_all(input).await;

        assert_eq!(report.len(), 3);
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key.filename, "doc1.pdf");
        assert!(matches!(
            failed[0].result,
            Err(DocumentError::TaskFailed(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_filenames_both_reported() {
        let (dispatcher, _) = dispatcher(10);
        let input = vec![
            Attachment::new("invoice.pdf", b"first".to_vec()),
            Attachment::new("invoice.pdf", b"second".to_vec()),
        ];
        let report = dispatcher.ocr_all(input).await;
        let texts: Vec<_> = report
            .sorted()
            .iter()
            .map(|o| o.result.clone().unwrap())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn callback_sees_every_outcome_in_report_order() {
        let (dispatcher, _) = dispatcher(10);
        let mut seen = Vec::new();
        let report = dispatcher
            .ocr_all_with(attachments(4), |o| seen.push(o.key.clone()))
            .await;
        let reported: Vec<_> = report.outcomes().iter().map(|o| o.key.clone()).collect();
        assert_eq!(seen, reported);
    }

    #[tokio::test]
    async fn no_attachments_is_empty_report() {
        let (dispatcher, _) = dispatcher(10);
        assert!(dispatcher.ocr_all(Vec::new()).await.is_empty());
    }
}
