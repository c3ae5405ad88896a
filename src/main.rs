use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_ocr::config::{Config, FetchRequest};
use mail_ocr::pipeline::{OcrOutcome, Pipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn from_env() -> anyhow::Result<Self> {
        match std::env::var("MAIL_OCR_FORMAT").as_deref() {
            Err(_) | Ok("") | Ok("text") => Ok(Self::Text),
            Ok("json") => Ok(Self::Json),
            Ok(other) => anyhow::bail!("MAIL_OCR_FORMAT must be text or json, got {other:?}"),
        }
    }
}

/// Stderr logging, plus a log file when `MAIL_OCR_LOG_DIR` is set.
fn init_tracing() -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let log_dir = std::env::var_os("MAIL_OCR_LOG_DIR").map(PathBuf::from);
    match log_dir {
        Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let appender = tracing_appender::rolling::never(&dir, "mail-ocr.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

fn print_outcome(outcome: &OcrOutcome) {
    match &outcome.result {
        Ok(text) => {
            println!("📄 {}", outcome.key.filename);
            println!("{}", text.trim_end());
            println!();
        }
        Err(e) => {
            println!("❌ Error processing {}: {e}", outcome.key.filename);
            println!();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let _log_guard = init_tracing();

    let format = OutputFormat::from_env()?;
    let request = FetchRequest::from_env().context("Invalid request")?;
    let pipeline = Pipeline::from_config(Config::from_env());

    let config = pipeline.config();
    let hours = request.duration_hours;
    let window = config.selector.recent_window;
    let workers = config.dispatch.max_workers;
    let language = &config.ocr.language;
    let dpi = config.ocr.dpi;
    eprintln!("📧 mail-ocr v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Account: {}", request.address);
    eprintln!("   Provider: {}", request.provider);
    eprintln!("   Window: last {hours}h (newest {window} messages)");
    eprintln!("   OCR: {language} @ {dpi} DPI, {workers} workers\n");

    let now = chrono::Utc::now();

    let report = match format {
        OutputFormat::Text => pipeline.run_with(&request, now, print_outcome).await?,
        OutputFormat::Json => pipeline.run_with(&request, now, |_| {}).await?,
    };

    match format {
        OutputFormat::Text if report.is_empty() => println!("No recent PDF attachments found."),
        OutputFormat::Text => {
            let failed = report.failures().count();
            eprintln!("Processed {} PDFs ({} failed)", report.len(), failed);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report.entries())?);
        }
    }

    Ok(())
}
