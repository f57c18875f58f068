//! CLI entry point.
//!
//! Runs one templated submission against a target URL and prints exactly one
//! JSON result record to stdout. Failures are communicated through the
//! record's `status`, not the exit code; only unusable arguments make the
//! process exit non-zero (clap handles that before we run).

use std::path::PathBuf;
use std::sync::Arc;

use chromiumoxide::{Browser, BrowserConfig};
use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::filter::LevelFilter;

use formrunner_rs::{
    ChromiumSession, FormRunner, PageSession, SubmissionReport, SubmissionTemplate, WaitUntil,
    WhisperCliTranscriber,
};

#[derive(Parser)]
#[command(name = "formrunner", version, about = "Challenge-aware form submission")]
struct Cli {
    /// Target page URL
    #[arg(long)]
    url: String,

    /// Path to a submission template JSON; omit for full auto-detection
    #[arg(long)]
    template: Option<PathBuf>,

    /// Enable verbose logging (stderr)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays a single JSON record.
    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let report = run(&cli).await;
    println!("{}", report.to_json());
}

async fn run(cli: &Cli) -> SubmissionReport {
    let template = match &cli.template {
        Some(path) => match SubmissionTemplate::from_path(path) {
            Ok(template) => template,
            Err(err) => {
                log::error!("template rejected: {err}");
                let mut report = SubmissionReport::fallback(cli.url.clone());
                report.message = format!("template rejected: {err}");
                return report;
            }
        },
        None => SubmissionTemplate::auto(),
    };

    match drive(cli, template).await {
        Ok(report) => report,
        Err(message) => {
            log::error!("{message}");
            let mut report = SubmissionReport::fallback(cli.url.clone());
            report.message = message;
            report
        }
    }
}

async fn drive(cli: &Cli, template: SubmissionTemplate) -> Result<SubmissionReport, String> {
    let config = BrowserConfig::builder()
        .build()
        .map_err(|err| format!("browser config failed: {err}"))?;
    let (mut browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|err| format!("browser launch failed: {err}"))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(err) = event {
                log::debug!("cdp handler event error: {err}");
            }
        }
    });

    let wait_until = template
        .wait_until
        .as_deref()
        .map(WaitUntil::parse)
        .unwrap_or_default();

    let result = async {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| format!("page open failed: {err}"))?;
        let session = ChromiumSession::attach(page)
            .await
            .map_err(|err| format!("session attach failed: {err}"))?;
        session
            .navigate(&cli.url, wait_until)
            .await
            .map_err(|err| format!("navigation failed: {err}"))?;

        let runner = FormRunner::builder(template)
            .with_transcriber(Arc::new(WhisperCliTranscriber::new()))
            .build();
        Ok(runner.run(&session).await)
    }
    .await;

    let _ = browser.close().await;
    handler_task.abort();
    result
}
