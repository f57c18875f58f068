//! High level engine orchestration.
//!
//! Wires together field discovery, challenge detection and solving, the
//! submit action, and submission verification into one run against a page
//! session the caller owns. [`FormRunner::run`] is the single outermost
//! boundary: whatever happens inside, it yields a well-formed report,
//! substituting the static fallback exactly once at this layer.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::challenges::core::{ChallengeDescriptor, SolveAttempt, SolveErrorKind};
use crate::challenges::detectors::ChallengeDetector;
use crate::challenges::pipeline::{ChallengeSolver, SolveBudget};
use crate::challenges::solvers::audio::AudioChallengeResolver;
use crate::challenges::solvers::click;
use crate::config::SubmissionTemplate;
use crate::executor::{CancelFlag, ResilientExecutor};
use crate::external_deps::transcribe::AudioTranscriber;
use crate::forms::{self, FieldCategory, FieldDiscoveryEngine};
use crate::report::{CaptchaReport, RunStatus, SubmissionReport};
use crate::session::{scripts, PageSession, SessionError};
use crate::submission::{DeliveryAssessment, SubmissionEvidence, SubmissionVerifier};

/// Internal error surfaced only inside the engine; `run` converts it into
/// the fallback report at the boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("page session error: {0}")]
    Session(#[from] SessionError),
}

/// Fluent builder for [`FormRunner`].
pub struct FormRunnerBuilder {
    template: SubmissionTemplate,
    transcriber: Option<Arc<dyn AudioTranscriber>>,
    solve_budget: Option<SolveBudget>,
    detector: ChallengeDetector,
    executor: ResilientExecutor,
}

impl FormRunnerBuilder {
    pub fn new(template: SubmissionTemplate) -> Self {
        Self {
            template,
            transcriber: None,
            solve_budget: None,
            detector: ChallengeDetector::new(),
            executor: ResilientExecutor::default(),
        }
    }

    /// Attach a speech-to-text adapter, enabling the audio strategy.
    pub fn with_transcriber(mut self, transcriber: Arc<dyn AudioTranscriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_solve_budget(mut self, budget: SolveBudget) -> Self {
        self.solve_budget = Some(budget);
        self
    }

    pub fn with_detector(mut self, detector: ChallengeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_executor(mut self, executor: ResilientExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn build(self) -> FormRunner {
        let budget = self
            .solve_budget
            .unwrap_or_else(|| SolveBudget::default().with_overall(self.template.captcha_timeout()));

        let mut solver = ChallengeSolver::new(self.detector).with_budget(budget);
        if let Some(transcriber) = self.transcriber {
            solver = solver.with_audio_resolver(AudioChallengeResolver::new(transcriber));
        }

        let discovery = FieldDiscoveryEngine::new()
            .with_weights(self.template.score_weights.clone().unwrap_or_default());

        let verifier = SubmissionVerifier::new()
            .with_window(self.template.post_submit_wait())
            .with_success_indicators(self.template.success_indicators.clone());

        FormRunner {
            template: self.template,
            discovery,
            solver,
            verifier,
            executor: self.executor,
        }
    }
}

/// Challenge-aware form submission engine bound to one template.
///
/// The page session stays exclusively owned by the caller; the engine
/// neither opens nor closes it.
pub struct FormRunner {
    template: SubmissionTemplate,
    discovery: FieldDiscoveryEngine,
    solver: ChallengeSolver,
    verifier: SubmissionVerifier,
    executor: ResilientExecutor,
}

impl FormRunner {
    pub fn builder(template: SubmissionTemplate) -> FormRunnerBuilder {
        FormRunnerBuilder::new(template)
    }

    /// Run the full pipeline; always yields a well-formed report.
    pub async fn run(&self, page: &dyn PageSession) -> SubmissionReport {
        self.run_with_cancel(page, &CancelFlag::inert()).await
    }

    /// As [`run`](Self::run), observing a cooperative cancellation flag.
    pub async fn run_with_cancel(
        &self,
        page: &dyn PageSession,
        cancel: &CancelFlag,
    ) -> SubmissionReport {
        match self.run_inner(page, cancel).await {
            Ok(report) => report,
            Err(err) => {
                log::error!("engine run failed: {err}; substituting fallback record");
                let url = match page.current_url().await {
                    Ok(url) => url.to_string(),
                    Err(_) => String::new(),
                };
                SubmissionReport::fallback(url)
            }
        }
    }

    async fn run_inner(
        &self,
        page: &dyn PageSession,
        cancel: &CancelFlag,
    ) -> Result<SubmissionReport, EngineError> {
        let url = page.current_url().await?;
        log::info!("running submission against {url}");

        let watched = self.fill_fields(page, cancel).await?;
        log::debug!("{} fields filled", watched.len());

        let descriptor = self.solver.detector().detect(page).await;
        let attempt = self.solver.solve(page, &descriptor, cancel).await;

        if descriptor.present && !attempt.success {
            let status = if attempt.error_kind == SolveErrorKind::Timeout {
                RunStatus::Timeout
            } else {
                RunStatus::Error
            };
            return Ok(SubmissionReport::new(
                status,
                format!("challenge unsolved: {}", attempt.error_kind),
                url.to_string(),
            )
            .with_error_type(attempt.error_kind.to_string())
            .with_captcha(CaptchaReport::from_attempt(&descriptor, &attempt)));
        }

        let form_action = self.read_form_action(page).await;
        let window = self.verifier.begin(page, &url, form_action.as_deref());

        let submit_clicked = click::click_with_fallbacks(
            page,
            &self.template.submit_selector,
            &click::default_ladder(),
            None,
        )
        .await;
        if submit_clicked.is_none() {
            return Ok(SubmissionReport::new(
                RunStatus::Error,
                "submit control not reachable",
                url.to_string(),
            )
            .with_error_type(SolveErrorKind::Unknown.to_string())
            .with_captcha(CaptchaReport::from_attempt(&descriptor, &attempt)));
        }

        let evidence = self.verifier.conclude(window, page, &watched).await;
        Ok(compose_report(
            url.to_string(),
            &descriptor,
            &attempt,
            &evidence,
        ))
    }

    /// Fill explicit mappings, or discover and fill when none are given.
    /// Returns the selectors written, used later for the cleared-field check.
    async fn fill_fields(
        &self,
        page: &dyn PageSession,
        cancel: &CancelFlag,
    ) -> Result<Vec<String>, EngineError> {
        let mut watched = Vec::new();

        if self.template.has_explicit_fields() {
            for mapping in &self.template.fields {
                let outcome = self
                    .executor
                    .run("fill_field", cancel, || async {
                        match forms::write_value(page, &mapping.selector, &mapping.value).await {
                            Ok(true) => Ok(()),
                            Ok(false) => Err(SolveErrorKind::Unknown),
                            Err(err) => Err(err.into()),
                        }
                    })
                    .await;
                if outcome.is_completed() {
                    watched.push(mapping.selector.clone());
                } else {
                    log::warn!(
                        "field {} could not be filled ({})",
                        mapping.selector,
                        outcome.error_kind()
                    );
                }
            }
            return Ok(watched);
        }

        let fields = self.discovery.discover(page).await?;
        log::debug!("auto-discovered {} candidate fields", fields.len());
        self.discovery
            .fill(page, &fields, &HashMap::<FieldCategory, String>::new())
            .await?;
        watched.extend(
            fields
                .iter()
                .filter(|field| field.category != FieldCategory::Honeypot)
                .map(|field| field.selector_hint.clone()),
        );
        Ok(watched)
    }

    async fn read_form_action(&self, page: &dyn PageSession) -> Option<String> {
        match page.eval(&scripts::read_attribute("form", "action")).await {
            Ok(serde_json::Value::String(action)) if !action.trim().is_empty() => Some(action),
            _ => None,
        }
    }
}

fn compose_report(
    url: String,
    descriptor: &ChallengeDescriptor,
    attempt: &SolveAttempt,
    evidence: &SubmissionEvidence,
) -> SubmissionReport {
    let (status, message, ambiguous) = match evidence.assessment() {
        DeliveryAssessment::Confirmed => (
            RunStatus::Success,
            "submission confirmed by an origin round trip".to_string(),
            false,
        ),
        DeliveryAssessment::Ambiguous => {
            if evidence.form_submission_detected() {
                (
                    RunStatus::Submitted,
                    "request observed but delivery not confirmed".to_string(),
                    true,
                )
            } else {
                (
                    RunStatus::Completed,
                    "page indicates success without an observed round trip".to_string(),
                    true,
                )
            }
        }
        DeliveryAssessment::NotObserved => {
            if evidence.page_error_text_found {
                let report = SubmissionReport::new(
                    RunStatus::Error,
                    "origin reported an error after submit",
                    url,
                )
                .with_error_type(SolveErrorKind::SubmissionRejected.to_string())
                .with_recovered(attempt.recovered)
                .with_captcha(CaptchaReport::from_attempt(descriptor, attempt))
                .with_evidence(evidence);
                return report;
            }
            (
                RunStatus::Submitted,
                "submit dispatched; no delivery evidence within the window".to_string(),
                true,
            )
        }
    };

    SubmissionReport::new(status, message, url)
        .with_recovered(attempt.recovered || ambiguous)
        .with_captcha(CaptchaReport::from_attempt(descriptor, attempt))
        .with_evidence(evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenges::core::{BackoffSchedule, PollBudget};
    use crate::session::testing::MockPage;
    use crate::session::{NetworkEvent, SessionResult, WaitUntil};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::broadcast;
    use url::Url;

    const PLAIN_FORM: &str = r#"
        <html><body>
          <form action="/submit">
            <input type="text" id="name" name="name" />
            <input type="email" id="email" name="email" />
            <textarea id="message" name="message"></textarea>
            <button id="send" type="submit">Send</button>
          </form>
        </body></html>
    "#;

    const GUARDED_PAGE: &str = r#"
        <html><body>
          <form action="/submit"><input type="email" name="email" /></form>
          <div class="g-recaptcha" data-sitekey="6LdAbCdEfGhIjKlMnOpQrStUvWx"></div>
          <script src="https://www.google.com/recaptcha/api.js"></script>
        </body></html>
    "#;

    fn tight_budget() -> SolveBudget {
        SolveBudget {
            overall: Duration::from_secs(3),
            per_strategy: Duration::from_secs(1),
            rearm_limit: 1,
            token_poll: PollBudget::new(2, Duration::from_millis(5)).with_variance(0.0),
            audio_switch_backoff: BackoffSchedule::new(vec![]),
            passive_backoff: BackoffSchedule::new(vec![]),
        }
    }

    fn explicit_template() -> SubmissionTemplate {
        SubmissionTemplate::from_json(
            r##"{
                "fields": [
                    { "selector": "#name", "value": "Ada Lovelace" },
                    { "selector": "#email", "value": "ada@example.com" },
                    { "selector": "#message", "value": "Hello, checking availability." }
                ],
                "submitSelector": "#send",
                "postSubmitWaitMs": 200
            }"##,
        )
        .expect("valid template")
    }

    fn wire_plain_page(page: &MockPage) {
        page.set_html(PLAIN_FORM);
        page.set_eval(|script| {
            if script.contains("getAttribute('action')") {
                return Ok(json!("/submit"));
            }
            if script.contains("'#name'") {
                return Ok(json!("Ada Lovelace"));
            }
            if script.contains("'#email'") {
                return Ok(json!("ada@example.com"));
            }
            if script.contains("'#message'") {
                return Ok(json!("Hello, checking availability."));
            }
            if script.contains("innerText") {
                return Ok(json!("Thank you! Your message has been sent."));
            }
            Ok(Value::Null)
        });
    }

    #[tokio::test]
    async fn explicit_mapping_without_challenge_reports_success() {
        let page = MockPage::new("https://example.com/contact");
        wire_plain_page(&page);

        // The submit click produces a real round trip to the form action.
        let sender = page.event_sender();
        page.on_click(move |selector| {
            if selector == "#send" {
                let _ = sender.send(NetworkEvent::request("https://example.com/submit", "POST"));
                let _ = sender.send(NetworkEvent::response("https://example.com/submit", 200));
            }
        });

        let runner = FormRunner::builder(explicit_template())
            .with_solve_budget(tight_budget())
            .build();
        let report = runner.run(&page).await;

        assert_eq!(report.status, RunStatus::Success);
        assert!(!report.recovered);
        assert!(!report.captcha_result.present);
        assert!(report.form_submission_detected);
        assert_eq!(report.post_requests, 1);
        let json: Value = serde_json::from_str(&report.to_json()).expect("well-formed");
        assert_eq!(json["captchaResult"]["present"], false);
    }

    #[tokio::test]
    async fn unsolved_challenge_blocks_the_submit_click() {
        let page = MockPage::new("https://example.com/contact");
        page.set_html(GUARDED_PAGE);
        let runner = FormRunner::builder(explicit_template())
            .with_solve_budget(tight_budget())
            .with_executor(
                ResilientExecutor::new(Duration::from_secs(1))
                    .with_max_retries(0)
                    .with_retry_delay(Duration::from_millis(1)),
            )
            .build();

        let report = runner.run(&page).await;

        assert!(matches!(report.status, RunStatus::Error | RunStatus::Timeout));
        assert!(report.captcha_result.present);
        assert!(!report.captcha_result.token_obtained);
        assert!(
            !page.clicks().contains(&"#send".to_string()),
            "submission must not be dispatched with an unsolved challenge"
        );
    }

    #[tokio::test]
    async fn no_evidence_is_reported_as_unconfirmed_not_success() {
        let page = MockPage::new("https://example.com/contact");
        page.set_html(PLAIN_FORM);
        page.set_eval(|script| {
            if script.contains("'#name'") {
                return Ok(json!("Ada Lovelace"));
            }
            if script.contains("'#email'") {
                return Ok(json!("ada@example.com"));
            }
            if script.contains("'#message'") {
                return Ok(json!("Hello, checking availability."));
            }
            Ok(Value::Null)
        });
        let runner = FormRunner::builder(explicit_template())
            .with_solve_budget(tight_budget())
            .build();

        let report = runner.run(&page).await;
        assert_eq!(report.status, RunStatus::Submitted);
        assert!(report.recovered, "ambiguity must be flagged");
        assert!(!report.form_submission_detected);
    }

    struct DeadPage;

    #[async_trait]
    impl crate::session::PageSession for DeadPage {
        async fn current_url(&self) -> SessionResult<Url> {
            Err(crate::session::SessionError::Detached)
        }
        async fn navigate(&self, _url: &str, _wait: WaitUntil) -> SessionResult<()> {
            Err(crate::session::SessionError::Detached)
        }
        async fn content(&self) -> SessionResult<String> {
            Err(crate::session::SessionError::Detached)
        }
        async fn eval(&self, _script: &str) -> SessionResult<Value> {
            Err(crate::session::SessionError::Detached)
        }
        async fn click(&self, _selector: &str) -> SessionResult<()> {
            Err(crate::session::SessionError::Detached)
        }
        async fn type_text(&self, _selector: &str, _text: &str) -> SessionResult<()> {
            Err(crate::session::SessionError::Detached)
        }
        fn network_events(&self) -> broadcast::Receiver<NetworkEvent> {
            let (tx, rx) = broadcast::channel(1);
            drop(tx);
            rx
        }
    }

    #[tokio::test]
    async fn dead_session_yields_the_fallback_record_not_a_panic() {
        let runner = FormRunner::builder(explicit_template())
            .with_solve_budget(tight_budget())
            .build();
        let report = runner.run(&DeadPage).await;
        assert_eq!(report.status, RunStatus::Error);
        assert!(report.recovered);
        let json: Value = serde_json::from_str(&report.to_json()).expect("well-formed");
        assert_eq!(json["status"], "error");
    }
}
