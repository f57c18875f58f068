//! Submission verification.
//!
//! Confirms that a dispatched form submission produced a real server round
//! trip rather than a client-side no-op. Observation starts immediately
//! before the submit action and runs for a bounded window afterwards;
//! outbound traffic is correlated to the target form in decreasing order of
//! confidence, with known tracking domains excluded from all matching.
//! Ambiguous evidence is reported as such, never coerced to a verdict.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};
use url::Url;

use crate::challenges::core::markers::{ERROR_PHRASES, SUCCESS_PHRASES, TRACKING_DOMAINS};
use crate::session::{scripts, NetworkEvent, PageSession};

/// Evidence gathered during one post-submission window.
///
/// Before a submission has been dispatched all fields are empty/false; that
/// is the defined answer, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionEvidence {
    pub matched_request_url: String,
    pub http_status: Option<u16>,
    pub page_success_text_found: bool,
    pub page_error_text_found: bool,
    pub fields_cleared_after_submit: bool,
    pub post_requests: u32,
    pub post_responses: u32,
}

impl SubmissionEvidence {
    /// Whether any non-tracking request was positively correlated to the form.
    pub fn form_submission_detected(&self) -> bool {
        !self.matched_request_url.is_empty()
    }

    /// Collapse the evidence into a tri-state delivery verdict.
    pub fn assessment(&self) -> DeliveryAssessment {
        if self.page_error_text_found {
            return DeliveryAssessment::NotObserved;
        }
        if self.form_submission_detected() {
            if matches!(self.http_status, Some(status) if (200..400).contains(&status)) {
                return DeliveryAssessment::Confirmed;
            }
            return DeliveryAssessment::Ambiguous;
        }
        if self.page_success_text_found || self.fields_cleared_after_submit {
            return DeliveryAssessment::Ambiguous;
        }
        DeliveryAssessment::NotObserved
    }
}

/// Delivery verdict derived from the evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAssessment {
    /// A correlated request/response pair with a healthy status.
    Confirmed,
    /// Some signal arrived but not a full round-trip confirmation.
    Ambiguous,
    /// Nothing beyond the submit click was observed.
    NotObserved,
}

/// Ranking of how a request was correlated to the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchRank {
    None,
    SameHost,
    DeclaredAction,
}

/// Live observation handle created just before the submit action.
pub struct ObservationWindow {
    rx: broadcast::Receiver<NetworkEvent>,
    page_host: Option<String>,
    form_action: Option<Url>,
}

/// Observes network traffic and page content around a submit action.
pub struct SubmissionVerifier {
    window: Duration,
    tracking_domains: Vec<String>,
    success_phrases: Vec<String>,
    error_phrases: Vec<String>,
}

impl Default for SubmissionVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionVerifier {
    pub fn new() -> Self {
        Self {
            window: Duration::from_secs(8),
            tracking_domains: TRACKING_DOMAINS.iter().map(|d| d.to_string()).collect(),
            success_phrases: SUCCESS_PHRASES.iter().map(|p| p.to_string()).collect(),
            error_phrases: ERROR_PHRASES.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Extend the success phrase table with template-supplied indicators.
    pub fn with_success_indicators<I, S>(mut self, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.success_phrases
            .extend(indicators.into_iter().map(|s| s.into().to_lowercase()));
        self
    }

    pub fn with_tracking_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracking_domains
            .extend(domains.into_iter().map(Into::into));
        self
    }

    /// Start observing. Must be called before the submit action is
    /// dispatched so no early traffic is missed.
    pub fn begin(&self, page: &dyn PageSession, page_url: &Url, form_action: Option<&str>) -> ObservationWindow {
        let form_action = form_action.and_then(|raw| {
            let decoded = html_escape::decode_html_entities(raw);
            let trimmed = decoded.trim();
            if trimmed.is_empty() {
                return None;
            }
            page_url.join(trimmed).ok()
        });
        ObservationWindow {
            rx: page.network_events(),
            page_host: page_url.host_str().map(|h| h.to_string()),
            form_action,
        }
    }

    /// Drain observations until a confirming signal arrives or the window
    /// elapses, then finalize with the page-content checks.
    pub async fn conclude(
        &self,
        mut window: ObservationWindow,
        page: &dyn PageSession,
        watched_selectors: &[String],
    ) -> SubmissionEvidence {
        let deadline = Instant::now() + self.window;
        let mut evidence = SubmissionEvidence::default();
        let mut rank = MatchRank::None;
        let mut counted_posts: HashSet<String> = HashSet::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let event = match timeout(remaining, window.rx.recv()).await {
                Ok(Ok(event)) => event,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    log::warn!("network observer lagged, skipped {skipped} events");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Err(_) => break,
            };

            match event {
                NetworkEvent::Request(request) => {
                    if !is_form_shaped(&request.method) || self.is_tracking(&request.url) {
                        continue;
                    }
                    evidence.post_requests += 1;
                    counted_posts.insert(request.url.clone());

                    let request_rank = self.rank_request(&window, &request.url);
                    if request_rank > rank {
                        rank = request_rank;
                        evidence.matched_request_url = request.url.clone();
                        evidence.http_status = None;
                    }
                }
                NetworkEvent::Response(response) => {
                    if self.is_tracking(&response.url) {
                        continue;
                    }
                    if counted_posts.contains(&response.url) {
                        evidence.post_responses += 1;
                    }
                    if response.url == evidence.matched_request_url {
                        evidence.http_status = Some(response.status);
                    }
                }
            }

            // A correlated pair is the confirming signal; stop early.
            if rank == MatchRank::DeclaredAction && evidence.http_status.is_some() {
                break;
            }
        }

        self.scan_page(page, &mut evidence).await;
        evidence.fields_cleared_after_submit =
            fields_cleared(page, watched_selectors).await;
        evidence
    }

    fn rank_request(&self, window: &ObservationWindow, request_url: &str) -> MatchRank {
        let Ok(url) = Url::parse(request_url) else {
            return MatchRank::None;
        };
        if let Some(action) = &window.form_action {
            if url.host_str() == action.host_str() && url.path() == action.path() {
                return MatchRank::DeclaredAction;
            }
        }
        match (&window.page_host, url.host_str()) {
            (Some(page_host), Some(host)) if page_host == host => MatchRank::SameHost,
            _ => MatchRank::None,
        }
    }

    fn is_tracking(&self, raw_url: &str) -> bool {
        let Ok(url) = Url::parse(raw_url) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        self.tracking_domains
            .iter()
            .any(|domain| host == domain || host.ends_with(&format!(".{domain}")))
    }

    async fn scan_page(&self, page: &dyn PageSession, evidence: &mut SubmissionEvidence) {
        let text = match page.eval(&scripts::page_text()).await {
            Ok(Value::String(text)) => text.to_lowercase(),
            _ => return,
        };
        evidence.page_success_text_found = self
            .success_phrases
            .iter()
            .any(|phrase| text.contains(phrase));
        evidence.page_error_text_found = self
            .error_phrases
            .iter()
            .any(|phrase| text.contains(phrase));
    }
}

/// POST-shaped methods consistent with a form payload.
fn is_form_shaped(method: &str) -> bool {
    matches!(method.to_ascii_uppercase().as_str(), "POST" | "PUT")
}

async fn fields_cleared(page: &dyn PageSession, watched_selectors: &[String]) -> bool {
    if watched_selectors.is_empty() {
        return false;
    }
    for selector in watched_selectors {
        match page.eval(&scripts::read_value(selector)).await {
            Ok(Value::String(value)) if value.is_empty() => {}
            _ => return false,
        }
    }
    true
}
