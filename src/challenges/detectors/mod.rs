//! Challenge detection.
//!
//! Classifies the verification mechanism guarding a page by matching its
//! snapshot against the marker tables, and separately detects a previously
//! solved checkbox silently reverting to an expired state. Detection never
//! blocks past a short fixed budget and is side-effect-free on the page.

use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;

use crate::challenges::core::markers::{
    self, ANCHOR_FRAME_SELECTOR, AUDIO_CAPABLE_MARKERS, CHALLENGE_FRAME_SELECTORS,
    CHECKBOX_MARKERS, CHECKBOX_STATE_SELECTOR, EXPIRY_MARKER_SELECTORS, EXPIRY_TEXT_RE,
    GENERIC_CHALLENGE_MARKERS, OPAQUE_MARKERS,
};
use crate::challenges::core::probe;
use crate::challenges::core::{ChallengeDescriptor, ChallengeKind};
use crate::session::{scripts, PageSession};

const DEFAULT_INSPECT_BUDGET: Duration = Duration::from_millis(800);

/// Marker-table based challenge detector.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    inspect_budget: Duration,
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeDetector {
    pub fn new() -> Self {
        Self {
            inspect_budget: DEFAULT_INSPECT_BUDGET,
        }
    }

    /// Override the per-call inspection budget.
    pub fn with_inspect_budget(mut self, budget: Duration) -> Self {
        self.inspect_budget = budget;
        self
    }

    /// Classify the verification mechanism present on the page.
    ///
    /// Always returns within the inspection budget; a page that cannot be
    /// inspected in time is reported as carrying no challenge rather than
    /// blocking the caller.
    pub async fn detect(&self, page: &dyn PageSession) -> ChallengeDescriptor {
        match timeout(self.inspect_budget, self.inspect(page)).await {
            Ok(descriptor) => descriptor,
            Err(_) => {
                log::debug!("challenge inspection budget elapsed; reporting no challenge");
                ChallengeDescriptor::absent()
            }
        }
    }

    async fn inspect(&self, page: &dyn PageSession) -> ChallengeDescriptor {
        let html = match page.content().await {
            Ok(html) => html,
            Err(err) => {
                log::warn!("page snapshot unavailable during detection: {err}");
                return ChallengeDescriptor::absent();
            }
        };

        let kind = Self::classify(&html);
        if kind == ChallengeKind::None {
            return ChallengeDescriptor::absent();
        }

        let site_key = markers::extract_site_key(&html).unwrap_or_default();
        let already_solved =
            kind.is_solvable() && probe::read_page_token(page).await.is_some();

        log::debug!(
            "detected {} challenge (site key: {}, already solved: {})",
            kind,
            if site_key.is_empty() { "-" } else { "present" },
            already_solved
        );

        ChallengeDescriptor {
            kind,
            site_key,
            present: true,
            already_solved,
        }
    }

    /// Classification precedence: audio-capable and checkbox widgets first,
    /// then known opaque iframe origins, then generic decoy heuristics.
    /// First match wins.
    pub fn classify(html: &str) -> ChallengeKind {
        if markers::any_match(&AUDIO_CAPABLE_MARKERS, html) {
            ChallengeKind::AudioCapable
        } else if markers::any_match(&CHECKBOX_MARKERS, html) {
            ChallengeKind::Checkbox
        } else if markers::any_match(&OPAQUE_MARKERS, html) {
            ChallengeKind::Opaque
        } else if markers::any_match(&GENERIC_CHALLENGE_MARKERS, html) {
            ChallengeKind::Opaque
        } else {
            ChallengeKind::None
        }
    }

    /// Whether a previously solved checkbox has silently reverted.
    ///
    /// Polled rather than event-driven: the underlying DOM offers no
    /// reliable change notification. `surface_was_open` lets the caller
    /// treat the disappearance of a challenge surface it saw open as an
    /// expiry signal too.
    pub async fn is_expired(&self, page: &dyn PageSession, surface_was_open: bool) -> bool {
        let script = scripts::widget_state_probe(
            ANCHOR_FRAME_SELECTOR,
            CHECKBOX_STATE_SELECTOR,
            EXPIRY_MARKER_SELECTORS,
            CHALLENGE_FRAME_SELECTORS,
        );

        let state = match timeout(self.inspect_budget, page.eval(&script)).await {
            Ok(Ok(value)) => value,
            _ => return false,
        };

        let checked = state.get("checked").and_then(Value::as_bool);
        let error_visible = state
            .get("errorVisible")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let surface_open = state
            .get("surfaceOpen")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if error_visible {
            return true;
        }

        if checked == Some(false) {
            let expiry_text = match timeout(self.inspect_budget, page.eval(&scripts::page_text()))
                .await
            {
                Ok(Ok(Value::String(text))) => EXPIRY_TEXT_RE.is_match(&text),
                _ => false,
            };
            if expiry_text {
                return true;
            }
        }

        surface_was_open && !surface_open && checked != Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::MockPage;
    use serde_json::json;

    const RECAPTCHA_PAGE: &str = r#"
        <html><body>
          <form id="contact"><input name="email" /></form>
          <div class="g-recaptcha" data-sitekey="6LdAbCdEfGhIjKlMnOpQrStUvWx"></div>
          <iframe src="https://www.google.com/recaptcha/api2/anchor?k=6Ld"></iframe>
          <script src="https://www.google.com/recaptcha/api.js"></script>
        </body></html>
    "#;

    const TURNSTILE_PAGE: &str = r#"
        <html><body>
          <div class="cf-turnstile" data-sitekey="0x4AAAAAAABBBBCCCC"></div>
          <script src="https://challenges.cloudflare.com/turnstile/v0/api.js"></script>
        </body></html>
    "#;

    const HCAPTCHA_PAGE: &str = r#"
        <html><body>
          <iframe src="https://newassets.hcaptcha.com/captcha/v1/frame"></iframe>
        </body></html>
    "#;

    const DECOY_PAGE: &str = r#"
        <html><body>
          <img alt="captcha image" src="/captcha.png" />
          <input name="captcha_answer" type="text" />
        </body></html>
    "#;

    #[tokio::test]
    async fn classifies_audio_capable_widget() {
        let page = MockPage::new("https://example.com/contact");
        page.set_html(RECAPTCHA_PAGE);
        let detector = ChallengeDetector::new();
        let descriptor = detector.detect(&page).await;
        assert!(descriptor.present);
        assert_eq!(descriptor.kind, ChallengeKind::AudioCapable);
        assert_eq!(descriptor.site_key, "6LdAbCdEfGhIjKlMnOpQrStUvWx");
        assert!(!descriptor.already_solved);
    }

    #[tokio::test]
    async fn classifies_checkbox_only_widget() {
        let page = MockPage::new("https://example.com/");
        page.set_html(TURNSTILE_PAGE);
        let descriptor = ChallengeDetector::new().detect(&page).await;
        assert_eq!(descriptor.kind, ChallengeKind::Checkbox);
    }

    #[tokio::test]
    async fn classifies_opaque_iframe_origin() {
        let page = MockPage::new("https://example.com/");
        page.set_html(HCAPTCHA_PAGE);
        let descriptor = ChallengeDetector::new().detect(&page).await;
        assert_eq!(descriptor.kind, ChallengeKind::Opaque);
    }

    #[tokio::test]
    async fn decoy_keywords_classify_as_opaque() {
        let page = MockPage::new("https://example.com/");
        page.set_html(DECOY_PAGE);
        let descriptor = ChallengeDetector::new().detect(&page).await;
        assert!(descriptor.present);
        assert_eq!(descriptor.kind, ChallengeKind::Opaque);
    }

    #[tokio::test]
    async fn absence_of_markers_reports_no_challenge() {
        let page = MockPage::new("https://example.com/");
        page.set_html("<html><body><form><input name='email'/></form></body></html>");
        let descriptor = ChallengeDetector::new().detect(&page).await;
        assert!(!descriptor.present);
        assert_eq!(descriptor.kind, ChallengeKind::None);
        assert!(descriptor.site_key.is_empty());
    }

    #[tokio::test]
    async fn detection_is_idempotent_without_dom_mutation() {
        let page = MockPage::new("https://example.com/contact");
        page.set_html(RECAPTCHA_PAGE);
        let detector = ChallengeDetector::new();
        let first = detector.detect(&page).await;
        let second = detector.detect(&page).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn already_solved_reads_token_field() {
        let page = MockPage::new("https://example.com/contact");
        page.set_html(RECAPTCHA_PAGE);
        page.set_eval(|script| {
            if script.contains("g-recaptcha-response") {
                Ok(json!("03AGdBq2-existing-token"))
            } else {
                Ok(Value::Null)
            }
        });
        let descriptor = ChallengeDetector::new().detect(&page).await;
        assert!(descriptor.already_solved);
    }

    #[tokio::test]
    async fn expiry_fires_on_visible_error_marker() {
        let page = MockPage::new("https://example.com/contact");
        page.set_eval(|script| {
            if script.contains("errorVisible") {
                Ok(json!({ "checked": false, "errorVisible": true, "surfaceOpen": false }))
            } else {
                Ok(Value::Null)
            }
        });
        assert!(ChallengeDetector::new().is_expired(&page, false).await);
    }

    #[tokio::test]
    async fn expiry_fires_on_unchecked_state_with_expiry_text() {
        let page = MockPage::new("https://example.com/contact");
        page.set_eval(|script| {
            if script.contains("errorVisible") {
                Ok(json!({ "checked": false, "errorVisible": false, "surfaceOpen": false }))
            } else if script.contains("innerText") {
                Ok(json!("Verification challenge expired. Check the checkbox again."))
            } else {
                Ok(Value::Null)
            }
        });
        assert!(ChallengeDetector::new().is_expired(&page, false).await);
    }

    #[tokio::test]
    async fn expiry_fires_when_open_surface_disappears() {
        let page = MockPage::new("https://example.com/contact");
        page.set_eval(|script| {
            if script.contains("errorVisible") {
                Ok(json!({ "checked": null, "errorVisible": false, "surfaceOpen": false }))
            } else {
                Ok(json!(""))
            }
        });
        let detector = ChallengeDetector::new();
        assert!(detector.is_expired(&page, true).await);
        assert!(!detector.is_expired(&page, false).await);
    }

    #[tokio::test]
    async fn healthy_checked_widget_is_not_expired() {
        let page = MockPage::new("https://example.com/contact");
        page.set_eval(|script| {
            if script.contains("errorVisible") {
                Ok(json!({ "checked": true, "errorVisible": false, "surfaceOpen": false }))
            } else {
                Ok(json!(""))
            }
        });
        assert!(!ChallengeDetector::new().is_expired(&page, true).await);
    }
}
