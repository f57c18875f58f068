//! Final result record.
//!
//! The process boundary emits exactly one flat JSON object per run. The
//! contract is that it is always well-formed JSON, even on catastrophic
//! internal failure: a static fallback record is substituted at the single
//! outermost layer rather than at every inner one.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::challenges::core::{ChallengeDescriptor, ChallengeKind, SolveAttempt};
use crate::submission::SubmissionEvidence;

/// Terminal status of one submission run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Delivery confirmed by an origin round trip.
    Success,
    /// Submit dispatched; delivery not (fully) confirmed.
    Submitted,
    /// Page-level success signals without an observed round trip.
    Completed,
    Timeout,
    Error,
}

/// Nested challenge outcome inside the report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaReport {
    pub present: bool,
    pub kind: ChallengeKind,
    pub solver_used: String,
    pub token_obtained: bool,
    pub recovered: bool,
    pub error_type: String,
}

impl CaptchaReport {
    pub fn absent() -> Self {
        Self {
            present: false,
            kind: ChallengeKind::None,
            solver_used: String::new(),
            token_obtained: false,
            recovered: false,
            error_type: String::new(),
        }
    }

    pub fn from_attempt(descriptor: &ChallengeDescriptor, attempt: &SolveAttempt) -> Self {
        Self {
            present: descriptor.present,
            kind: descriptor.kind,
            solver_used: attempt.solver_used.clone(),
            token_obtained: attempt.token.is_some(),
            recovered: attempt.recovered,
            error_type: if attempt.success {
                String::new()
            } else {
                attempt.error_kind.to_string()
            },
        }
    }
}

/// Flat result record emitted at the process boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReport {
    pub status: RunStatus,
    pub message: String,
    pub url: String,
    pub error_type: String,
    pub recovered: bool,
    pub timestamp: DateTime<Utc>,
    pub captcha_result: CaptchaReport,
    pub post_requests: u32,
    pub post_responses: u32,
    pub form_submission_detected: bool,
}

/// Hand-written last resort, used only if serialization itself fails.
const FALLBACK_JSON: &str = r#"{"status":"error","message":"internal failure; static fallback record substituted","url":"","errorType":"Unknown","recovered":true,"timestamp":null,"captchaResult":{"present":false,"kind":"none","solverUsed":"","tokenObtained":false,"recovered":false,"errorType":""},"postRequests":0,"postResponses":0,"formSubmissionDetected":false}"#;

impl SubmissionReport {
    pub fn new(status: RunStatus, message: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            url: url.into(),
            error_type: String::new(),
            recovered: false,
            timestamp: Utc::now(),
            captcha_result: CaptchaReport::absent(),
            post_requests: 0,
            post_responses: 0,
            form_submission_detected: false,
        }
    }

    /// Static last-resort record substituted once, at the outermost layer.
    pub fn fallback(url: impl Into<String>) -> Self {
        let mut report = Self::new(
            RunStatus::Error,
            "internal failure; fallback record substituted",
            url,
        );
        report.error_type = "Unknown".to_string();
        report.recovered = true;
        report
    }

    pub fn with_captcha(mut self, captcha: CaptchaReport) -> Self {
        self.captcha_result = captcha;
        self
    }

    pub fn with_evidence(mut self, evidence: &SubmissionEvidence) -> Self {
        self.post_requests = evidence.post_requests;
        self.post_responses = evidence.post_responses;
        self.form_submission_detected = evidence.form_submission_detected();
        self
    }

    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_recovered(mut self, recovered: bool) -> Self {
        self.recovered = recovered;
        self
    }

    /// Serialize to JSON; never emits a partial or non-JSON payload.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            log::error!("report serialization failed: {err}");
            FALLBACK_JSON.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenges::core::SolveAttempt;

    #[test]
    fn report_serializes_with_camel_case_keys() {
        let report = SubmissionReport::new(RunStatus::Success, "done", "https://example.com")
            .with_captcha(CaptchaReport::absent());
        let json = report.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).expect("well-formed");
        assert_eq!(value["status"], "success");
        assert_eq!(value["captchaResult"]["present"], false);
        assert!(value.get("formSubmissionDetected").is_some());
        assert!(value.get("postRequests").is_some());
        assert!(value.get("errorType").is_some());
    }

    #[test]
    fn fallback_record_is_well_formed_and_flagged() {
        let report = SubmissionReport::fallback("https://example.com");
        let value: serde_json::Value =
            serde_json::from_str(&report.to_json()).expect("well-formed");
        assert_eq!(value["status"], "error");
        assert_eq!(value["recovered"], true);
        assert_eq!(value["errorType"], "Unknown");
    }

    #[test]
    fn static_fallback_literal_parses() {
        let value: serde_json::Value = serde_json::from_str(FALLBACK_JSON).expect("well-formed");
        assert_eq!(value["status"], "error");
    }

    #[test]
    fn captcha_report_reflects_the_attempt() {
        let descriptor = ChallengeDescriptor {
            kind: ChallengeKind::AudioCapable,
            site_key: "key".into(),
            present: true,
            already_solved: false,
        };
        let attempt = SolveAttempt::recovered("fallback", "rec-fallback-00ff".into());
        let captcha = CaptchaReport::from_attempt(&descriptor, &attempt);
        assert!(captcha.present);
        assert!(captcha.token_obtained);
        assert!(captcha.recovered);
        assert!(captcha.error_type.is_empty());

        let failed = SolveAttempt::failed("audio", crate::challenges::core::SolveErrorKind::ToolingUnavailable);
        let captcha = CaptchaReport::from_attempt(&descriptor, &failed);
        assert_eq!(captcha.error_type, "ToolingUnavailable");
        assert!(!captcha.token_obtained);
    }
}
