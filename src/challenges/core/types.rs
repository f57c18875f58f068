//! Core data structures shared across challenge detection and solving layers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::session::SessionError;

/// High level challenge categories recognised by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    None,
    Checkbox,
    AudioCapable,
    Opaque,
}

impl ChallengeKind {
    /// Whether the solving pipeline has a strategy for this kind.
    pub fn is_solvable(self) -> bool {
        matches!(self, ChallengeKind::Checkbox | ChallengeKind::AudioCapable)
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChallengeKind::None => "none",
            ChallengeKind::Checkbox => "checkbox",
            ChallengeKind::AudioCapable => "audio_capable",
            ChallengeKind::Opaque => "opaque",
        };
        f.write_str(name)
    }
}

/// Snapshot of the verification mechanism guarding a page.
///
/// Produced fresh on every detection call and never mutated afterwards; the
/// underlying DOM can of course change between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDescriptor {
    pub kind: ChallengeKind,
    /// Opaque site key extracted from the widget markup; empty when the
    /// mechanism does not advertise one.
    pub site_key: String,
    pub present: bool,
    /// The page already holds a token in its own response field.
    pub already_solved: bool,
}

impl ChallengeDescriptor {
    /// Descriptor for a page with no verification mechanism.
    pub fn absent() -> Self {
        Self {
            kind: ChallengeKind::None,
            site_key: String::new(),
            present: false,
            already_solved: false,
        }
    }
}

/// Failure taxonomy carried by solve attempts and the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolveErrorKind {
    None,
    NoSessionHandle,
    Timeout,
    ToolingUnavailable,
    NoTranscription,
    SubmissionRejected,
    Unknown,
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolveErrorKind::None => "None",
            SolveErrorKind::NoSessionHandle => "NoSessionHandle",
            SolveErrorKind::Timeout => "Timeout",
            SolveErrorKind::ToolingUnavailable => "ToolingUnavailable",
            SolveErrorKind::NoTranscription => "NoTranscription",
            SolveErrorKind::SubmissionRejected => "SubmissionRejected",
            SolveErrorKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

impl From<SessionError> for SolveErrorKind {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Detached => SolveErrorKind::NoSessionHandle,
            _ => SolveErrorKind::Unknown,
        }
    }
}

/// Outcome of one pass of the solving pipeline.
///
/// Tokens are capability credentials: they accompany a solved challenge and
/// must only ever reach logs through [`redact_token`]. An attempt with
/// `recovered = true` carries a best-effort, non-authoritative result.
#[derive(Debug, Clone)]
pub struct SolveAttempt {
    pub success: bool,
    pub token: Option<String>,
    pub error_kind: SolveErrorKind,
    pub solver_used: String,
    pub recovered: bool,
    pub timestamp: DateTime<Utc>,
}

impl SolveAttempt {
    /// Successful attempt with a token verified against the page's own field.
    ///
    /// An empty token would break the success-implies-token invariant, so it
    /// is downgraded to a failed attempt instead.
    pub fn solved(solver: impl Into<String>, token: String) -> Self {
        let solver = solver.into();
        if token.is_empty() {
            return Self::failed(solver, SolveErrorKind::Unknown);
        }
        Self {
            success: true,
            token: Some(token),
            error_kind: SolveErrorKind::None,
            solver_used: solver,
            recovered: false,
            timestamp: Utc::now(),
        }
    }

    /// Best-effort attempt produced by a fallback strategy.
    pub fn recovered(solver: impl Into<String>, token: String) -> Self {
        let mut attempt = Self::solved(solver, token);
        attempt.recovered = true;
        attempt
    }

    pub fn failed(solver: impl Into<String>, kind: SolveErrorKind) -> Self {
        Self {
            success: false,
            token: None,
            error_kind: kind,
            solver_used: solver.into(),
            recovered: false,
            timestamp: Utc::now(),
        }
    }

    /// Nothing to solve: the page carries no challenge.
    pub fn no_challenge() -> Self {
        Self {
            success: true,
            token: None,
            error_kind: SolveErrorKind::None,
            solver_used: "no_challenge".to_string(),
            recovered: false,
            timestamp: Utc::now(),
        }
    }
}

/// Token representation safe for logs: a short prefix plus the length.
pub fn redact_token(token: &str) -> String {
    const VISIBLE: usize = 8;
    if token.chars().count() <= VISIBLE {
        return format!("<token len={}>", token.len());
    }
    let prefix: String = token.chars().take(VISIBLE).collect();
    format!("{}…<len={}>", prefix, token.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solved_rejects_empty_token() {
        let attempt = SolveAttempt::solved("checkbox", String::new());
        assert!(!attempt.success);
        assert_eq!(attempt.error_kind, SolveErrorKind::Unknown);
    }

    #[test]
    fn solved_carries_token() {
        let attempt = SolveAttempt::solved("checkbox", "tok-123456".into());
        assert!(attempt.success);
        assert!(!attempt.recovered);
        assert_eq!(attempt.token.as_deref(), Some("tok-123456"));
    }

    #[test]
    fn recovered_is_flagged() {
        let attempt = SolveAttempt::recovered("fallback", "rec-fallback-aa".into());
        assert!(attempt.success);
        assert!(attempt.recovered);
    }

    #[test]
    fn no_challenge_is_immediate_success_without_token() {
        let attempt = SolveAttempt::no_challenge();
        assert!(attempt.success);
        assert!(attempt.token.is_none());
        assert_eq!(attempt.solver_used, "no_challenge");
    }

    #[test]
    fn redaction_hides_tail() {
        let redacted = redact_token("03AGdBq25aVeryLongOpaqueToken");
        assert!(redacted.starts_with("03AGdBq2"));
        assert!(!redacted.contains("OpaqueToken"));
    }

    #[test]
    fn detached_session_maps_to_no_session_handle() {
        let kind: SolveErrorKind = SessionError::Detached.into();
        assert_eq!(kind, SolveErrorKind::NoSessionHandle);
    }
}
