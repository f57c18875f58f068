//! Core types and tables shared by challenge detection and solving.

pub mod markers;
pub mod probe;
pub mod timing;
pub mod types;

pub use markers::{extract_site_key, FALLBACK_TOKEN_PREFIX, FALLBACK_TOKEN_RE};
pub use timing::{BackoffSchedule, PollBudget};
pub use types::{
    redact_token, ChallengeDescriptor, ChallengeKind, SolveAttempt, SolveErrorKind,
};
