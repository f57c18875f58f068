//! # formrunner-rs
//!
//! Challenge-aware form submission engine: detects which human-verification
//! mechanism guards a page, drives a layered sequence of solving strategies
//! (including audio challenge transcription), fills the target form, and
//! confirms through passive network observation that the submission actually
//! reached the origin server.
//!
//! The engine consumes a [`PageSession`] — a minimal handle to one loaded
//! page (query, evaluate, click, type, navigate, network events) — and is
//! portable across any automation driver exposing that surface. A Chrome
//! DevTools adapter ships for the CLI.
//!
//! ## Example
//!
//! ```no_run
//! use formrunner_rs::{FormRunner, SubmissionTemplate};
//! # use formrunner_rs::PageSession;
//!
//! # async fn run(page: &dyn PageSession) {
//! let template = SubmissionTemplate::from_json(
//!     r##"{ "submitSelector": "#send" }"##,
//! ).expect("template");
//! let runner = FormRunner::builder(template).build();
//! let report = runner.run(page).await;
//! println!("{}", report.to_json());
//! # }
//! ```

mod engine;

pub mod challenges;
pub mod config;
pub mod executor;
pub mod external_deps;
pub mod forms;
pub mod report;
pub mod session;
pub mod submission;

pub use crate::engine::{EngineError, FormRunner, FormRunnerBuilder};

pub use crate::challenges::core::{
    redact_token, BackoffSchedule, ChallengeDescriptor, ChallengeKind, PollBudget, SolveAttempt,
    SolveErrorKind,
};

pub use crate::challenges::detectors::ChallengeDetector;

pub use crate::challenges::pipeline::{ChallengeSolver, SolveBudget, SolveState};

pub use crate::challenges::solvers::audio::{
    AudioChallengeResolver, AudioFetcher, AudioResolveError, HttpAudioFetcher,
};

pub use crate::challenges::solvers::click::{
    default_ladder, widget_ladder, AttemptClick, FrameScopedClick, NativeClick, ScriptedClick,
    SynthesizedEventsClick,
};

pub use crate::config::{ConfigError, FieldMapping, SubmissionTemplate};

pub use crate::executor::{cancel_pair, CancelFlag, CancelHandle, ResilientExecutor, StageOutcome};

pub use crate::external_deps::transcribe::{
    AudioTranscriber, TranscribeError, TranscriberConfig, WhisperCliTranscriber,
};

pub use crate::forms::{
    FieldCategory, FieldDiscoveryEngine, FormFieldDescriptor, FormScoreWeights,
};

pub use crate::report::{CaptchaReport, RunStatus, SubmissionReport};

pub use crate::session::{
    chromium::ChromiumSession, NetworkEvent, PageSession, RequestObservation, ResponseObservation,
    SessionError, SessionResult, WaitUntil,
};

pub use crate::submission::{DeliveryAssessment, SubmissionEvidence, SubmissionVerifier};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
