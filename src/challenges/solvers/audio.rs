//! Audio challenge resolution.
//!
//! Downloads the challenge audio, converts it to a decodable waveform,
//! transcribes it, submits the transcription, and polls for the resulting
//! token. Tooling is probed before any audio is touched so a missing decoder
//! fails fast instead of half-downloading. All transient artifacts live in a
//! workspace scoped to the call and are removed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tempfile::TempDir;
use thiserror::Error;
use tokio::time::sleep;

use crate::challenges::core::markers::{
    AUDIO_ANSWER_SELECTORS, AUDIO_REJECTED_SELECTOR, AUDIO_SOURCE_SELECTORS,
    AUDIO_VERIFY_SELECTORS,
};
use crate::challenges::core::probe;
use crate::challenges::core::{PollBudget, SolveErrorKind};
use crate::challenges::detectors::ChallengeDetector;
use crate::executor::CancelFlag;
use crate::external_deps::transcribe::{
    self, AudioTranscriber, TranscribeError,
};
use crate::session::{scripts, PageSession, SessionError};

use super::click::{self, AttemptClick};
use super::SolverStrategy;

/// Fetches raw challenge audio. Split behind a trait so the resolver's
/// pipeline can be exercised without network access.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, AudioResolveError>;
}

/// Default fetcher backed by reqwest.
pub struct HttpAudioFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpAudioFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpAudioFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, AudioResolveError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| AudioResolveError::Download(err.to_string()))?;
        if !response.status().is_success() {
            return Err(AudioResolveError::Download(format!(
                "audio endpoint answered {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map_err(|err| AudioResolveError::Download(err.to_string()))
    }
}

/// Failure states of the audio resolution pipeline.
#[derive(Debug, Error)]
pub enum AudioResolveError {
    #[error("required audio tooling unavailable: {0}")]
    ToolingUnavailable(String),
    #[error("no audio source located on the challenge surface")]
    NoAudioSource,
    #[error("audio download failed: {0}")]
    Download(String),
    #[error("waveform conversion failed: {0}")]
    Conversion(String),
    #[error("audio was not understood by the transcriber")]
    NoTranscription,
    #[error("challenge rejected the transcribed answer")]
    SubmissionRejected,
    #[error("challenge expired while awaiting verification")]
    Expired,
    #[error("audio challenge timed out")]
    Timeout,
    #[error("page session error: {0}")]
    Session(#[from] SessionError),
}

impl AudioResolveError {
    pub fn kind(&self) -> SolveErrorKind {
        match self {
            AudioResolveError::ToolingUnavailable(_) => SolveErrorKind::ToolingUnavailable,
            AudioResolveError::NoTranscription | AudioResolveError::Conversion(_) => {
                SolveErrorKind::NoTranscription
            }
            AudioResolveError::SubmissionRejected => SolveErrorKind::SubmissionRejected,
            AudioResolveError::Timeout => SolveErrorKind::Timeout,
            AudioResolveError::Session(err) => err.clone().into(),
            AudioResolveError::NoAudioSource
            | AudioResolveError::Download(_)
            | AudioResolveError::Expired => SolveErrorKind::Unknown,
        }
    }
}

/// Workspace owning every transient audio artifact of one resolve call.
///
/// Dropping it removes the directory and everything inside, so no exit path
/// can leak artifacts.
struct AudioWorkspace {
    dir: TempDir,
}

impl AudioWorkspace {
    fn create() -> Result<Self, AudioResolveError> {
        let dir = TempDir::with_prefix("formrunner-audio-")
            .map_err(|err| AudioResolveError::Download(format!("workspace: {err}")))?;
        Ok(Self { dir })
    }

    fn raw_path(&self, extension: &str) -> PathBuf {
        self.dir.path().join(format!("challenge.{extension}"))
    }

    fn wav_path(&self) -> PathBuf {
        self.dir.path().join("challenge.wav")
    }
}

/// Resolves an open audio challenge surface into a token.
pub struct AudioChallengeResolver {
    transcriber: Arc<dyn AudioTranscriber>,
    fetcher: Arc<dyn AudioFetcher>,
    token_poll: PollBudget,
    locate_attempts: u32,
    clickers: Vec<Box<dyn AttemptClick>>,
}

impl AudioChallengeResolver {
    pub fn new(transcriber: Arc<dyn AudioTranscriber>) -> Self {
        Self {
            transcriber,
            fetcher: Arc::new(HttpAudioFetcher::new()),
            token_poll: PollBudget::audio_verification(),
            locate_attempts: 4,
            clickers: click::default_ladder(),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn AudioFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_token_poll(mut self, budget: PollBudget) -> Self {
        self.token_poll = budget;
        self
    }

    /// Drive the audio pipeline to a token.
    ///
    /// An expiry observed while polling surfaces as [`AudioResolveError::Expired`]
    /// so the parent state machine can re-arm the checkbox and decide whether
    /// the retry budget allows another pass.
    pub async fn resolve(
        &self,
        page: &dyn PageSession,
        detector: &ChallengeDetector,
        cancel: &CancelFlag,
    ) -> Result<String, AudioResolveError> {
        if !self.transcriber.is_available().await {
            return Err(AudioResolveError::ToolingUnavailable(
                self.transcriber.name().to_string(),
            ));
        }
        if !transcribe::ffmpeg_available().await {
            return Err(AudioResolveError::ToolingUnavailable("ffmpeg".to_string()));
        }

        let audio_url = self.locate_audio_url(page).await?;
        log::debug!("audio challenge source located");

        let workspace = AudioWorkspace::create()?;
        let raw_path = workspace.raw_path(extension_for(&audio_url));
        let bytes = self.fetcher.fetch(&audio_url).await?;
        tokio::fs::write(&raw_path, &bytes)
            .await
            .map_err(|err| AudioResolveError::Download(err.to_string()))?;

        let wav_path = workspace.wav_path();
        convert(&raw_path, &wav_path).await?;

        let answer = match self.transcriber.transcribe(&wav_path).await {
            Ok(answer) => answer,
            Err(TranscribeError::Unavailable(what)) => {
                return Err(AudioResolveError::ToolingUnavailable(what))
            }
            Err(TranscribeError::Timeout(_)) => return Err(AudioResolveError::Timeout),
            Err(TranscribeError::Empty) | Err(TranscribeError::Execution(_)) => {
                return Err(AudioResolveError::NoTranscription)
            }
        };
        if answer.is_empty() {
            return Err(AudioResolveError::NoTranscription);
        }
        log::debug!("audio transcription obtained ({} chars)", answer.len());

        self.submit_answer(page, &answer).await?;
        self.poll_token(page, detector, cancel).await
    }

    /// Locate the audio resource through the selector fallbacks, retrying
    /// while the surface finishes rendering.
    async fn locate_audio_url(
        &self,
        page: &dyn PageSession,
    ) -> Result<String, AudioResolveError> {
        for attempt in 0..self.locate_attempts {
            for (selector, attribute) in AUDIO_SOURCE_SELECTORS {
                let script = scripts::read_attribute(selector, attribute);
                if let Ok(Value::String(raw)) = page.eval(&script).await {
                    let raw = raw.trim();
                    if raw.is_empty() {
                        continue;
                    }
                    if raw.starts_with("http://") || raw.starts_with("https://") {
                        return Ok(raw.to_string());
                    }
                    // Relative source, resolve against the page.
                    if let Ok(base) = page.current_url().await {
                        if let Ok(joined) = base.join(raw) {
                            return Ok(joined.to_string());
                        }
                    }
                }
            }
            if attempt + 1 < self.locate_attempts {
                sleep(Duration::from_millis(500)).await;
            }
        }
        Err(AudioResolveError::NoAudioSource)
    }

    /// Write the transcription into the answer field and trigger the verify
    /// action. The write is read back and retried with the scripted setter
    /// when the plain keystroke path does not persist.
    async fn submit_answer(
        &self,
        page: &dyn PageSession,
        answer: &str,
    ) -> Result<(), AudioResolveError> {
        let mut written = false;
        for selector in AUDIO_ANSWER_SELECTORS {
            if page.type_text(selector, answer).await.is_ok()
                && read_back_matches(page, selector, answer).await
            {
                written = true;
                break;
            }
            let set = scripts::set_value(selector, answer);
            if let Ok(Value::String(persisted)) = page.eval(&set).await {
                if persisted == answer {
                    written = true;
                    break;
                }
            }
        }
        if !written {
            return Err(AudioResolveError::SubmissionRejected);
        }

        for selector in AUDIO_VERIFY_SELECTORS {
            if click::click_with_fallbacks(page, selector, &self.clickers, None)
                .await
                .is_some()
            {
                return Ok(());
            }
        }
        Err(AudioResolveError::SubmissionRejected)
    }

    /// Poll the page's own response field for a token, watching for answer
    /// rejection and checkbox expiry along the way.
    async fn poll_token(
        &self,
        page: &dyn PageSession,
        detector: &ChallengeDetector,
        cancel: &CancelFlag,
    ) -> Result<String, AudioResolveError> {
        for _ in 0..self.token_poll.attempts {
            if cancel.is_cancelled() {
                return Err(AudioResolveError::Timeout);
            }
            if let Some(token) = probe::read_page_token(page).await {
                return Ok(token);
            }
            if probe::any_visible(page, &[AUDIO_REJECTED_SELECTOR]).await {
                return Err(AudioResolveError::SubmissionRejected);
            }
            if detector.is_expired(page, true).await {
                return Err(AudioResolveError::Expired);
            }
            sleep(self.token_poll.jittered_interval()).await;
        }
        Err(AudioResolveError::Timeout)
    }
}

impl SolverStrategy for AudioChallengeResolver {
    fn name(&self) -> &'static str {
        "audio"
    }
}

async fn read_back_matches(page: &dyn PageSession, selector: &str, expected: &str) -> bool {
    matches!(
        page.eval(&scripts::read_value(selector)).await,
        Ok(Value::String(value)) if value == expected
    )
}

async fn convert(raw: &Path, wav: &Path) -> Result<(), AudioResolveError> {
    transcribe::convert_to_wav(raw, wav)
        .await
        .map_err(|err| AudioResolveError::Conversion(err.to_string()))
}

fn extension_for(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    if path.ends_with(".wav") {
        "wav"
    } else if path.ends_with(".ogg") {
        "ogg"
    } else {
        "mp3"
    }
}
