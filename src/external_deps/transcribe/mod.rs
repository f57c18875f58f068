//! Audio transcription adapters.
//!
//! These adapters provide a unified interface over speech-to-text tooling so
//! the audio challenge resolver can remain agnostic of vendor-specific
//! details. The module also owns the waveform conversion step and the
//! proactive availability probes the resolver runs before touching any audio.

mod whisper;

pub use whisper::WhisperCliTranscriber;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Behaviour knobs shared by transcriber adapters.
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    pub timeout: Duration,
    pub language: Option<String>,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            language: Some("en".to_string()),
        }
    }
}

/// Common result type returned by transcriber adapters.
pub type TranscribeResult = Result<String, TranscribeError>;

/// Shared interface implemented by speech-to-text vendors.
#[async_trait]
pub trait AudioTranscriber: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap availability probe, run before any audio is downloaded.
    async fn is_available(&self) -> bool;

    /// Transcribe a decodable waveform to plain text.
    async fn transcribe(&self, wav: &Path) -> TranscribeResult;
}

/// Errors surfaced by transcriber adapters and the conversion step.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("transcriber unavailable: {0}")]
    Unavailable(String),
    #[error("transcriber execution failed: {0}")]
    Execution(String),
    #[error("transcriber produced no usable text")]
    Empty,
    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),
}

/// Whether ffmpeg is on the path and answers a version query.
pub async fn ffmpeg_available() -> bool {
    command_succeeds("ffmpeg", &["-version"]).await
}

/// Convert raw challenge audio into a 16 kHz mono WAV the transcribers can
/// decode.
pub async fn convert_to_wav(input: &Path, output: &Path) -> Result<(), TranscribeError> {
    let status = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-ar", "16000", "-ac", "1"])
        .arg(output)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|err| TranscribeError::Execution(format!("ffmpeg spawn failed: {err}")))?;

    if !status.success() {
        return Err(TranscribeError::Execution(format!(
            "ffmpeg exited with {status}"
        )));
    }
    if !output.exists() {
        return Err(TranscribeError::Execution(
            "ffmpeg reported success but produced no output".to_string(),
        ));
    }
    Ok(())
}

pub(crate) async fn command_succeeds(program: &str, args: &[&str]) -> bool {
    let probe = Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    matches!(timeout(Duration::from_secs(10), probe).await, Ok(Ok(status)) if status.success())
}

/// Normalise a raw transcript into challenge-answer form: uppercased with all
/// whitespace stripped.
pub fn normalize_transcript(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_uppercases_and_strips_whitespace() {
        assert_eq!(normalize_transcript("seven two\nfour "), "SEVENTWOFOUR");
        assert_eq!(normalize_transcript("  "), "");
    }

    #[tokio::test]
    async fn missing_binary_probe_is_false() {
        assert!(!command_succeeds("formrunner-no-such-binary", &["--help"]).await);
    }
}
