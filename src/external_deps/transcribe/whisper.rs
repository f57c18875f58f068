//! Local Whisper CLI adapter.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use super::{
    command_succeeds, normalize_transcript, AudioTranscriber, TranscribeError, TranscribeResult,
    TranscriberConfig,
};

/// Transcribes challenge audio with a locally installed `whisper` CLI.
pub struct WhisperCliTranscriber {
    program: String,
    model: String,
    config: TranscriberConfig,
}

impl WhisperCliTranscriber {
    pub fn new() -> Self {
        Self {
            program: "whisper".to_string(),
            model: "base".to_string(),
            config: TranscriberConfig::default(),
        }
    }

    /// Use a different executable name (e.g. a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_config(mut self, config: TranscriberConfig) -> Self {
        self.config = config;
        self
    }
}

impl Default for WhisperCliTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioTranscriber for WhisperCliTranscriber {
    fn name(&self) -> &'static str {
        "whisper-cli"
    }

    async fn is_available(&self) -> bool {
        command_succeeds(&self.program, &["--help"]).await
    }

    async fn transcribe(&self, wav: &Path) -> TranscribeResult {
        let out_dir = wav
            .parent()
            .ok_or_else(|| TranscribeError::Execution("wav path has no parent".to_string()))?;

        let mut command = Command::new(&self.program);
        command
            .arg(wav)
            .args(["--model", self.model.as_str()])
            .args(["--output_format", "txt"])
            .arg("--output_dir")
            .arg(out_dir)
            .args(["--fp16", "False"])
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(language) = &self.config.language {
            command.args(["--language", language.as_str()]);
        }

        let status = timeout(self.config.timeout, command.status())
            .await
            .map_err(|_| TranscribeError::Timeout(self.config.timeout))?
            .map_err(|err| TranscribeError::Execution(format!("whisper spawn failed: {err}")))?;

        if !status.success() {
            return Err(TranscribeError::Execution(format!(
                "whisper exited with {status}"
            )));
        }

        let transcript_path = wav.with_extension("txt");
        let raw = tokio::fs::read_to_string(&transcript_path)
            .await
            .map_err(|err| {
                TranscribeError::Execution(format!(
                    "transcript not readable at {}: {err}",
                    transcript_path.display()
                ))
            })?;

        let normalized = normalize_transcript(&raw);
        if normalized.is_empty() {
            return Err(TranscribeError::Empty);
        }
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_when_binary_missing() {
        let transcriber = WhisperCliTranscriber::new().with_program("formrunner-missing-whisper");
        assert!(!transcriber.is_available().await);
    }
}
