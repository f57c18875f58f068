//! Declarative submission templates.
//!
//! A template is a camelCase JSON document describing how to fill and submit
//! one form. Every key is optional except `submitSelector`; omitting the
//! field mappings engages auto-discovery instead.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::forms::FormScoreWeights;

/// One explicit selector-to-value mapping.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FieldMapping {
    pub selector: String,
    pub value: String,
}

/// Declarative description of one form submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionTemplate {
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    pub submit_selector: String,
    #[serde(default)]
    pub wait_until: Option<String>,
    #[serde(default = "default_post_submit_wait_ms")]
    pub post_submit_wait_ms: u64,
    #[serde(default = "default_captcha_timeout_ms")]
    pub captcha_timeout_ms: u64,
    #[serde(default)]
    pub success_indicators: Vec<String>,
    /// Tunable contact-form scoring, see [`FormScoreWeights`].
    #[serde(default)]
    pub score_weights: Option<FormScoreWeights>,
}

fn default_post_submit_wait_ms() -> u64 {
    8_000
}

fn default_captcha_timeout_ms() -> u64 {
    120_000
}

/// Errors raised while loading a template.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("template not readable: {0}")]
    Io(#[from] std::io::Error),
    #[error("template is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("submitSelector must not be empty")]
    MissingSubmitSelector,
}

impl SubmissionTemplate {
    /// Template with auto-discovery and a generic submit control.
    pub fn auto() -> Self {
        Self {
            fields: Vec::new(),
            submit_selector: "button[type='submit'], input[type='submit'], form button"
                .to_string(),
            wait_until: None,
            post_submit_wait_ms: default_post_submit_wait_ms(),
            captcha_timeout_ms: default_captcha_timeout_ms(),
            success_indicators: Vec::new(),
            score_weights: None,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let template: Self = serde_json::from_str(raw)?;
        template.validate()?;
        Ok(template)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.submit_selector.trim().is_empty() {
            return Err(ConfigError::MissingSubmitSelector);
        }
        Ok(())
    }

    /// Whether explicit field mappings are provided.
    pub fn has_explicit_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn post_submit_wait(&self) -> Duration {
        Duration::from_millis(self.post_submit_wait_ms)
    }

    pub fn captcha_timeout(&self) -> Duration {
        Duration::from_millis(self.captcha_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_template() {
        let raw = r##"{
            "fields": [
                { "selector": "#name", "value": "Ada Lovelace" },
                { "selector": "#email", "value": "ada@example.com" }
            ],
            "submitSelector": "#send",
            "waitUntil": "networkidle",
            "postSubmitWaitMs": 5000,
            "captchaTimeoutMs": 60000,
            "successIndicators": ["thank you"]
        }"##;
        let template = SubmissionTemplate::from_json(raw).expect("valid template");
        assert_eq!(template.fields.len(), 2);
        assert_eq!(template.submit_selector, "#send");
        assert_eq!(template.post_submit_wait(), Duration::from_secs(5));
        assert_eq!(template.captcha_timeout(), Duration::from_secs(60));
        assert_eq!(template.success_indicators, vec!["thank you".to_string()]);
    }

    #[test]
    fn only_submit_selector_is_required() {
        let template =
            SubmissionTemplate::from_json(r##"{ "submitSelector": "#go" }"##).expect("minimal");
        assert!(!template.has_explicit_fields());
        assert_eq!(template.post_submit_wait_ms, 8_000);
        assert_eq!(template.captcha_timeout_ms, 120_000);
        assert!(template.wait_until.is_none());
    }

    #[test]
    fn missing_submit_selector_is_rejected() {
        assert!(SubmissionTemplate::from_json("{}").is_err());
        let err = SubmissionTemplate::from_json(r#"{ "submitSelector": "  " }"#)
            .expect_err("blank selector");
        assert!(matches!(err, ConfigError::MissingSubmitSelector));
    }

    #[test]
    fn score_weights_are_tunable_from_the_template() {
        let raw = r##"{
            "submitSelector": "#send",
            "scoreWeights": { "message": 9.5, "perField": 0.0 }
        }"##;
        let template = SubmissionTemplate::from_json(raw).expect("weights");
        let weights = template.score_weights.expect("present");
        assert_eq!(weights.message, 9.5);
        assert_eq!(weights.per_field, 0.0);
        // Unspecified weights keep their defaults.
        assert_eq!(weights.email, FormScoreWeights::default().email);
    }
}
