//! Browser session boundary.
//!
//! The engine never owns a browser. It consumes a [`PageSession`] handle to a
//! single loaded page, exposing only the minimal capability surface: DOM
//! query, script evaluation, click/type/navigate primitives, and a passive
//! subscription of network request/response observations. Any automation
//! driver that can provide these can host the engine.

pub mod chromium;
pub mod scripts;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by a page session implementation.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("no live page attached")]
    Detached,
    #[error("script evaluation failed: {0}")]
    Eval(String),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("driver transport error: {0}")]
    Transport(String),
}

/// Post-navigation settle condition requested by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl WaitUntil {
    /// Parse the template's `waitUntil` string; unknown values fall back to
    /// `Load`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "domcontentloaded" => WaitUntil::DomContentLoaded,
            "networkidle" | "networkidle0" | "networkidle2" => WaitUntil::NetworkIdle,
            _ => WaitUntil::Load,
        }
    }
}

/// Outbound request observed while the page is loaded.
#[derive(Debug, Clone)]
pub struct RequestObservation {
    pub url: String,
    pub method: String,
    pub resource_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Response observed for traffic originating from the page.
#[derive(Debug, Clone)]
pub struct ResponseObservation {
    pub url: String,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
}

/// Direction-tagged network observation emitted by the driver.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    Request(RequestObservation),
    Response(ResponseObservation),
}

impl NetworkEvent {
    pub fn request(url: impl Into<String>, method: impl Into<String>) -> Self {
        NetworkEvent::Request(RequestObservation {
            url: url.into(),
            method: method.into(),
            resource_type: None,
            timestamp: Utc::now(),
        })
    }

    pub fn response(url: impl Into<String>, status: u16) -> Self {
        NetworkEvent::Response(ResponseObservation {
            url: url.into(),
            status,
            timestamp: Utc::now(),
        })
    }
}

/// Handle to one loaded page.
///
/// Implementations must keep all methods cancel-safe: the engine freely wraps
/// calls in timeouts and abandons them between polling iterations.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// URL the page currently displays.
    async fn current_url(&self) -> SessionResult<Url>;

    /// Navigate to a URL and wait for the requested settle condition.
    async fn navigate(&self, url: &str, wait_until: WaitUntil) -> SessionResult<()>;

    /// Full HTML snapshot of the current document.
    async fn content(&self) -> SessionResult<String>;

    /// Evaluate a script in the page, returning its JSON-serializable result.
    async fn eval(&self, script: &str) -> SessionResult<Value>;

    /// Dispatch a trusted click on the first element matching `selector`.
    async fn click(&self, selector: &str) -> SessionResult<()>;

    /// Focus the first element matching `selector` and type `text` into it.
    async fn type_text(&self, selector: &str, text: &str) -> SessionResult<()>;

    /// Subscribe to network request/response observations.
    fn network_events(&self) -> broadcast::Receiver<NetworkEvent>;
}
