//! Interchangeable click strategies.
//!
//! Widgets differ in which interaction they honour: some need a trusted
//! driver click, some only react to a programmatic `.click()`, some to a full
//! synthesized mouse sequence, and anchors living in a same-origin iframe
//! need a frame-scoped click. The ladder tries each strategy in order and
//! exits early on verified success.

use async_trait::async_trait;
use serde_json::Value;

use crate::session::{scripts, PageSession, SessionResult};

/// One click technique. `Ok(false)` means the target element was not reachable
/// with this technique; errors are treated the same way by the ladder.
#[async_trait]
pub trait AttemptClick: Send + Sync {
    fn name(&self) -> &'static str;
    async fn attempt(&self, page: &dyn PageSession, selector: &str) -> SessionResult<bool>;
}

/// Trusted click through the driver.
pub struct NativeClick;

#[async_trait]
impl AttemptClick for NativeClick {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn attempt(&self, page: &dyn PageSession, selector: &str) -> SessionResult<bool> {
        page.click(selector).await.map(|_| true)
    }
}

/// Programmatic `.click()` evaluated in the page.
pub struct ScriptedClick;

#[async_trait]
impl AttemptClick for ScriptedClick {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn attempt(&self, page: &dyn PageSession, selector: &str) -> SessionResult<bool> {
        let result = page.eval(&scripts::click(selector)).await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

/// Full synthesized mouse event sequence.
pub struct SynthesizedEventsClick;

#[async_trait]
impl AttemptClick for SynthesizedEventsClick {
    fn name(&self) -> &'static str {
        "synthesized_events"
    }

    async fn attempt(&self, page: &dyn PageSession, selector: &str) -> SessionResult<bool> {
        let result = page.eval(&scripts::dispatch_mouse_events(selector)).await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

/// Click inside a same-origin iframe's document.
pub struct FrameScopedClick {
    frame_selector: String,
}

impl FrameScopedClick {
    pub fn new(frame_selector: impl Into<String>) -> Self {
        Self {
            frame_selector: frame_selector.into(),
        }
    }
}

#[async_trait]
impl AttemptClick for FrameScopedClick {
    fn name(&self) -> &'static str {
        "frame_scoped"
    }

    async fn attempt(&self, page: &dyn PageSession, selector: &str) -> SessionResult<bool> {
        let script = scripts::frame_click(&self.frame_selector, selector);
        let result = page.eval(&script).await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

/// Default ladder for in-document targets.
pub fn default_ladder() -> Vec<Box<dyn AttemptClick>> {
    vec![
        Box::new(NativeClick),
        Box::new(ScriptedClick),
        Box::new(SynthesizedEventsClick),
    ]
}

/// Ladder for challenge widgets, ending with a frame-scoped click on the
/// anchor iframe.
pub fn widget_ladder(anchor_frame_selector: &str) -> Vec<Box<dyn AttemptClick>> {
    let mut ladder = default_ladder();
    ladder.push(Box::new(FrameScopedClick::new(anchor_frame_selector)));
    ladder
}

/// Try each strategy in order; return the name of the first that lands.
///
/// With a `verify_script`, a strategy only counts once the script evaluates
/// truthy afterwards — a dispatched click whose effect cannot be observed is
/// treated as a miss and the ladder continues.
pub async fn click_with_fallbacks(
    page: &dyn PageSession,
    selector: &str,
    strategies: &[Box<dyn AttemptClick>],
    verify_script: Option<&str>,
) -> Option<&'static str> {
    for strategy in strategies {
        match strategy.attempt(page, selector).await {
            Ok(true) => {
                let verified = match verify_script {
                    None => true,
                    Some(script) => matches!(page.eval(script).await, Ok(Value::Bool(true))),
                };
                if verified {
                    log::debug!("click on {selector} landed via {}", strategy.name());
                    return Some(strategy.name());
                }
                log::trace!(
                    "click via {} dispatched but unverified, continuing",
                    strategy.name()
                );
            }
            Ok(false) => {
                log::trace!("click via {} found no target", strategy.name());
            }
            Err(err) => {
                log::trace!("click via {} failed: {err}", strategy.name());
            }
        }
    }
    None
}
