//! Scripted in-memory page used by unit tests across the crate.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use url::Url;

use super::{NetworkEvent, PageSession, SessionError, SessionResult, WaitUntil};

type EvalFn = Box<dyn FnMut(&str) -> SessionResult<Value> + Send>;
type ClickHook = Box<dyn FnMut(&str) + Send>;

/// Configurable fake page. Evaluation is routed through a caller-supplied
/// closure keyed on script content; clicks and typed text are recorded.
pub(crate) struct MockPage {
    url: Url,
    html: Mutex<String>,
    eval_fn: Mutex<Option<EvalFn>>,
    click_hook: Mutex<Option<ClickHook>>,
    clicks: Mutex<Vec<String>>,
    typed: Mutex<Vec<(String, String)>>,
    failing_clicks: Mutex<VecDeque<String>>,
    events: broadcast::Sender<NetworkEvent>,
}

impl MockPage {
    pub fn new(url: &str) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            url: Url::parse(url).expect("valid mock url"),
            html: Mutex::new(String::new()),
            eval_fn: Mutex::new(None),
            click_hook: Mutex::new(None),
            clicks: Mutex::new(Vec::new()),
            typed: Mutex::new(Vec::new()),
            failing_clicks: Mutex::new(VecDeque::new()),
            events,
        }
    }

    pub fn set_html(&self, html: &str) {
        *self.html.lock().unwrap() = html.to_string();
    }

    pub fn set_eval<F>(&self, f: F)
    where
        F: FnMut(&str) -> SessionResult<Value> + Send + 'static,
    {
        *self.eval_fn.lock().unwrap() = Some(Box::new(f));
    }

    pub fn on_click<F>(&self, f: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        *self.click_hook.lock().unwrap() = Some(Box::new(f));
    }

    /// Queue a selector whose next native click fails.
    pub fn fail_next_click(&self, selector: &str) {
        self.failing_clicks
            .lock()
            .unwrap()
            .push_back(selector.to_string());
    }

    pub fn emit(&self, event: NetworkEvent) {
        let _ = self.events.send(event);
    }

    /// Sender handle for hooks that emit events while the page is borrowed.
    pub fn event_sender(&self) -> broadcast::Sender<NetworkEvent> {
        self.events.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.clicks.lock().unwrap().clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.typed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSession for MockPage {
    async fn current_url(&self) -> SessionResult<Url> {
        Ok(self.url.clone())
    }

    async fn navigate(&self, _url: &str, _wait_until: WaitUntil) -> SessionResult<()> {
        Ok(())
    }

    async fn content(&self) -> SessionResult<String> {
        Ok(self.html.lock().unwrap().clone())
    }

    async fn eval(&self, script: &str) -> SessionResult<Value> {
        let mut guard = self.eval_fn.lock().unwrap();
        match guard.as_mut() {
            Some(f) => f(script),
            None => Ok(Value::Null),
        }
    }

    async fn click(&self, selector: &str) -> SessionResult<()> {
        {
            let mut failing = self.failing_clicks.lock().unwrap();
            if let Some(pos) = failing.iter().position(|s| s == selector) {
                failing.remove(pos);
                return Err(SessionError::ElementNotFound(selector.to_string()));
            }
        }
        self.clicks.lock().unwrap().push(selector.to_string());
        let mut hook = self.click_hook.lock().unwrap();
        if let Some(f) = hook.as_mut() {
            f(selector);
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> SessionResult<()> {
        self.typed
            .lock()
            .unwrap()
            .push((selector.to_string(), text.to_string()));
        Ok(())
    }

    fn network_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }
}
