//! Chrome DevTools adapter.
//!
//! Implements [`PageSession`] on top of a chromiumoxide page, forwarding the
//! CDP network events into the broadcast channel the verifier subscribes to.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived,
};
use chromiumoxide::Page;
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use url::Url;

use super::{
    NetworkEvent, PageSession, RequestObservation, ResponseObservation, SessionError,
    SessionResult, WaitUntil,
};

/// One loaded page driven over the Chrome DevTools protocol.
pub struct ChromiumSession {
    page: Page,
    events: broadcast::Sender<NetworkEvent>,
    listeners: Vec<JoinHandle<()>>,
}

impl ChromiumSession {
    /// Attach to a page and start forwarding its network events.
    pub async fn attach(page: Page) -> SessionResult<Self> {
        let (events, _) = broadcast::channel(256);

        let mut requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))?;
        let request_tx = events.clone();
        let request_task = tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                let _ = request_tx.send(NetworkEvent::Request(RequestObservation {
                    url: event.request.url.clone(),
                    method: event.request.method.clone(),
                    resource_type: event.r#type.as_ref().map(|kind| format!("{kind:?}")),
                    timestamp: Utc::now(),
                }));
            }
        });

        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))?;
        let response_tx = events.clone();
        let response_task = tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let _ = response_tx.send(NetworkEvent::Response(ResponseObservation {
                    url: event.response.url.clone(),
                    status: u16::try_from(event.response.status).unwrap_or(0),
                    timestamp: Utc::now(),
                }));
            }
        });

        Ok(Self {
            page,
            events,
            listeners: vec![request_task, response_task],
        })
    }

    /// The underlying driver page, for caller-side operations outside the
    /// engine's capability surface.
    pub fn page(&self) -> &Page {
        &self.page
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn current_url(&self) -> SessionResult<Url> {
        let raw = self
            .page
            .url()
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))?
            .ok_or(SessionError::Detached)?;
        Url::parse(&raw).map_err(|err| SessionError::Transport(err.to_string()))
    }

    async fn navigate(&self, url: &str, wait_until: WaitUntil) -> SessionResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|err| SessionError::Navigation(err.to_string()))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|err| SessionError::Navigation(err.to_string()))?;
        if wait_until == WaitUntil::NetworkIdle {
            // CDP exposes no stable idle signal here; a short settle pause is
            // the accepted approximation.
            sleep(Duration::from_millis(750)).await;
        }
        Ok(())
    }

    async fn content(&self) -> SessionResult<String> {
        self.page
            .content()
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))
    }

    async fn eval(&self, script: &str) -> SessionResult<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|err| SessionError::Eval(err.to_string()))?;
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    async fn click(&self, selector: &str) -> SessionResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| SessionError::ElementNotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> SessionResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| SessionError::ElementNotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))?;
        element
            .type_str(text)
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))?;
        Ok(())
    }

    fn network_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }
}
