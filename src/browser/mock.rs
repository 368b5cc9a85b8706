//! In-memory browser for exercising the engine without Chrome.
//!
//! A [`MockPage`] is a fixture of elements, each answering to the exact
//! [`Query`] values it was registered with. Every opened session gets its own
//! copy of the fixture, so sessions never share state.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{BrowserSession, Query, SessionProvider};
use crate::notification::{dismiss_query, marker_query};

/// Side effect of clicking a mock element.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickEffect {
    /// Make the element with this key present.
    Reveal(String),
    /// Remove the element with this key.
    Remove(String),
    /// Change the current URL.
    Navigate(String),
    /// Append text to the page content.
    AppendContent(String),
    /// Kill the session; every later call fails.
    Crash,
    /// Hang for this long before the click completes.
    Stall(Duration),
}

/// One element of the fixture.
#[derive(Debug, Clone)]
pub struct MockElement {
    pub key: String,
    pub queries: Vec<Query>,
    pub text: String,
    pub displayed: bool,
    pub present: bool,
    pub on_click: Vec<ClickEffect>,
    pub click_fails: bool,
}

impl MockElement {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            queries: Vec::new(),
            text: String::new(),
            displayed: true,
            present: true,
            on_click: Vec::new(),
            click_fails: false,
        }
    }

    /// A toast body matched by the notification marker.
    pub fn notification(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(key).matching(marker_query()).with_text(text)
    }

    /// A toast close button; clicking it removes `toast_key`.
    pub fn dismiss_button(key: impl Into<String>, toast_key: impl Into<String>) -> Self {
        Self::new(key)
            .matching(dismiss_query())
            .on_click(ClickEffect::Remove(toast_key.into()))
    }

    pub fn matching(mut self, query: Query) -> Self {
        self.queries.push(query);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    pub fn absent(mut self) -> Self {
        self.present = false;
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.on_click.push(effect);
        self
    }

    pub fn failing_click(mut self) -> Self {
        self.click_fails = true;
        self
    }
}

/// Page fixture cloned into every session.
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    pub url: String,
    pub content: String,
    pub elements: Vec<MockElement>,
    /// Requested URL -> URL the browser ends up on.
    pub redirects: HashMap<String, String>,
    /// Navigating to any of these URLs kills the session.
    pub crash_urls: HashSet<String>,
}

impl MockPage {
    pub fn new() -> Self {
        Self {
            url: "about:blank".to_string(),
            ..Self::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn element(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn redirect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.redirects.insert(from.into(), to.into());
        self
    }

    pub fn crash_on(mut self, url: impl Into<String>) -> Self {
        self.crash_urls.insert(url.into());
        self
    }
}

#[derive(Debug)]
struct MockState {
    page: MockPage,
    crashed: bool,
    closed: bool,
    values: HashMap<String, String>,
}

/// Session over a private copy of a [`MockPage`].
#[derive(Debug, Clone)]
pub struct MockSession {
    state: Arc<Mutex<MockState>>,
    history: Arc<Mutex<Vec<String>>>,
}

impl MockSession {
    pub fn new(page: MockPage) -> Self {
        Self::with_history(page, Arc::new(Mutex::new(Vec::new())))
    }

    fn with_history(page: MockPage, history: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                page,
                crashed: false,
                closed: false,
                values: HashMap::new(),
            })),
            history,
        }
    }

    /// Calls made on this session, in order.
    pub async fn history(&self) -> Vec<String> {
        self.history.lock().await.clone()
    }

    /// Value typed into the element with `key`.
    pub async fn value_of(&self, key: &str) -> Option<String> {
        self.state.lock().await.values.get(key).cloned()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    async fn record(&self, call: String) {
        self.history.lock().await.push(call);
    }

    async fn alive(&self) -> Result<tokio::sync::MutexGuard<'_, MockState>> {
        let state = self.state.lock().await;
        if state.crashed {
            bail!("browser session disconnected");
        }
        if state.closed {
            bail!("browser session closed");
        }
        Ok(state)
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    type Element = usize;

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.record(format!("navigate:{}", url)).await;
        let mut state = self.alive().await?;
        if state.page.crash_urls.contains(url) {
            state.crashed = true;
            bail!("browser session disconnected while loading {}", url);
        }
        let landed = state
            .page
            .redirects
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());
        state.page.url = landed;
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        self.record("refresh".to_string()).await;
        self.alive().await?;
        Ok(())
    }

    async fn find_elements(&self, query: &Query) -> Result<Vec<usize>> {
        let state = self.alive().await?;
        Ok(state
            .page
            .elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.present && e.queries.contains(query))
            .map(|(i, _)| i)
            .collect())
    }

    async fn click(&self, element: &usize) -> Result<()> {
        let mut state = self.alive().await?;
        let Some(target) = state.page.elements.get(*element).cloned() else {
            bail!("stale element reference");
        };
        drop(state);
        self.record(format!("click:{}", target.key)).await;
        if target.click_fails {
            bail!("element {} is not clickable", target.key);
        }
        for effect in &target.on_click {
            if let ClickEffect::Stall(delay) = effect {
                tokio::time::sleep(*delay).await;
            }
        }

        state = self.alive().await?;
        for effect in target.on_click {
            match effect {
                ClickEffect::Reveal(key) => {
                    for e in state.page.elements.iter_mut().filter(|e| e.key == key) {
                        e.present = true;
                    }
                }
                ClickEffect::Remove(key) => {
                    for e in state.page.elements.iter_mut().filter(|e| e.key == key) {
                        e.present = false;
                    }
                }
                ClickEffect::Navigate(url) => state.page.url = url,
                ClickEffect::AppendContent(text) => state.page.content.push_str(&text),
                ClickEffect::Crash => state.crashed = true,
                ClickEffect::Stall(_) => {}
            }
        }
        Ok(())
    }

    async fn clear(&self, element: &usize) -> Result<()> {
        let mut state = self.alive().await?;
        let key = match state.page.elements.get(*element) {
            Some(e) => e.key.clone(),
            None => bail!("stale element reference"),
        };
        state.values.insert(key.clone(), String::new());
        drop(state);
        self.record(format!("clear:{}", key)).await;
        Ok(())
    }

    async fn type_text(&self, element: &usize, text: &str) -> Result<()> {
        let mut state = self.alive().await?;
        let key = match state.page.elements.get(*element) {
            Some(e) => e.key.clone(),
            None => bail!("stale element reference"),
        };
        state.values.entry(key.clone()).or_default().push_str(text);
        drop(state);
        self.record(format!("type:{}:{}", key, text)).await;
        Ok(())
    }

    async fn text(&self, element: &usize) -> Result<String> {
        let state = self.alive().await?;
        match state.page.elements.get(*element) {
            Some(e) => Ok(e.text.clone()),
            None => bail!("stale element reference"),
        }
    }

    async fn is_displayed(&self, element: &usize) -> Result<bool> {
        let state = self.alive().await?;
        Ok(state
            .page
            .elements
            .get(*element)
            .is_some_and(|e| e.present && e.displayed))
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.alive().await?.page.url.clone())
    }

    async fn page_content(&self) -> Result<String> {
        Ok(self.alive().await?.page.content.clone())
    }

    async fn execute_script(&self, script: &str) -> Result<serde_json::Value> {
        self.alive().await?;
        self.record(format!("script:{}", script)).await;
        Ok(serde_json::Value::Null)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.alive().await?;
        self.record("screenshot".to_string()).await;
        Ok(b"\x89PNG\r\n\x1a\nmock".to_vec())
    }

    async fn close(&mut self) -> Result<()> {
        self.record("close".to_string()).await;
        self.state.lock().await.closed = true;
        Ok(())
    }
}

/// Hands out fresh [`MockSession`]s over one fixture.
#[derive(Debug, Clone)]
pub struct MockProvider {
    page: MockPage,
    history: Arc<Mutex<Vec<String>>>,
    opened: Arc<AtomicUsize>,
    fail_open: HashSet<usize>,
}

impl MockProvider {
    pub fn new(page: MockPage) -> Self {
        Self {
            page,
            history: Arc::new(Mutex::new(Vec::new())),
            opened: Arc::new(AtomicUsize::new(0)),
            fail_open: HashSet::new(),
        }
    }

    /// Make the n-th (1-based) call to `open` fail.
    pub fn failing_open(mut self, nth: usize) -> Self {
        self.fail_open.insert(nth);
        self
    }

    /// Number of sessions opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Calls made across all sessions, in order.
    pub async fn history(&self) -> Vec<String> {
        self.history.lock().await.clone()
    }
}

#[async_trait]
impl SessionProvider for MockProvider {
    type Session = MockSession;

    async fn open(&self, headless: bool) -> Result<MockSession> {
        let nth = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.history
            .lock()
            .await
            .push(format!("open:headless={}", headless));
        if self.fail_open.contains(&nth) {
            bail!("failed to launch browser #{}", nth);
        }
        Ok(MockSession::with_history(
            self.page.clone(),
            Arc::clone(&self.history),
        ))
    }
}
