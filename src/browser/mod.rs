//! Browser session abstraction and its Chrome DevTools implementation.

mod client;
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;

pub use client::{launch_browser, ChromeProvider, ChromeSession};

/// Native lookup a selector lowers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    Css(String),
    XPath(String),
}

impl Query {
    pub fn css(selector: impl Into<String>) -> Self {
        Query::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Query::XPath(expression.into())
    }
}

/// A live, isolated browser session driven by the step executor.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Handle to an element found in the current document.
    type Element: Send + Sync;

    async fn navigate(&mut self, url: &str) -> Result<()>;

    async fn refresh(&mut self) -> Result<()>;

    async fn find_elements(&self, query: &Query) -> Result<Vec<Self::Element>>;

    async fn click(&self, element: &Self::Element) -> Result<()>;

    async fn clear(&self, element: &Self::Element) -> Result<()>;

    async fn type_text(&self, element: &Self::Element, text: &str) -> Result<()>;

    /// Rendered text of an element.
    async fn text(&self, element: &Self::Element) -> Result<String>;

    async fn is_displayed(&self, element: &Self::Element) -> Result<bool>;

    async fn current_url(&self) -> Result<String>;

    /// Full serialized page source.
    async fn page_content(&self) -> Result<String>;

    async fn execute_script(&self, script: &str) -> Result<serde_json::Value>;

    /// PNG bytes of the current viewport/page.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens fresh browser sessions, one per iteration.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: BrowserSession;

    async fn open(&self, headless: bool) -> Result<Self::Session>;
}
