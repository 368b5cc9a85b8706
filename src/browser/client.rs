//! Chrome CDP session provider.
//!
//! Every session runs in its own browser process and a fresh browser context
//! (incognito-like: no shared cookies, localStorage or cache).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCacheParams, ClearBrowserCookiesParams, SetCacheDisabledParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;

use super::{BrowserSession, Query, SessionProvider};

const CLEAR_FIELD_JS: &str = r#"function() {
    this.focus();
    if ('value' in this) { this.value = ''; }
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
}"#;

const IS_DISPLAYED_JS: &str = r#"function() {
    const style = window.getComputedStyle(this);
    const rect = this.getBoundingClientRect();
    return style.display !== 'none'
        && style.visibility !== 'hidden'
        && rect.width > 0
        && rect.height > 0;
}"#;

/// Launch Chrome with the flags used for test sessions and recording.
pub async fn launch_browser(headless: bool) -> Result<Browser> {
    let chrome_path = find_chrome_executable()?;

    let mut builder = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .window_size(1920, 1080)
        .viewport(None)
        .no_sandbox()
        .arg("--incognito")
        .arg("--disable-extensions")
        .arg("--disable-cache")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-breakpad")
        .arg("--disable-default-apps")
        .arg("--disable-popup-blocking")
        .arg("--disable-renderer-backgrounding")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--mute-audio")
        .arg("--no-first-run")
        .arg("--password-store=basic");

    if headless {
        builder = builder.arg("--headless=new");
    } else {
        builder = builder.with_head();
    }

    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .context("Failed to launch browser")?;

    // Drain CDP events for the lifetime of the browser
    tokio::spawn(async move { while handler.next().await.is_some() {} });

    Ok(browser)
}

/// Opens one Chrome process per session.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromeProvider;

#[async_trait]
impl SessionProvider for ChromeProvider {
    type Session = ChromeSession;

    async fn open(&self, headless: bool) -> Result<ChromeSession> {
        let mut browser = launch_browser(headless).await?;

        match ChromeSession::isolate(&browser).await {
            Ok((context_id, page)) => Ok(ChromeSession {
                browser,
                context_id: Some(context_id),
                page,
            }),
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    tracing::warn!("Failed to close browser after setup error: {}", close_err);
                }
                Err(e)
            }
        }
    }
}

/// A Chrome page inside a dedicated browser context.
pub struct ChromeSession {
    browser: Browser,
    context_id: Option<BrowserContextId>,
    page: Page,
}

impl ChromeSession {
    async fn isolate(browser: &Browser) -> Result<(BrowserContextId, Page)> {
        let context_id = browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .context("Failed to create browser context")?;

        let page = browser
            .new_page(
                CreateTargetParams::builder()
                    .url("about:blank")
                    .browser_context_id(context_id.clone())
                    .build()
                    .map_err(|e| anyhow::anyhow!("Failed to build target params: {:?}", e))?,
            )
            .await
            .context("Failed to create page in context")?;

        page.execute(ClearBrowserCookiesParams::default())
            .await
            .context("Failed to clear cookies")?;
        page.execute(ClearBrowserCacheParams::default())
            .await
            .context("Failed to clear cache")?;
        page.execute(SetCacheDisabledParams::new(true))
            .await
            .context("Failed to disable cache")?;

        Ok((context_id, page))
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    type Element = Element;

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.page.goto(url).await.context("Navigation failed")?;
        self.page.wait_for_navigation().await.ok();
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        self.page.reload().await.context("Reload failed")?;
        Ok(())
    }

    async fn find_elements(&self, query: &Query) -> Result<Vec<Element>> {
        let found = match query {
            Query::Css(selector) => self.page.find_elements(selector.as_str()).await,
            Query::XPath(expression) => self.page.find_xpaths(expression.as_str()).await,
        };

        match found {
            Ok(elements) => Ok(elements),
            Err(e) if is_no_match(&e) => {
                tracing::debug!("Lookup {:?} returned no elements: {}", query, e);
                Ok(Vec::new())
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("Lookup {:?} failed", query))),
        }
    }

    async fn click(&self, element: &Element) -> Result<()> {
        element.click().await.context("Click failed")?;
        Ok(())
    }

    async fn clear(&self, element: &Element) -> Result<()> {
        element
            .call_js_fn(CLEAR_FIELD_JS, false)
            .await
            .context("Failed to clear field")?;
        Ok(())
    }

    async fn type_text(&self, element: &Element, text: &str) -> Result<()> {
        element.click().await.context("Failed to focus field")?;
        element.type_str(text).await.context("Typing failed")?;
        Ok(())
    }

    async fn text(&self, element: &Element) -> Result<String> {
        Ok(element
            .inner_text()
            .await
            .context("Failed to read element text")?
            .unwrap_or_default())
    }

    async fn is_displayed(&self, element: &Element) -> Result<bool> {
        let returns = element
            .call_js_fn(IS_DISPLAYED_JS, false)
            .await
            .context("Failed to check visibility")?;
        Ok(returns
            .result
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn page_content(&self) -> Result<String> {
        self.page.content().await.context("Failed to read page content")
    }

    async fn execute_script(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("Script evaluation failed")?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .context("Screenshot failed")
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(context_id) = self.context_id.take() {
            if let Err(e) = self.browser.dispose_browser_context(context_id).await {
                tracing::warn!("Failed to dispose browser context: {}", e);
            }
        }
        self.browser.close().await.context("Failed to close browser")?;
        self.browser.wait().await.ok();
        Ok(())
    }
}

/// Whether a lookup error only means "nothing matched".
///
/// Chrome answers an empty or unresolvable query with a protocol error
/// response. Any other failure means the session is gone.
fn is_no_match(err: &CdpError) -> bool {
    matches!(err, CdpError::NotFound | CdpError::Chrome(_))
}

/// Find Chrome executable on the system.
fn find_chrome_executable() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("CHROME_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            tracing::info!("Using CHROME_PATH at: {:?}", p);
            return Ok(p);
        }
        tracing::warn!("CHROME_PATH {:?} does not exist, searching defaults", p);
    }

    let (subdir_name, alt_subdir) = if cfg!(target_os = "macos") {
        if cfg!(target_arch = "aarch64") {
            (
                "chrome-headless-shell-mac-arm64",
                "chrome-headless-shell-mac-x64",
            )
        } else {
            (
                "chrome-headless-shell-mac-x64",
                "chrome-headless-shell-mac-arm64",
            )
        }
    } else {
        ("chrome-headless-shell-linux", "chrome-headless-shell-linux")
    };

    if let Some(home) = dirs::home_dir() {
        for cache in ["Library/Caches/ms-playwright", ".cache/ms-playwright"] {
            let playwright_cache = home.join(cache);
            let Ok(entries) = std::fs::read_dir(&playwright_cache) else {
                continue;
            };

            let mut headless_dirs: Vec<_> = entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.file_name()
                        .to_string_lossy()
                        .starts_with("chromium_headless_shell")
                })
                .collect();

            headless_dirs.sort_by_key(|b| std::cmp::Reverse(b.file_name()));

            for dir in headless_dirs {
                for subdir in [subdir_name, alt_subdir] {
                    let binary = dir.path().join(subdir).join("chrome-headless-shell");
                    if binary.exists() {
                        tracing::info!("Using chrome-headless-shell at: {:?}", binary);
                        return Ok(binary);
                    }
                }
            }
        }
    }

    let paths = [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    for path in &paths {
        let p = PathBuf::from(path);
        if p.exists() {
            tracing::info!("Found Chrome at: {}", path);
            return Ok(p);
        }
    }

    anyhow::bail!("Chrome/Chromium not found. Set CHROME_PATH or install Chrome.")
}
