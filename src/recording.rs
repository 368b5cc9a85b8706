//! Live recording of user interactions and their translation into steps.

use anyhow::{Context, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use serde::Deserialize;
use serde_json::Value;

use crate::browser::launch_browser;
use crate::models::{Selector, Step};

/// Wait assigned to every recorded step.
pub const RECORDED_WAIT_SECONDS: f64 = 1.0;

/// Installed on every new document. Appends captured events to
/// `localStorage['__recordedSteps']` so they survive navigation.
pub const RECORDER_SCRIPT: &str = r#"
(function() {
    if (window.__webtestRecorder) return;
    window.__webtestRecorder = true;

    function load() {
        try { return JSON.parse(localStorage.getItem('__recordedSteps') || '[]'); }
        catch (e) { return []; }
    }
    function record(step) {
        var steps = load();
        steps.push(step);
        localStorage.setItem('__recordedSteps', JSON.stringify(steps));
    }
    function cssPath(el) {
        if (!(el instanceof Element)) return '';
        var path = [];
        while (el && el.nodeType === Node.ELEMENT_NODE) {
            var selector = el.nodeName.toLowerCase();
            if (el.id) {
                path.unshift(selector + '#' + el.id);
                break;
            }
            var sib = el, nth = 1;
            while ((sib = sib.previousElementSibling)) {
                if (sib.nodeName.toLowerCase() === selector) nth++;
            }
            if (nth !== 1) selector += ':nth-of-type(' + nth + ')';
            path.unshift(selector);
            el = el.parentNode;
        }
        return path.join(' > ');
    }

    document.addEventListener('click', function(e) {
        record({ action: 'click', selector_type: 'css_selector', selector_value: cssPath(e.target) });
    }, true);
    document.addEventListener('input', function(e) {
        record({ action: 'input', selector_type: 'css_selector', selector_value: cssPath(e.target), text: e.target.value });
    }, true);
    window.addEventListener('scroll', function() {
        record({ action: 'scroll', x: window.scrollX, y: window.scrollY });
    }, true);
})();
"#;

const CLEAR_EVENTS_JS: &str = "localStorage.removeItem('__recordedSteps');";
const READ_EVENTS_JS: &str = "localStorage.getItem('__recordedSteps')";

/// One event captured by the in-page script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RawEvent {
    Click {
        selector_value: String,
    },
    Input {
        selector_value: String,
        #[serde(default)]
        text: String,
    },
    Scroll {
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
}

/// Turn captured events into steps, starting with a visit of `start_url`.
///
/// Events map one to one; nothing is merged or dropped.
pub fn translate(start_url: &str, events: &[RawEvent]) -> Vec<Step> {
    let mut steps = Vec::with_capacity(events.len() + 1);
    steps.push(Step::Visit {
        url: start_url.to_string(),
        wait_seconds: RECORDED_WAIT_SECONDS,
    });

    steps.extend(events.iter().map(|event| match event {
        RawEvent::Click { selector_value } => Step::Click {
            selector: Selector::css(selector_value.clone()),
            wait_seconds: RECORDED_WAIT_SECONDS,
        },
        RawEvent::Input {
            selector_value,
            text,
        } => Step::Input {
            selector: Selector::css(selector_value.clone()),
            text: text.clone(),
            wait_seconds: RECORDED_WAIT_SECONDS,
        },
        RawEvent::Scroll { x, y } => Step::Scroll {
            x: x.round() as i64,
            y: y.round() as i64,
            wait_seconds: RECORDED_WAIT_SECONDS,
        },
    }));
    steps
}

/// Parse the stored event log, skipping entries that are not events.
pub fn parse_events(raw: &str) -> Result<Vec<RawEvent>> {
    let values: Vec<Value> = serde_json::from_str(raw).context("Recorded events are not a JSON array")?;
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawEvent>(value.clone()) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Skipping recorded event {}: {}", value, e);
                None
            }
        })
        .collect())
}

/// A headed browser capturing user interactions.
pub struct Recorder {
    browser: Browser,
    page: Page,
    start_url: String,
}

impl Recorder {
    /// Launch a visible browser at `url` and start capturing.
    pub async fn start(url: &str) -> Result<Self> {
        let mut browser = launch_browser(false).await?;

        match Self::prepare(&browser, url).await {
            Ok(page) => {
                tracing::info!("Recording started at {}", url);
                Ok(Self {
                    browser,
                    page,
                    start_url: url.to_string(),
                })
            }
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    tracing::warn!("Failed to close recording browser: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn prepare(browser: &Browser, url: &str) -> Result<Page> {
        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open recording page")?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(RECORDER_SCRIPT))
            .await
            .context("Failed to install recorder script")?;
        page.goto(url)
            .await
            .with_context(|| format!("Failed to open {}", url))?;
        page.evaluate(CLEAR_EVENTS_JS)
            .await
            .context("Failed to reset recorded events")?;
        Ok(page)
    }

    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    /// Stop capturing, close the browser and return the recorded steps.
    pub async fn stop(mut self) -> Result<Vec<Step>> {
        let raw = self
            .page
            .evaluate(READ_EVENTS_JS)
            .await
            .map(|result| result.value().cloned())
            .context("Failed to read recorded events");

        if let Err(e) = self.browser.close().await {
            tracing::warn!("Failed to close recording browser: {}", e);
        }
        self.browser.wait().await.ok();

        let events = match raw? {
            Some(Value::String(json)) => parse_events(&json)?,
            _ => Vec::new(),
        };
        tracing::info!("Recording stopped: {} event(s)", events.len());
        Ok(translate(&self.start_url, &events))
    }
}
