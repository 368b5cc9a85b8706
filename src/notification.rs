//! Detection and dismissal of transient UI feedback (toasts, alerts,
//! inline validation errors) after an action.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::browser::{BrowserSession, Query};

/// Toast bodies, ARIA alerts and inline form errors.
pub const NOTIFICATION_XPATH: &str = "//*[contains(@class, 'Vue-Toastification__toast-body') or @role='alert' or contains(@class, 'el-form-item__error')]";

/// Close buttons of toasts.
pub const DISMISS_CSS: &str = ".Vue-Toastification__close-button";

pub fn marker_query() -> Query {
    Query::xpath(NOTIFICATION_XPATH)
}

pub fn dismiss_query() -> Query {
    Query::css(DISMISS_CSS)
}

/// Timings of the notification poll.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Upper bound on waiting for a notification to appear.
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Pause before dismissing, so entry animations finish.
    pub settle_delay: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(250),
            settle_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationDetector {
    config: DetectorConfig,
}

impl NotificationDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Collect the trimmed texts of visible feedback, then try to dismiss it.
    ///
    /// Returns an empty list when nothing shows up within the timeout. A
    /// failing marker lookup means the session is unusable and is returned;
    /// text reads and dismissal are best-effort.
    pub async fn detect_and_dismiss<S: BrowserSession>(&self, session: &S) -> Result<Vec<String>> {
        let query = marker_query();
        let deadline = Instant::now() + self.config.timeout;

        let elements = loop {
            let found = session
                .find_elements(&query)
                .await
                .context("Notification lookup failed")?;
            if !found.is_empty() {
                break found;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("No notification within {:?}", self.config.timeout);
                return Ok(Vec::new());
            }
            sleep(self.config.poll_interval.min(deadline - now)).await;
        };

        let mut notifications = Vec::new();
        for element in &elements {
            match session.text(element).await {
                Ok(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        notifications.push(text.to_string());
                    }
                }
                Err(e) => tracing::warn!("Failed to read notification text: {}", e),
            }
        }
        tracing::debug!("Captured notifications: {:?}", notifications);

        sleep(self.config.settle_delay).await;
        self.dismiss(session).await;

        Ok(notifications)
    }

    async fn dismiss<S: BrowserSession>(&self, session: &S) {
        let buttons = match session.find_elements(&dismiss_query()).await {
            Ok(buttons) => buttons,
            Err(e) => {
                tracing::warn!("Failed to look up notification close buttons: {}", e);
                return;
            }
        };

        for button in &buttons {
            if let Err(e) = session.click(button).await {
                tracing::warn!("Error clicking toast close button: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::{ClickEffect, MockElement, MockPage, MockSession};

    fn quick() -> NotificationDetector {
        NotificationDetector::new(DetectorConfig {
            timeout: Duration::from_millis(60),
            poll_interval: Duration::from_millis(10),
            settle_delay: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn test_absence_is_empty_not_error() {
        let session = MockSession::new(MockPage::new());
        let started = Instant::now();
        let notes = quick().detect_and_dismiss(&session).await.unwrap();
        assert!(notes.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_collects_trimmed_texts_and_dismisses() {
        let session = MockSession::new(
            MockPage::new()
                .element(MockElement::notification("toast", "  Saved successfully \n"))
                .element(MockElement::notification("blank", "   "))
                .element(MockElement::dismiss_button("close", "toast")),
        );

        let notes = quick().detect_and_dismiss(&session).await.unwrap();
        assert_eq!(notes, vec!["Saved successfully".to_string()]);
        assert!(session.history().await.contains(&"click:close".to_string()));

        // Dismissed toast no longer matches
        let remaining = session.find_elements(&marker_query()).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_dismissal_failure_is_tolerated() {
        let session = MockSession::new(
            MockPage::new()
                .element(MockElement::notification("toast", "Email is required"))
                .element(
                    MockElement::new("close")
                        .matching(dismiss_query())
                        .failing_click(),
                ),
        );

        let notes = quick().detect_and_dismiss(&session).await.unwrap();
        assert_eq!(notes, vec!["Email is required".to_string()]);
    }

    #[tokio::test]
    async fn test_dead_session_lookup_is_an_error() {
        let session = MockSession::new(
            MockPage::new().element(
                MockElement::new("kill")
                    .matching(Query::css("#kill"))
                    .on_click(ClickEffect::Crash),
            ),
        );
        session.click(&0).await.unwrap();

        let err = quick().detect_and_dismiss(&session).await.unwrap_err();
        assert!(format!("{:#}", err).contains("disconnected"));
    }
}
