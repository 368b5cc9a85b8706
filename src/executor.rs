//! Step executor: runs one step against a live session and classifies it.
//!
//! Each step walks `Pending -> Resolving -> Acting -> Verifying -> Done` and
//! produces exactly one [`StepLog`]. Element lookup misses and assertion
//! mismatches become log data; only a dead session surfaces as an error.

use std::time::Duration;
use tokio::time::sleep;

use crate::browser::{BrowserSession, Query};
use crate::error::StepError;
use crate::models::{DataRow, Selector, Step, StepLog};
use crate::notification::{DetectorConfig, NotificationDetector};
use crate::screenshot::ScreenshotStore;
use crate::selector::resolve;
use crate::status::StepStatus;
use crate::template::substitute;

/// Menu entries considered by dropdown steps.
pub const DROPDOWN_ITEM_CSS: &str = "li.el-dropdown-menu__item";

/// Engine timings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Pause after navigation and clicks before verifying.
    pub action_settle: Duration,
    /// Pause after opening a dropdown before reading its items.
    pub dropdown_settle: Duration,
    pub detector: DetectorConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            action_settle: Duration::from_secs(1),
            dropdown_settle: Duration::from_secs(1),
            detector: DetectorConfig::default(),
        }
    }
}

impl ExecutorConfig {
    /// No settles and a single notification poll.
    pub fn without_delays() -> Self {
        Self {
            action_settle: Duration::ZERO,
            dropdown_settle: Duration::ZERO,
            detector: DetectorConfig {
                timeout: Duration::ZERO,
                poll_interval: Duration::ZERO,
                settle_delay: Duration::ZERO,
            },
        }
    }
}

/// Per-step execution context.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// One-based iteration number.
    pub iteration: usize,
    pub row: Option<&'a DataRow>,
    /// Timestamp shared by every screenshot of the run.
    pub run_stamp: &'a str,
}

/// Result of a step that did not kill the session.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The iteration goes on with the next step.
    Continue(StepLog),
    /// The iteration ends here; this is its terminal log.
    Abort(StepLog),
}

impl StepOutcome {
    pub fn log(&self) -> &StepLog {
        match self {
            StepOutcome::Continue(log) | StepOutcome::Abort(log) => log,
        }
    }

    pub fn into_log(self) -> StepLog {
        match self {
            StepOutcome::Continue(log) | StepOutcome::Abort(log) => log,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolving,
    Acting,
    Verifying,
}

/// Fields filled in while a step runs.
#[derive(Debug, Default)]
struct Observed {
    actual_url: Option<String>,
    notifications: Vec<String>,
    screenshot: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    config: ExecutorConfig,
    detector: NotificationDetector,
    screenshots: ScreenshotStore,
}

impl StepExecutor {
    pub fn new(config: ExecutorConfig, screenshots: ScreenshotStore) -> Self {
        let detector = NotificationDetector::new(config.detector.clone());
        Self {
            config,
            detector,
            screenshots,
        }
    }

    /// Execute `step` and produce its log.
    ///
    /// Returns `Err` only with [`StepError::SessionFault`].
    pub async fn execute<S: BrowserSession>(
        &self,
        session: &mut S,
        step: &Step,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, StepError> {
        let mut observed = Observed::default();

        let (status, abort) = match self.act(session, step, ctx, &mut observed).await {
            Ok(status) => (status, false),
            Err(e @ StepError::ElementNotFound { .. }) => {
                (StepStatus::StepFailed(e.to_string()), false)
            }
            Err(e @ StepError::AssertionMismatch { .. }) => {
                (StepStatus::Error(e.to_string()), true)
            }
            Err(e @ StepError::SessionFault(_)) => return Err(e),
        };

        tracing::debug!(
            "Step {} (iteration {}) done: {}",
            step.action(),
            ctx.iteration,
            status
        );

        let log = StepLog {
            step: Some(step.clone()),
            iteration: ctx.iteration,
            actual_url: observed.actual_url,
            passed: status.is_pass(),
            status: status.to_string(),
            notifications: observed.notifications,
            screenshot: observed.screenshot,
            login_email: ctx.row.and_then(|r| r.identity()).map(str::to_string),
        };

        Ok(if abort {
            StepOutcome::Abort(log)
        } else {
            StepOutcome::Continue(log)
        })
    }

    fn enter(&self, step: &Step, phase: Phase) {
        tracing::trace!("{} -> {:?}", step.action(), phase);
    }

    async fn act<S: BrowserSession>(
        &self,
        session: &mut S,
        step: &Step,
        ctx: &StepContext<'_>,
        observed: &mut Observed,
    ) -> Result<StepStatus, StepError> {
        let action = step.action();

        match step {
            Step::Visit { url, .. } => {
                self.enter(step, Phase::Acting);
                let expected = substitute(url, ctx.row);
                session.refresh().await.map_err(StepError::fault)?;
                session.navigate(&expected).await.map_err(StepError::fault)?;
                sleep(self.config.action_settle).await;

                self.enter(step, Phase::Verifying);
                let actual = session.current_url().await.map_err(StepError::fault)?;
                let status = if urls_match(&expected, &actual) {
                    StepStatus::Success
                } else {
                    StepStatus::NoAccess
                };
                observed.actual_url = Some(actual);

                let status = self.notify(session, status, observed).await?;
                observed.screenshot = self.shoot(session, ctx, action).await?;
                Ok(status)
            }

            Step::Click { selector, .. } => {
                self.enter(step, Phase::Resolving);
                let element = resolve(session, selector).await?;

                self.enter(step, Phase::Acting);
                if let Err(e) = session.click(&element).await {
                    return Ok(interaction_failed("Click", selector, e));
                }
                sleep(self.config.action_settle).await;

                self.enter(step, Phase::Verifying);
                let status = self.notify(session, StepStatus::Clicked, observed).await?;
                observed.screenshot = self.shoot(session, ctx, action).await?;
                Ok(status)
            }

            Step::Input { selector, text, .. } => {
                self.enter(step, Phase::Resolving);
                let element = resolve(session, selector).await?;

                self.enter(step, Phase::Acting);
                let value = substitute(text, ctx.row);
                if let Err(e) = session.clear(&element).await {
                    return Ok(interaction_failed("Clear", selector, e));
                }
                if let Err(e) = session.type_text(&element, &value).await {
                    return Ok(interaction_failed("Typing", selector, e));
                }

                self.enter(step, Phase::Verifying);
                observed.screenshot = self.shoot(session, ctx, action).await?;
                Ok(StepStatus::Input(value))
            }

            Step::Assert { text, .. } => {
                self.enter(step, Phase::Acting);
                let expected = substitute(text, ctx.row);

                self.enter(step, Phase::Verifying);
                let content = session.page_content().await.map_err(StepError::fault)?;
                observed.screenshot = self.shoot(session, ctx, action).await?;
                if content.contains(&expected) {
                    Ok(StepStatus::Success)
                } else {
                    Err(StepError::AssertionMismatch { expected })
                }
            }

            Step::SelectDropdown { selector, text, .. } => {
                self.enter(step, Phase::Resolving);
                let dropdown = resolve(session, selector).await?;

                self.enter(step, Phase::Acting);
                if let Err(e) = session.click(&dropdown).await {
                    return Ok(interaction_failed("Opening dropdown", selector, e));
                }
                sleep(self.config.dropdown_settle).await;

                let expected = substitute(text, ctx.row).trim().to_string();
                let Some(item) = self.find_visible_item(session, &expected).await? else {
                    self.enter(step, Phase::Verifying);
                    observed.screenshot = self.shoot(session, ctx, action).await?;
                    return Ok(StepStatus::DropdownItemNotFound);
                };
                if let Err(e) = session.click(&item).await {
                    return Ok(interaction_failed("Selecting item", selector, e));
                }

                self.enter(step, Phase::Verifying);
                let status = self
                    .notify(session, StepStatus::Selected(expected), observed)
                    .await?;
                observed.screenshot = self.shoot(session, ctx, action).await?;
                Ok(status)
            }

            Step::Scroll { x, y, .. } => {
                self.enter(step, Phase::Acting);
                session
                    .execute_script(&format!("window.scrollTo({}, {});", x, y))
                    .await
                    .map_err(StepError::fault)?;

                self.enter(step, Phase::Verifying);
                observed.screenshot = self.shoot(session, ctx, action).await?;
                Ok(StepStatus::Scrolled { x: *x, y: *y })
            }
        }
    }

    /// First displayed dropdown item whose trimmed text equals `expected`.
    async fn find_visible_item<S: BrowserSession>(
        &self,
        session: &S,
        expected: &str,
    ) -> Result<Option<S::Element>, StepError> {
        let items = session
            .find_elements(&Query::css(DROPDOWN_ITEM_CSS))
            .await
            .map_err(StepError::fault)?;

        for item in items {
            let displayed = session.is_displayed(&item).await.unwrap_or(false);
            if !displayed {
                continue;
            }
            let text = session.text(&item).await.unwrap_or_default();
            if text.trim() == expected {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    async fn notify<S: BrowserSession>(
        &self,
        session: &S,
        status: StepStatus,
        observed: &mut Observed,
    ) -> Result<StepStatus, StepError> {
        let notifications = self
            .detector
            .detect_and_dismiss(session)
            .await
            .map_err(StepError::fault)?;
        let status = status.with_notifications(&notifications);
        observed.notifications = notifications;
        Ok(status)
    }

    async fn shoot<S: BrowserSession>(
        &self,
        session: &S,
        ctx: &StepContext<'_>,
        action: &str,
    ) -> Result<Option<String>, StepError> {
        self.screenshots.capture(session, ctx.run_stamp, action).await
    }
}

fn interaction_failed(what: &str, selector: &Selector, err: anyhow::Error) -> StepStatus {
    StepStatus::StepFailed(format!(
        "{} on {}={} failed: {:#}",
        what, selector.kind, selector.value, err
    ))
}

/// Compare URLs, ignoring a single trailing slash on either side.
pub fn urls_match(expected: &str, actual: &str) -> bool {
    fn trim(url: &str) -> &str {
        url.strip_suffix('/').unwrap_or(url)
    }
    trim(expected) == trim(actual)
}
