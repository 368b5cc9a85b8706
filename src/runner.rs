//! Test run orchestration.
//!
//! A run is a lazy stream of [`StepLog`]s. Iterations execute strictly one
//! after another, each in a freshly opened session that is always closed
//! before the next one starts.

use anyhow::{Context, Result};
use chrono::Local;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserSession, SessionProvider};
use crate::error::StepError;
use crate::executor::{StepContext, StepExecutor, StepOutcome};
use crate::models::{DataRow, RunResult, Step, StepLog, TestCase};
use crate::status::StepStatus;
use crate::store::{DataSource, ResultStore, TestCaseStore};
use crate::template::placeholders;

/// How to run a test case.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub headless: bool,
    /// Repetitions of the case (per row when rows are given).
    pub iterations: usize,
    pub data_rows: Option<Vec<DataRow>>,
    /// Reference to where the rows came from, recorded in the result.
    pub data_source: Option<String>,
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            headless: true,
            iterations: 1,
            data_rows: None,
            data_source: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl RunOptions {
    pub fn with_rows(mut self, rows: Vec<DataRow>) -> Self {
        self.data_rows = Some(rows);
        self
    }

    pub fn with_data_source(mut self, source: DataSource) -> Self {
        self.data_source = Some(source.path().to_string_lossy().to_string());
        self.data_rows = Some(source.into_rows());
        self
    }
}

/// One planned iteration.
struct Planned {
    iteration: usize,
    row: Option<DataRow>,
}

struct Active<S> {
    session: S,
    iteration: usize,
    row: Option<DataRow>,
    next_step: usize,
}

struct RunState<'a, P: SessionProvider> {
    provider: &'a P,
    case: &'a TestCase,
    executor: &'a StepExecutor,
    headless: bool,
    cancel: CancellationToken,
    run_stamp: String,
    plan: VecDeque<Planned>,
    active: Option<Active<P::Session>>,
    pending_wait: Option<Duration>,
    finished: bool,
}

/// Run `case` and yield each step log as soon as it is produced.
///
/// The stream is finite and not restartable. Dropping it mid-run abandons the
/// current session without closing it; cancel through `options.cancel` to
/// close it cleanly.
pub fn run_test_case<'a, P>(
    provider: &'a P,
    case: &'a TestCase,
    options: RunOptions,
    executor: &'a StepExecutor,
) -> BoxStream<'a, StepLog>
where
    P: SessionProvider,
    P::Session: 'a,
{
    let plan = plan_iterations(&options);

    tracing::info!(
        "Running '{}': {} step(s) x {} iteration(s)",
        case.name,
        case.steps.len(),
        plan.len()
    );
    if options.data_rows.is_none() {
        warn_unbound_placeholders(case);
    }

    let state = RunState {
        provider,
        case,
        executor,
        headless: options.headless,
        cancel: options.cancel,
        run_stamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
        plan,
        active: None,
        pending_wait: None,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        let log = state.next_log().await?;
        Some((log, state))
    })
    .boxed()
}

/// Run `case` to completion and collect the result.
pub async fn run_to_result<P: SessionProvider>(
    provider: &P,
    case: &TestCase,
    options: RunOptions,
    executor: &StepExecutor,
) -> RunResult {
    let started_at = Local::now();
    let data_source = options.data_source.clone();
    let step_logs: Vec<StepLog> = run_test_case(provider, case, options, executor)
        .collect()
        .await;

    RunResult {
        test_name: case.name.clone(),
        started_at,
        step_logs,
        data_source,
    }
}

fn plan_iterations(options: &RunOptions) -> VecDeque<Planned> {
    let mut plan = VecDeque::new();
    match &options.data_rows {
        Some(rows) => {
            if rows.is_empty() {
                tracing::warn!("Data source has no rows; nothing to run");
            }
            for row in rows {
                for _ in 0..options.iterations {
                    plan.push_back(Planned {
                        iteration: plan.len() + 1,
                        row: Some(row.clone()),
                    });
                }
            }
        }
        None => {
            for n in 1..=options.iterations {
                plan.push_back(Planned {
                    iteration: n,
                    row: None,
                });
            }
        }
    }
    plan
}

fn step_templates(step: &Step) -> Vec<&str> {
    match step {
        Step::Visit { url, .. } => vec![url.as_str()],
        Step::Input { text, .. } | Step::Assert { text, .. } | Step::SelectDropdown { text, .. } => {
            vec![text.as_str()]
        }
        Step::Click { .. } | Step::Scroll { .. } => Vec::new(),
    }
}

fn warn_unbound_placeholders(case: &TestCase) {
    let names: Vec<String> = case
        .steps
        .iter()
        .flat_map(step_templates)
        .flat_map(placeholders)
        .collect();
    if !names.is_empty() {
        tracing::warn!(
            "'{}' references {:?} but no data rows were given; they substitute empty",
            case.name,
            names
        );
    }
}

fn fault_log(step: Option<&Step>, iteration: usize, row: Option<&DataRow>, err: &StepError) -> StepLog {
    let status = StepStatus::Error(err.to_string());
    StepLog {
        step: step.cloned(),
        iteration,
        actual_url: None,
        passed: false,
        status: status.to_string(),
        notifications: Vec::new(),
        screenshot: None,
        login_email: row.and_then(|r| r.identity()).map(str::to_string),
    }
}

impl<'a, P: SessionProvider> RunState<'a, P> {
    async fn next_log(&mut self) -> Option<StepLog> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.shutdown().await;
                return None;
            }

            if let Some(wait) = self.pending_wait.take() {
                let cancelled = tokio::select! {
                    _ = self.cancel.cancelled() => true,
                    _ = sleep(wait) => false,
                };
                if cancelled {
                    self.shutdown().await;
                    return None;
                }
            }

            if self.active.is_none() {
                let planned = match self.plan.pop_front() {
                    Some(planned) => planned,
                    None => {
                        self.finished = true;
                        tracing::info!("Run of '{}' finished", self.case.name);
                        return None;
                    }
                };
                if let Some(log) = self.begin(planned).await {
                    return Some(log);
                }
                continue;
            }

            let case = self.case;
            let Some(active) = self.active.as_mut() else {
                continue;
            };
            let Some(step) = case.steps.get(active.next_step) else {
                self.end_iteration().await;
                continue;
            };
            active.next_step += 1;

            let ctx = StepContext {
                iteration: active.iteration,
                row: active.row.as_ref(),
                run_stamp: &self.run_stamp,
            };
            let executed = tokio::select! {
                _ = self.cancel.cancelled() => None,
                r = self.executor.execute(&mut active.session, step, &ctx) => Some(r),
            };

            match executed {
                None => {
                    tracing::info!("Run of '{}' cancelled", self.case.name);
                    self.shutdown().await;
                    return None;
                }
                Some(Ok(StepOutcome::Continue(log))) => {
                    self.pending_wait = Some(post_step_wait(step));
                    return Some(log);
                }
                Some(Ok(StepOutcome::Abort(log))) => {
                    tracing::info!(
                        "Iteration {} stopped at step {}: {}",
                        log.iteration,
                        step.action(),
                        log.status
                    );
                    self.end_iteration().await;
                    return Some(log);
                }
                Some(Err(err)) => {
                    tracing::warn!("Iteration {} lost its session: {}", active.iteration, err);
                    let log = fault_log(Some(step), active.iteration, active.row.as_ref(), &err);
                    self.end_iteration().await;
                    return Some(log);
                }
            }
        }
    }

    /// Open a session for `planned`. Returns a failure log if that fails.
    async fn begin(&mut self, planned: Planned) -> Option<StepLog> {
        tracing::info!(
            "Iteration {} of '{}'{}",
            planned.iteration,
            self.case.name,
            planned
                .row
                .as_ref()
                .map(|r| format!(" ({})", r.label()))
                .unwrap_or_default()
        );

        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            r = self.provider.open(self.headless) => r,
        };

        match opened {
            Ok(session) => {
                self.active = Some(Active {
                    session,
                    iteration: planned.iteration,
                    row: planned.row,
                    next_step: 0,
                });
                None
            }
            Err(e) => {
                let err = StepError::fault(e.context("Failed to open browser session"));
                tracing::warn!("Iteration {} could not start: {}", planned.iteration, err);
                Some(fault_log(None, planned.iteration, planned.row.as_ref(), &err))
            }
        }
    }

    async fn end_iteration(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.session.close().await {
                tracing::warn!("Failed to close session of iteration {}: {}", active.iteration, e);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.end_iteration().await;
        self.plan.clear();
        self.pending_wait = None;
        self.finished = true;
    }
}

fn post_step_wait(step: &Step) -> Duration {
    Duration::try_from_secs_f64(step.wait_seconds()).unwrap_or(Duration::ZERO)
}

/// Engine bound to a session provider and the on-disk stores.
pub struct TestRunner<P> {
    provider: P,
    executor: StepExecutor,
    cases: TestCaseStore,
    results: ResultStore,
}

impl<P: SessionProvider> TestRunner<P> {
    pub fn new(provider: P, executor: StepExecutor, cases: TestCaseStore, results: ResultStore) -> Self {
        Self {
            provider,
            executor,
            cases,
            results,
        }
    }

    pub fn cases(&self) -> &TestCaseStore {
        &self.cases
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn run<'a>(&'a self, case: &'a TestCase, options: RunOptions) -> BoxStream<'a, StepLog>
    where
        P::Session: 'a,
    {
        run_test_case(&self.provider, case, options, &self.executor)
    }

    /// Run a case to completion and persist its result.
    pub async fn run_and_save(&self, case: &TestCase, options: RunOptions) -> Result<RunResult> {
        let result = run_to_result(&self.provider, case, options, &self.executor).await;
        let path = self.results.save(&result).await?;
        tracing::info!(
            "Saved result of '{}' ({} passed, {} failed) to {:?}",
            result.test_name,
            result.passed(),
            result.failed(),
            path
        );
        Ok(result)
    }

    /// Entry point for scheduled runs: headless, one iteration per row.
    pub async fn run_scheduled_test(&self, test_name: &str, csv_path: Option<&str>) -> Result<RunResult> {
        let case = self
            .cases
            .get(test_name)?
            .with_context(|| format!("Test case '{}' not found", test_name))?;

        let mut options = RunOptions::default();
        if let Some(path) = csv_path {
            let source = DataSource::from_csv(shellexpand::tilde(path).into_owned())?;
            options = options.with_data_source(source);
        }

        tracing::info!("Scheduled run of '{}'", test_name);
        let result = self.run_and_save(&case, options).await?;
        for log in &result.step_logs {
            tracing::debug!(
                "[{}] {} -> {}",
                log.login_email.as_deref().unwrap_or("-"),
                log.step.as_ref().map(Step::action).unwrap_or("session"),
                log.status
            );
        }
        Ok(result)
    }
}
