//! WebTestService implementing FgpService trait.
//!
//! Owns the process-scoped state of the daemon: the test runner, the single
//! active recording and the background scheduler.

use anyhow::{bail, Context, Result};
use fgp_daemon::service::MethodInfo;
use fgp_daemon::FgpService;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::browser::ChromeProvider;
use crate::config::Settings;
use crate::executor::{ExecutorConfig, StepExecutor};
use crate::models::{ScheduledTest, Step, TestCase};
use crate::recording::Recorder;
use crate::runner::{RunOptions, TestRunner};
use crate::scheduler::{Scheduler, DEFAULT_TICK};
use crate::screenshot::ScreenshotStore;
use crate::selector::identify_selectors;
use crate::store::{DataSource, ResultStore, ScheduleStore, TestCaseStore};

/// Recorded browser test service.
pub struct WebTestService {
    runtime: Runtime,
    runner: Arc<TestRunner<ChromeProvider>>,
    schedules: ScheduleStore,
    recording: Arc<Mutex<Option<Recorder>>>,
    scheduler_cancel: CancellationToken,
    headless: bool,
}

impl WebTestService {
    /// Create the service and start the scheduler on its runtime.
    pub fn new(settings: &Settings, headless: bool) -> Result<Self> {
        let runtime = Runtime::new().context("Failed to create tokio runtime")?;
        settings.ensure_dirs()?;

        let executor = StepExecutor::new(
            ExecutorConfig::default(),
            ScreenshotStore::new(settings.screenshots_dir()),
        );
        let runner = Arc::new(TestRunner::new(
            ChromeProvider,
            executor,
            TestCaseStore::new(settings.test_cases_file()),
            ResultStore::new(settings.results_dir()),
        ));
        let schedules = ScheduleStore::new(settings.schedules_file());

        let scheduler_cancel = CancellationToken::new();
        let scheduler = Scheduler::new(Arc::clone(&runner), schedules.clone(), DEFAULT_TICK);
        runtime.spawn(scheduler.run(scheduler_cancel.clone()));

        tracing::info!("Webtest service ready at {:?}", settings.home());

        Ok(Self {
            runtime,
            runner,
            schedules,
            recording: Arc::new(Mutex::new(None)),
            scheduler_cancel,
            headless,
        })
    }

    /// Extract a required string parameter.
    fn str_param<'p>(params: &'p HashMap<String, Value>, key: &str) -> Result<&'p str> {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .with_context(|| format!("Missing '{}' parameter", key))
    }

    /// Test case name: `name`, or `test_name` as an alias.
    fn get_test_name(params: &HashMap<String, Value>) -> Result<String> {
        params
            .get("name")
            .or_else(|| params.get("test_name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .context("Missing 'name' parameter")
    }

    /// Weekdays as a JSON array or a comma-separated string.
    fn get_days(params: &HashMap<String, Value>) -> Result<Vec<String>> {
        let days: Vec<String> = match params.get("days") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .collect(),
            Some(Value::String(s)) => s.split(',').map(|d| d.trim().to_string()).collect(),
            _ => bail!("Missing 'days' parameter"),
        };
        Ok(days.into_iter().filter(|d| !d.is_empty()).collect())
    }

    fn handle_health(&self, _params: HashMap<String, Value>) -> Result<Value> {
        let recording = self.recording.clone();
        let recording_active = self
            .runtime
            .block_on(async move { recording.lock().await.is_some() });

        Ok(serde_json::json!({
            "healthy": true,
            "service": "webtest",
            "version": env!("CARGO_PKG_VERSION"),
            "recording": recording_active,
            "scheduler": !self.scheduler_cancel.is_cancelled(),
        }))
    }

    // =========================================================================
    // TEST CASES
    // =========================================================================

    fn handle_cases_list(&self, _params: HashMap<String, Value>) -> Result<Value> {
        let cases: Vec<Value> = self
            .runner
            .cases()
            .load()?
            .iter()
            .map(|c| serde_json::json!({"name": c.name, "steps": c.steps.len()}))
            .collect();
        Ok(Value::Array(cases))
    }

    fn handle_cases_get(&self, params: HashMap<String, Value>) -> Result<Value> {
        let name = Self::get_test_name(&params)?;
        let case = self
            .runner
            .cases()
            .get(&name)?
            .with_context(|| format!("Test case '{}' not found", name))?;
        Ok(serde_json::to_value(case)?)
    }

    fn handle_cases_save(&self, params: HashMap<String, Value>) -> Result<Value> {
        let name = Self::get_test_name(&params)?;
        let steps: Vec<Step> = serde_json::from_value(
            params
                .get("steps")
                .cloned()
                .context("Missing 'steps' parameter")?,
        )
        .context("Invalid 'steps' parameter")?;

        let count = steps.len();
        self.runner.cases().insert(TestCase {
            name: name.clone(),
            steps,
        })?;

        Ok(serde_json::json!({"success": true, "name": name, "steps": count}))
    }

    fn handle_cases_delete(&self, params: HashMap<String, Value>) -> Result<Value> {
        let name = Self::get_test_name(&params)?;
        if !self.runner.cases().remove(&name)? {
            bail!("Test case '{}' not found", name);
        }
        Ok(serde_json::json!({"success": true, "name": name}))
    }

    // =========================================================================
    // RUNS
    // =========================================================================

    fn handle_run(&self, params: HashMap<String, Value>) -> Result<Value> {
        let name = Self::get_test_name(&params)?;
        let case = self
            .runner
            .cases()
            .get(&name)?
            .with_context(|| format!("Test case '{}' not found", name))?;

        let mut options = RunOptions {
            headless: params
                .get("headless")
                .and_then(|v| v.as_bool())
                .unwrap_or(self.headless),
            iterations: params
                .get("iterations")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(1),
            ..RunOptions::default()
        };
        if let Some(csv) = params.get("csv_path").and_then(|v| v.as_str()) {
            options = options.with_data_source(DataSource::from_csv(shellexpand::tilde(csv).into_owned())?);
        }

        let runner = Arc::clone(&self.runner);
        let result = self
            .runtime
            .block_on(async move { runner.run_and_save(&case, options).await })?;

        let mut value = serde_json::to_value(&result)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("passed".to_string(), result.passed().into());
            obj.insert("failed".to_string(), result.failed().into());
        }
        Ok(value)
    }

    fn handle_results_list(&self, _params: HashMap<String, Value>) -> Result<Value> {
        Ok(serde_json::to_value(self.runner.results().list()?)?)
    }

    // =========================================================================
    // RECORDING
    // =========================================================================

    fn handle_record_start(&self, params: HashMap<String, Value>) -> Result<Value> {
        let url = Self::str_param(&params, "url")?.to_string();
        let recording = self.recording.clone();

        self.runtime.block_on(async move {
            let mut slot = recording.lock().await;
            if let Some(active) = slot.as_ref() {
                bail!("A recording is already active at {}", active.start_url());
            }
            *slot = Some(Recorder::start(&url).await?);
            Ok::<(), anyhow::Error>(())
        })?;

        Ok(serde_json::json!({"success": true, "recording": true}))
    }

    fn handle_record_stop(&self, params: HashMap<String, Value>) -> Result<Value> {
        let name = Self::get_test_name(&params).ok();
        let recording = self.recording.clone();

        let steps = self.runtime.block_on(async move {
            let recorder = recording
                .lock()
                .await
                .take()
                .context("No active recording")?;
            recorder.stop().await
        })?;

        let saved = match name {
            Some(name) => {
                self.runner.cases().insert(TestCase {
                    name: name.clone(),
                    steps: steps.clone(),
                })?;
                Some(name)
            }
            None => None,
        };

        Ok(serde_json::json!({"steps": steps, "saved": saved}))
    }

    // =========================================================================
    // SCHEDULES
    // =========================================================================

    fn handle_schedule_add(&self, params: HashMap<String, Value>) -> Result<Value> {
        let test_name = Self::get_test_name(&params)?;
        if self.runner.cases().get(&test_name)?.is_none() {
            bail!("Test case '{}' not found", test_name);
        }

        let entry = ScheduledTest {
            test_name,
            time: Self::str_param(&params, "time")?.to_string(),
            days: Self::get_days(&params)?,
            csv_path: params
                .get("csv_path")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        };
        self.schedules.add(entry.clone())?;

        Ok(serde_json::json!({"success": true, "schedule": entry}))
    }

    fn handle_schedule_list(&self, _params: HashMap<String, Value>) -> Result<Value> {
        let entries: Vec<Value> = self
            .schedules
            .load()?
            .into_iter()
            .enumerate()
            .map(|(index, entry)| serde_json::json!({"index": index, "schedule": entry}))
            .collect();
        Ok(Value::Array(entries))
    }

    fn handle_schedule_remove(&self, params: HashMap<String, Value>) -> Result<Value> {
        let index = params
            .get("index")
            .and_then(|v| v.as_u64())
            .context("Missing 'index' parameter")? as usize;
        let removed = self.schedules.remove(index)?;
        Ok(serde_json::json!({"success": true, "removed": removed}))
    }
}

impl WebTestService {
    // =========================================================================
    // SELECTORS
    // =========================================================================

    fn identify(params: &HashMap<String, Value>) -> Result<Value> {
        let html = Self::str_param(params, "html")?;
        let suggested = identify_selectors(html).context("No HTML element found in 'html'")?;
        Ok(serde_json::to_value(suggested)?)
    }

    fn handle_selectors_identify(&self, params: HashMap<String, Value>) -> Result<Value> {
        Self::identify(&params)
    }
}

impl Drop for WebTestService {
    fn drop(&mut self) {
        self.scheduler_cancel.cancel();
    }
}

impl FgpService for WebTestService {
    fn name(&self) -> &str {
        "webtest"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn dispatch(&self, method: &str, params: HashMap<String, Value>) -> Result<Value> {
        match method {
            "health" => self.handle_health(params),
            // Test cases
            "webtest.cases.list" | "cases.list" => self.handle_cases_list(params),
            "webtest.cases.get" | "cases.get" => self.handle_cases_get(params),
            "webtest.cases.save" | "cases.save" => self.handle_cases_save(params),
            "webtest.cases.delete" | "cases.delete" => self.handle_cases_delete(params),
            // Runs
            "webtest.run" | "run" => self.handle_run(params),
            "webtest.results.list" | "results.list" => self.handle_results_list(params),
            // Recording
            "webtest.record.start" | "record.start" => self.handle_record_start(params),
            "webtest.record.stop" | "record.stop" => self.handle_record_stop(params),
            // Schedules
            "webtest.schedule.add" | "schedule.add" => self.handle_schedule_add(params),
            "webtest.schedule.list" | "schedule.list" => self.handle_schedule_list(params),
            "webtest.schedule.remove" | "schedule.remove" => self.handle_schedule_remove(params),
            // Selectors
            "webtest.selectors.identify" | "selectors.identify" => {
                self.handle_selectors_identify(params)
            }
            _ => Err(anyhow::anyhow!("Unknown method: {}", method)),
        }
    }

    fn method_list(&self) -> Vec<MethodInfo> {
        vec![
            // Test cases
            MethodInfo {
                name: "webtest.cases.list".to_string(),
                description: "List stored test cases".to_string(),
                params: vec![],
            },
            MethodInfo {
                name: "webtest.cases.get".to_string(),
                description: "Get a test case with its steps".to_string(),
                params: vec![],
            },
            MethodInfo {
                name: "webtest.cases.save".to_string(),
                description: "Store a new test case".to_string(),
                params: vec![],
            },
            MethodInfo {
                name: "webtest.cases.delete".to_string(),
                description: "Delete a test case".to_string(),
                params: vec![],
            },
            // Runs
            MethodInfo {
                name: "webtest.run".to_string(),
                description: "Run a test case (optionally per CSV row) and save the result"
                    .to_string(),
                params: vec![],
            },
            MethodInfo {
                name: "webtest.results.list".to_string(),
                description: "List stored run results, newest first".to_string(),
                params: vec![],
            },
            // Recording
            MethodInfo {
                name: "webtest.record.start".to_string(),
                description: "Open a visible browser and record interactions".to_string(),
                params: vec![],
            },
            MethodInfo {
                name: "webtest.record.stop".to_string(),
                description: "Stop recording and return (or save) the steps".to_string(),
                params: vec![],
            },
            // Schedules
            MethodInfo {
                name: "webtest.schedule.add".to_string(),
                description: "Schedule a test case on weekdays at a time of day".to_string(),
                params: vec![],
            },
            MethodInfo {
                name: "webtest.schedule.list".to_string(),
                description: "List scheduled tests".to_string(),
                params: vec![],
            },
            MethodInfo {
                name: "webtest.schedule.remove".to_string(),
                description: "Remove a scheduled test by index".to_string(),
                params: vec![],
            },
            // Selectors
            MethodInfo {
                name: "webtest.selectors.identify".to_string(),
                description: "Suggest id/name/css/xpath/placeholder selectors for an HTML snippet"
                    .to_string(),
                params: vec![],
            },
        ]
    }
}
