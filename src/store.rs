//! JSON-file stores for test cases, schedules and run results, and the CSV
//! data source.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::models::{DataRow, RunResult, ScheduledTest, TestCase};
use crate::scheduler::{parse_time_of_day, parse_weekday};

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if contents.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn save_json<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let serialized = serde_json::to_vec_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serialized)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Stored test cases, one JSON array in one file.
#[derive(Debug, Clone)]
pub struct TestCaseStore {
    path: PathBuf,
}

impl TestCaseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<TestCase>> {
        load_json(&self.path)
    }

    pub fn save(&self, cases: &[TestCase]) -> Result<()> {
        save_json(&self.path, cases)
    }

    pub fn get(&self, name: &str) -> Result<Option<TestCase>> {
        Ok(self.load()?.into_iter().find(|c| c.name == name))
    }

    /// Add a new case. Names are unique.
    pub fn insert(&self, case: TestCase) -> Result<()> {
        if case.name.trim().is_empty() {
            bail!("Test case name must not be empty");
        }
        let mut cases = self.load()?;
        if cases.iter().any(|c| c.name == case.name) {
            bail!("Test case '{}' already exists", case.name);
        }
        tracing::info!("Saving test case '{}' ({} steps)", case.name, case.steps.len());
        cases.push(case);
        self.save(&cases)
    }

    /// Remove a case by name. Returns whether it existed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut cases = self.load()?;
        let before = cases.len();
        cases.retain(|c| c.name != name);
        if cases.len() == before {
            return Ok(false);
        }
        self.save(&cases)?;
        Ok(true)
    }
}

/// Stored schedule entries.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Vec<ScheduledTest>> {
        load_json(&self.path)
    }

    pub fn save(&self, entries: &[ScheduledTest]) -> Result<()> {
        save_json(&self.path, entries)
    }

    /// Validate and append an entry.
    pub fn add(&self, entry: ScheduledTest) -> Result<()> {
        parse_time_of_day(&entry.time)?;
        if entry.days.is_empty() {
            bail!("Schedule for '{}' has no days", entry.test_name);
        }
        for day in &entry.days {
            parse_weekday(day)?;
        }

        let mut entries = self.load()?;
        entries.push(entry);
        self.save(&entries)
    }

    /// Remove the entry at `index` and return it.
    pub fn remove(&self, index: usize) -> Result<ScheduledTest> {
        let mut entries = self.load()?;
        if index >= entries.len() {
            bail!(
                "No schedule at index {} ({} scheduled)",
                index,
                entries.len()
            );
        }
        let removed = entries.remove(index);
        self.save(&entries)?;
        Ok(removed)
    }
}

/// Summary of one stored run result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub file: String,
    pub test_name: String,
    pub timestamp: DateTime<Local>,
    pub steps: usize,
    pub passed: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_used: Option<String>,
}

/// Directory of run results, one JSON file per run.
///
/// Writes for the same test name are serialised within one store. Across
/// stores sharing a directory, each file is created exclusively, so two
/// writers never end up on the same path.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn lock_for(&self, test_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(test_name.to_string()).or_default())
    }

    /// Write `run` as `<test>_<YYYYmmdd_HHMMSS>.json` (or `..._N.json` when
    /// taken) and return the path.
    pub async fn save(&self, run: &RunResult) -> Result<PathBuf> {
        let lock = self.lock_for(&run.test_name).await;
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let stem = format!(
            "{}_{}",
            file_safe(&run.test_name),
            run.started_at.format("%Y%m%d_%H%M%S")
        );
        let serialized = serde_json::to_vec_pretty(run)?;

        // Claim the name with create_new: other stores (another process or
        // another ResultStore on the same dir) may race for it.
        let mut n = 0;
        let (path, mut file) = loop {
            let path = if n == 0 {
                self.dir.join(format!("{}.json", stem))
            } else {
                self.dir.join(format!("{}_{}.json", stem, n))
            };
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()))
                }
            }
        };

        file.write_all(&serialized)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        file.flush().await?;
        Ok(path)
    }

    /// Stored results, newest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<ResultSummary>> {
        let mut summaries = Vec::new();
        if !self.dir.exists() {
            return Ok(summaries);
        }

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.extension().map(|e| e == "json").unwrap_or(false) {
                continue;
            }
            let run = match std::fs::read(&path)
                .map_err(anyhow::Error::from)
                .and_then(|b| Ok(serde_json::from_slice::<RunResult>(&b)?))
            {
                Ok(run) => run,
                Err(e) => {
                    tracing::warn!("Skipping unreadable result {:?}: {}", path, e);
                    continue;
                }
            };
            summaries.push(ResultSummary {
                file: path.to_string_lossy().to_string(),
                steps: run.step_logs.len(),
                passed: run.passed(),
                failed: run.failed(),
                test_name: run.test_name,
                timestamp: run.started_at,
                csv_used: run.data_source,
            });
        }

        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.file.cmp(&a.file)));
        Ok(summaries)
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Rows read from a headered CSV file.
#[derive(Debug, Clone)]
pub struct DataSource {
    path: PathBuf,
    rows: Vec<DataRow>,
}

impl DataSource {
    /// Read every record of `path`; empty cells are left out of the row.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open data file {}", path.display()))?;

        let headers = reader.headers()?.clone();
        let mut rows = Vec::new();
        for (position, record) in reader.records().enumerate() {
            let record = record.with_context(|| {
                format!("Bad record {} in {}", position + 1, path.display())
            })?;
            let fields: HashMap<String, String> = headers
                .iter()
                .zip(record.iter())
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            rows.push(DataRow::new(position, fields));
        }

        tracing::debug!("Loaded {} row(s) from {}", rows.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<DataRow> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Step, StepLog};
    use chrono::TimeZone;

    fn case(name: &str) -> TestCase {
        TestCase {
            name: name.into(),
            steps: vec![Step::Visit {
                url: "https://e.example/".into(),
                wait_seconds: 1.0,
            }],
        }
    }

    #[test]
    fn test_case_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TestCaseStore::new(dir.path().join("test_cases.json"));
        assert!(store.load().unwrap().is_empty());
        assert!(store.get("login").unwrap().is_none());
    }

    #[test]
    fn test_case_store_insert_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = TestCaseStore::new(dir.path().join("test_cases.json"));

        store.insert(case("login")).unwrap();
        store.insert(case("checkout")).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);
        assert_eq!(store.get("login").unwrap(), Some(case("login")));

        assert!(store.remove("login").unwrap());
        assert!(!store.remove("login").unwrap());
        assert_eq!(store.load().unwrap(), vec![case("checkout")]);
    }

    #[test]
    fn test_case_store_rejects_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = TestCaseStore::new(dir.path().join("test_cases.json"));
        store.insert(case("login")).unwrap();
        let err = store.insert(case("login")).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_case_store_reads_stored_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_cases.json");
        std::fs::write(
            &path,
            r##"[{"name": "login", "steps": [
                {"action": "visit", "url": "https://e.example/", "wait": 1},
                {"action": "input", "selector_type": "css_selector", "selector_value": "#email", "text": "{{LoginEmail}}", "wait": 1}
            ]}]"##,
        )
        .unwrap();

        let cases = TestCaseStore::new(&path).load().unwrap();
        assert_eq!(cases[0].steps.len(), 2);
        assert_eq!(cases[0].steps[1].action(), "input");
    }

    fn entry(time: &str, days: &[&str]) -> ScheduledTest {
        ScheduledTest {
            test_name: "login".into(),
            time: time.into(),
            days: days.iter().map(|d| d.to_string()).collect(),
            csv_path: None,
        }
    }

    #[test]
    fn test_schedule_store_add_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path().join("scheduled_tests.json"));

        store.add(entry("09:00", &["Monday", "Wednesday"])).unwrap();
        store.add(entry("18:30", &["Friday"])).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);

        let removed = store.remove(0).unwrap();
        assert_eq!(removed.time, "09:00");
        assert_eq!(store.load().unwrap()[0].time, "18:30");
        assert!(store.remove(5).is_err());
    }

    #[test]
    fn test_schedule_store_validates_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path().join("scheduled_tests.json"));
        assert!(store.add(entry("25:00", &["Monday"])).is_err());
        assert!(store.add(entry("09:00", &["Someday"])).is_err());
        assert!(store.add(entry("09:00", &[])).is_err());
        assert!(store.load().unwrap().is_empty());
    }

    fn run(name: &str, second: u32) -> RunResult {
        RunResult {
            test_name: name.into(),
            started_at: Local.with_ymd_and_hms(2026, 3, 1, 9, 0, second).unwrap(),
            step_logs: vec![StepLog {
                step: None,
                iteration: 1,
                actual_url: None,
                status: "Success".into(),
                passed: true,
                notifications: vec![],
                screenshot: None,
                login_email: None,
            }],
            data_source: None,
        }
    }

    #[tokio::test]
    async fn test_result_store_names_and_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("results"));

        let first = store.save(&run("login flow", 0)).await.unwrap();
        let second = store.save(&run("login flow", 0)).await.unwrap();

        assert!(first.ends_with("login_flow_20260301_090000.json"));
        assert!(second.ends_with("login_flow_20260301_090000_1.json"));
    }

    #[tokio::test]
    async fn test_result_store_concurrent_saves_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("results"));

        let a = store.clone();
        let b = store.clone();
        let (pa, pb) = tokio::join!(
            async move { a.save(&run("login", 0)).await.unwrap() },
            async move { b.save(&run("login", 0)).await.unwrap() }
        );
        assert_ne!(pa, pb);
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_result_stores_sharing_a_dir_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");

        for round in 0..20u32 {
            // Independent stores: no shared per-name lock
            let a = ResultStore::new(&results);
            let b = ResultStore::new(&results);
            let second = round % 60;
            let (pa, pb) = tokio::join!(
                tokio::spawn(async move { a.save(&run("login", second)).await.unwrap() }),
                tokio::spawn(async move { b.save(&run("login", second)).await.unwrap() })
            );
            assert_ne!(pa.unwrap(), pb.unwrap(), "round {}", round);
        }

        assert_eq!(ResultStore::new(&results).list().unwrap().len(), 40);
    }

    #[tokio::test]
    async fn test_result_store_lists_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("results"));
        store.save(&run("a", 1)).await.unwrap();
        store.save(&run("b", 5)).await.unwrap();
        std::fs::write(dir.path().join("results").join("junk.json"), "nope").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].test_name, "b");
        assert_eq!(listed[0].passed, 1);
        assert_eq!(listed[0].failed, 0);
    }

    #[test]
    fn test_data_source_reads_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");
        std::fs::write(
            &path,
            "LoginEmail , Password\na@x.io,pw1\n,pw2\n",
        )
        .unwrap();

        let source = DataSource::from_csv(&path).unwrap();
        let rows = source.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].identity(), Some("a@x.io"));
        assert_eq!(rows[0].get("Password"), Some("pw1"));
        assert_eq!(rows[1].identity(), None);
        assert_eq!(rows[1].label(), "Row 2");
    }

    #[test]
    fn test_data_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DataSource::from_csv(dir.path().join("missing.csv")).is_err());
    }
}
