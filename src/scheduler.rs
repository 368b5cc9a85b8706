//! Background trigger for scheduled test runs.

use anyhow::{Context, Result};
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, Weekday};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::browser::SessionProvider;
use crate::models::ScheduledTest;
use crate::runner::TestRunner;
use crate::store::ScheduleStore;

pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Parse "HH:MM" or "HH:MM:SS".
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .with_context(|| format!("Invalid time of day '{}', expected HH:MM", value))
}

/// Parse a weekday name, full or abbreviated, any case.
pub fn parse_weekday(value: &str) -> Result<Weekday> {
    value
        .trim()
        .parse::<Weekday>()
        .map_err(|_| anyhow::anyhow!("Invalid weekday '{}'", value))
}

/// First firing of `entry` strictly after `after`, within the next week.
pub fn next_run(entry: &ScheduledTest, after: NaiveDateTime) -> Result<Option<NaiveDateTime>> {
    let time = parse_time_of_day(&entry.time)?;
    let days = entry
        .days
        .iter()
        .map(|d| parse_weekday(d))
        .collect::<Result<Vec<_>>>()?;

    for offset in 0..=7 {
        let date = after.date() + ChronoDuration::days(offset);
        if !days.contains(&date.weekday()) {
            continue;
        }
        let candidate = date.and_time(time);
        if candidate > after {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

fn entry_key(entry: &ScheduledTest) -> String {
    format!(
        "{}|{}|{}|{}",
        entry.test_name,
        entry.time,
        entry.days.join(","),
        entry.csv_path.as_deref().unwrap_or("")
    )
}

/// Decides which entries are due. An entry first seen after its time of day
/// waits for its next occurrence.
#[derive(Debug, Default)]
pub struct DueTracker {
    next: HashMap<String, NaiveDateTime>,
}

impl DueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries due at `now`, in schedule order.
    pub fn due(&mut self, entries: &[ScheduledTest], now: NaiveDateTime) -> Vec<ScheduledTest> {
        let mut due = Vec::new();
        let mut seen = HashMap::new();

        for entry in entries {
            let key = entry_key(entry);
            let scheduled = match self.next.get(&key) {
                Some(at) => Some(*at),
                None => match next_run(entry, now) {
                    Ok(at) => at,
                    Err(e) => {
                        tracing::warn!("Ignoring schedule for '{}': {}", entry.test_name, e);
                        None
                    }
                },
            };
            let Some(at) = scheduled else {
                continue;
            };

            if now >= at {
                due.push(entry.clone());
                match next_run(entry, now) {
                    Ok(Some(next)) => {
                        seen.insert(key, next);
                    }
                    Ok(None) | Err(_) => {}
                }
            } else {
                seen.insert(key, at);
            }
        }

        // Entries no longer in the store are forgotten
        self.next = seen;
        due
    }
}

/// Source of the local wall-clock time.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Periodically runs scheduled tests on the calling task.
pub struct Scheduler<P> {
    runner: Arc<TestRunner<P>>,
    schedules: ScheduleStore,
    tick: Duration,
    clock: Clock,
}

impl<P: SessionProvider> Scheduler<P> {
    pub fn new(runner: Arc<TestRunner<P>>, schedules: ScheduleStore, tick: Duration) -> Self {
        Self {
            runner,
            schedules,
            tick,
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    /// Replace the wall clock consulted on each tick.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Tick until `cancel` fires. Scheduled runs execute one at a time and
    /// their failures are logged, never returned.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tracker = DueTracker::new();

        tracing::info!("Scheduler started (tick {:?})", self.tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let entries = match self.schedules.load() {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!("Failed to load schedules: {:#}", e);
                    continue;
                }
            };

            for entry in tracker.due(&entries, (self.clock)()) {
                if cancel.is_cancelled() {
                    break;
                }
                match self
                    .runner
                    .run_scheduled_test(&entry.test_name, entry.csv_path.as_deref())
                    .await
                {
                    Ok(result) => tracing::info!(
                        "Scheduled run of '{}' done: {} passed, {} failed",
                        result.test_name,
                        result.passed(),
                        result.failed()
                    ),
                    Err(e) => tracing::error!(
                        "Scheduled run of '{}' failed: {:#}",
                        entry.test_name,
                        e
                    ),
                }
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::{MockPage, MockProvider};
    use crate::executor::{ExecutorConfig, StepExecutor};
    use crate::models::{Step, TestCase};
    use crate::screenshot::ScreenshotStore;
    use crate::store::{ResultStore, TestCaseStore};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // 2026-03-02 is a Monday
    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
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
    fn test_parse_time_of_day_formats() {
        assert_eq!(
            parse_time_of_day("09:30").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert_eq!(
            parse_time_of_day("09:30:15").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 15).unwrap()
        );
        assert!(parse_time_of_day("9.30").is_err());
    }

    #[test]
    fn test_parse_weekday_names() {
        assert_eq!(parse_weekday("Monday").unwrap(), Weekday::Mon);
        assert_eq!(parse_weekday("fri").unwrap(), Weekday::Fri);
        assert!(parse_weekday("Funday").is_err());
    }

    #[test]
    fn test_next_run_skips_other_weekdays() {
        let e = entry("09:00", &["Wednesday"]);
        assert_eq!(next_run(&e, at(2, 10, 0)).unwrap(), Some(at(4, 9, 0)));
    }

    #[test]
    fn test_next_run_same_day_later() {
        let e = entry("09:00", &["Monday"]);
        assert_eq!(next_run(&e, at(2, 8, 0)).unwrap(), Some(at(2, 9, 0)));
        assert_eq!(next_run(&e, at(2, 9, 0)).unwrap(), Some(at(9, 9, 0)));
    }

    #[test]
    fn test_due_fires_once_per_day() {
        let entries = vec![entry("09:00", &["Monday", "Tuesday"])];
        let mut tracker = DueTracker::new();

        assert!(tracker.due(&entries, at(2, 8, 59)).is_empty());
        assert_eq!(tracker.due(&entries, at(2, 9, 0)).len(), 1);
        assert!(tracker.due(&entries, at(2, 9, 1)).is_empty());
        assert!(tracker.due(&entries, at(2, 23, 0)).is_empty());
        assert_eq!(tracker.due(&entries, at(3, 9, 0)).len(), 1);
    }

    #[test]
    fn test_due_not_retroactive_when_first_seen_late() {
        let entries = vec![entry("09:00", &["Monday"])];
        let mut tracker = DueTracker::new();

        assert!(tracker.due(&entries, at(2, 12, 0)).is_empty());
        assert!(tracker.due(&entries, at(2, 13, 0)).is_empty());
        assert_eq!(tracker.due(&entries, at(9, 9, 0)).len(), 1);
    }

    #[test]
    fn test_invalid_entry_is_ignored() {
        let entries = vec![entry("nope", &["Monday"]), entry("09:00", &["Monday"])];
        let mut tracker = DueTracker::new();
        tracker.due(&entries, at(2, 8, 0));
        assert_eq!(tracker.due(&entries, at(2, 9, 0)).len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_runs_due_entry_once() {
        let dir = tempfile::tempdir().unwrap();
        let cases = TestCaseStore::new(dir.path().join("test_cases.json"));
        cases
            .insert(TestCase {
                name: "login".into(),
                steps: vec![Step::Scroll {
                    x: 0,
                    y: 10,
                    wait_seconds: 0.0,
                }],
            })
            .unwrap();
        let runner = Arc::new(TestRunner::new(
            MockProvider::new(MockPage::new()),
            StepExecutor::new(ExecutorConfig::without_delays(), ScreenshotStore::disabled()),
            cases,
            ResultStore::new(dir.path().join("results")),
        ));
        let schedules = ScheduleStore::new(dir.path().join("scheduled_tests.json"));
        schedules.add(entry("09:00", &["Monday"])).unwrap();

        // First tick lands just before 09:00, every later one at 09:00
        let ticks = Arc::new(AtomicUsize::new(0));
        let clock_ticks = Arc::clone(&ticks);
        let scheduler = Scheduler::new(Arc::clone(&runner), schedules, Duration::from_millis(10))
            .with_clock(move || {
                if clock_ticks.fetch_add(1, Ordering::SeqCst) == 0 {
                    at(2, 8, 59)
                } else {
                    at(2, 9, 0)
                }
            });

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));
        for _ in 0..500 {
            if ticks.load(Ordering::SeqCst) >= 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 5);
        let stored = runner.results().list().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].test_name, "login");
        assert_eq!(stored[0].passed, 1);
    }
}
