//! Data models for recorded browser tests.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Row field that identifies an iteration in logs and results.
pub const IDENTITY_FIELD: &str = "LoginEmail";

/// How a selector locates an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorKind {
    #[serde(rename = "id")]
    Id,
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "xpath")]
    XPath,
    #[serde(rename = "css_selector", alias = "css")]
    Css,
    #[serde(rename = "class_name", alias = "class")]
    Class,
    #[serde(rename = "tag_name", alias = "tag")]
    Tag,
    #[serde(rename = "link_text", alias = "linkText")]
    LinkText,
    #[serde(rename = "partial_link_text", alias = "partialLinkText")]
    PartialLinkText,
    #[serde(rename = "placeholder")]
    Placeholder,
}

impl SelectorKind {
    /// Stored name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorKind::Id => "id",
            SelectorKind::Name => "name",
            SelectorKind::XPath => "xpath",
            SelectorKind::Css => "css_selector",
            SelectorKind::Class => "class_name",
            SelectorKind::Tag => "tag_name",
            SelectorKind::LinkText => "link_text",
            SelectorKind::PartialLinkText => "partial_link_text",
            SelectorKind::Placeholder => "placeholder",
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed description of how to locate a page element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    #[serde(rename = "selector_type")]
    pub kind: SelectorKind,
    #[serde(rename = "selector_value")]
    pub value: String,
    /// Zero-based occurrence when several elements match.
    #[serde(default)]
    pub index: usize,
}

impl Selector {
    pub fn new(kind: SelectorKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            index: 0,
        }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self::new(SelectorKind::Css, value)
    }

    pub fn nth(mut self, index: usize) -> Self {
        self.index = index;
        self
    }
}

/// One atomic browser action.
///
/// Steps are immutable once stored in a test case; execution produces
/// [`StepLog`]s and never rewrites the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Visit {
        url: String,
        #[serde(rename = "wait", default)]
        wait_seconds: f64,
    },
    Click {
        #[serde(flatten)]
        selector: Selector,
        #[serde(rename = "wait", default)]
        wait_seconds: f64,
    },
    Input {
        #[serde(flatten)]
        selector: Selector,
        text: String,
        #[serde(rename = "wait", default)]
        wait_seconds: f64,
    },
    Assert {
        text: String,
        #[serde(rename = "wait", default)]
        wait_seconds: f64,
    },
    SelectDropdown {
        #[serde(flatten)]
        selector: Selector,
        text: String,
        #[serde(rename = "wait", default)]
        wait_seconds: f64,
    },
    Scroll {
        #[serde(default)]
        x: i64,
        #[serde(default)]
        y: i64,
        #[serde(rename = "wait", default)]
        wait_seconds: f64,
    },
}

impl Step {
    /// Action name as stored and logged.
    pub fn action(&self) -> &'static str {
        match self {
            Step::Visit { .. } => "visit",
            Step::Click { .. } => "click",
            Step::Input { .. } => "input",
            Step::Assert { .. } => "assert",
            Step::SelectDropdown { .. } => "select_dropdown",
            Step::Scroll { .. } => "scroll",
        }
    }

    /// Post-step delay in seconds.
    pub fn wait_seconds(&self) -> f64 {
        match self {
            Step::Visit { wait_seconds, .. }
            | Step::Click { wait_seconds, .. }
            | Step::Input { wait_seconds, .. }
            | Step::Assert { wait_seconds, .. }
            | Step::SelectDropdown { wait_seconds, .. }
            | Step::Scroll { wait_seconds, .. } => *wait_seconds,
        }
    }

    pub fn selector(&self) -> Option<&Selector> {
        match self {
            Step::Click { selector, .. }
            | Step::Input { selector, .. }
            | Step::SelectDropdown { selector, .. } => Some(selector),
            _ => None,
        }
    }
}

/// A named, ordered sequence of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub steps: Vec<Step>,
}

/// One row of external test data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    /// Zero-based position in the data source.
    #[serde(default)]
    pub position: usize,
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

impl DataRow {
    pub fn new(position: usize, fields: HashMap<String, String>) -> Self {
        Self { position, fields }
    }

    /// Non-empty value of a field.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value of the identifying field, if the row carries one.
    pub fn identity(&self) -> Option<&str> {
        self.get(IDENTITY_FIELD)
    }

    /// Label used in logs: the identity, or "Row N".
    pub fn label(&self) -> String {
        self.identity()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Row {}", self.position + 1))
    }
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLog {
    /// Echo of the executed step; absent when the session never opened.
    #[serde(flatten)]
    pub step: Option<Step>,
    /// One-based iteration the step ran in.
    #[serde(default)]
    pub iteration: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_url: Option<String>,
    pub status: String,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub notifications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(
        rename = "LoginEmail",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub login_email: Option<String>,
}

impl StepLog {
    /// Whether this log terminated its iteration early.
    pub fn is_terminal_failure(&self) -> bool {
        self.status.starts_with(crate::status::ERROR_PREFIX)
    }
}

/// Aggregated logs of one orchestrated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub test_name: String,
    #[serde(rename = "timestamp")]
    pub started_at: DateTime<Local>,
    #[serde(rename = "logs")]
    pub step_logs: Vec<StepLog>,
    #[serde(rename = "csv_used", default)]
    pub data_source: Option<String>,
}

impl RunResult {
    pub fn passed(&self) -> usize {
        self.step_logs.iter().filter(|l| l.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.step_logs.len() - self.passed()
    }
}

/// A recurring trigger for a stored test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTest {
    pub test_name: String,
    /// Time of day, "HH:MM" or "HH:MM:SS".
    pub time: String,
    /// Weekday names ("Monday", "tue", ...).
    pub days: Vec<String>,
    #[serde(default)]
    pub csv_path: Option<String>,
}
