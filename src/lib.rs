//! FGP Webtest - recorded, data-driven browser tests over Chrome DevTools.
//!
//! Test cases are ordered steps (visit, click, input, assert, dropdown
//! selection, scroll) executed against a fresh browser session per
//! iteration, optionally once per row of a CSV data file. Each executed step
//! yields a [`models::StepLog`]; a run collects them into a
//! [`models::RunResult`].

pub mod browser;
pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod notification;
pub mod recording;
pub mod runner;
pub mod scheduler;
pub mod screenshot;
pub mod selector;
pub mod service;
pub mod status;
pub mod store;
pub mod template;

pub use error::StepError;
pub use executor::{ExecutorConfig, StepExecutor};
pub use models::{DataRow, RunResult, ScheduledTest, Selector, SelectorKind, Step, StepLog, TestCase};
pub use runner::{run_test_case, run_to_result, RunOptions, TestRunner};
pub use status::StepStatus;
