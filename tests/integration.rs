//! Integration tests for webtest-gateway
//!
//! Note: Runs against real Chrome are not exercised here. These tests cover
//! CLI parsing and whole runs over the in-memory browser.

use fgp_webtest::browser::mock::{ClickEffect, MockElement, MockPage, MockProvider};
use fgp_webtest::browser::Query;
use fgp_webtest::screenshot::ScreenshotStore;
use fgp_webtest::store::{DataSource, ResultStore, TestCaseStore};
use fgp_webtest::{
    run_test_case, ExecutorConfig, RunOptions, RunResult, Selector, Step, StepExecutor, StepLog,
    TestCase, TestRunner,
};
use futures::StreamExt;
use std::process::Command;

/// Test that the binary can show help
#[test]
fn test_help_command() {
    let output = Command::new("cargo")
        .args(["run", "--", "--help"])
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("webtest-gateway") || stdout.contains("browser tests"),
        "Help should mention webtest-gateway"
    );
}

/// Test that version command works
#[test]
fn test_version_command() {
    let output = Command::new("cargo")
        .args(["run", "--", "--version"])
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("0.") || stdout.contains("webtest-gateway"),
        "Version should be shown"
    );
}

/// Test that selector suggestions work without a daemon
#[test]
fn test_identify_command() {
    let output = Command::new("cargo")
        .args(["run", "--", "--json", "identify", r#"<input id="q" class="search box">"#])
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#""id":"q""#), "unexpected output: {}", stdout);
    assert!(stdout.contains(r#""css_selector":".search.box""#));
}

fn signup_page() -> MockPage {
    MockPage::new()
        .element(MockElement::new("email").matching(Query::xpath("//*[@placeholder='Email']")))
        .element(MockElement::new("plan").matching(Query::css("#plan")))
        .element(
            MockElement::new("pro")
                .matching(Query::css("li.el-dropdown-menu__item"))
                .with_text("Pro"),
        )
        .element(
            MockElement::new("submit")
                .matching(Query::css("button[type=submit]"))
                .on_click(ClickEffect::Reveal("toast".into()))
                .on_click(ClickEffect::AppendContent("<h1>Welcome aboard</h1>".into())),
        )
        .element(MockElement::notification("toast", "Signup successful").absent())
        .element(MockElement::dismiss_button("close", "toast"))
}

fn signup_case() -> TestCase {
    serde_json::from_value(serde_json::json!({
        "name": "signup",
        "steps": [
            {"action": "visit", "url": "https://e.example/signup", "wait": 0},
            {"action": "input", "selector_type": "placeholder", "selector_value": "Email", "text": "{{LoginEmail}}", "wait": 0},
            {"action": "select_dropdown", "selector_type": "css_selector", "selector_value": "#plan", "text": "{{Plan}}", "wait": 0},
            {"action": "click", "selector_type": "css_selector", "selector_value": "button[type=submit]", "wait": 0},
            {"action": "assert", "text": "Welcome", "wait": 0}
        ]
    }))
    .expect("valid test case")
}

fn quiet_executor() -> StepExecutor {
    StepExecutor::new(ExecutorConfig::without_delays(), ScreenshotStore::disabled())
}

#[tokio::test]
async fn test_data_driven_run_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("users.csv");
    std::fs::write(&csv, "LoginEmail,Plan\nann@x.io,Pro\nbob@x.io,Enterprise\n").unwrap();

    let provider = MockProvider::new(signup_page());
    let executor = quiet_executor();
    let case = signup_case();
    let options = RunOptions::default().with_data_source(DataSource::from_csv(&csv).unwrap());

    let logs: Vec<StepLog> = run_test_case(&provider, &case, options, &executor)
        .collect()
        .await;

    assert_eq!(logs.len(), 10);
    let statuses: Vec<&str> = logs.iter().map(|l| l.status.as_str()).collect();
    assert_eq!(
        statuses,
        vec![
            "Success",
            "Input 'ann@x.io'",
            "Selected 'Pro'",
            "Success",
            "Success",
            "Success",
            "Input 'bob@x.io'",
            "Dropdown item not found",
            "Success",
            "Success",
        ]
    );
    assert_eq!(logs[3].notifications, vec!["Signup successful".to_string()]);
    assert!(logs[..5].iter().all(|l| l.login_email.as_deref() == Some("ann@x.io")));
    assert!(logs[5..].iter().all(|l| l.login_email.as_deref() == Some("bob@x.io")));
}

#[tokio::test]
async fn test_step_logs_serialize_flat() {
    let provider = MockProvider::new(signup_page());
    let executor = quiet_executor();
    let case = TestCase {
        name: "visit".into(),
        steps: vec![Step::Click {
            selector: Selector::css("#plan").nth(0),
            wait_seconds: 0.0,
        }],
    };

    let logs: Vec<StepLog> = run_test_case(&provider, &case, RunOptions::default(), &executor)
        .collect()
        .await;
    let value = serde_json::to_value(&logs[0]).unwrap();

    assert_eq!(value["action"], "click");
    assert_eq!(value["selector_type"], "css_selector");
    assert_eq!(value["selector_value"], "#plan");
    assert_eq!(value["status"], "Clicked");
    assert_eq!(value["iteration"], 1);
}

#[tokio::test]
async fn test_saved_result_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let cases = TestCaseStore::new(dir.path().join("test_cases.json"));
    cases.insert(signup_case()).unwrap();

    let runner = TestRunner::new(
        MockProvider::new(signup_page()),
        quiet_executor(),
        cases,
        ResultStore::new(dir.path().join("results")),
    );
    let result = runner.run_scheduled_test("signup", None).await.unwrap();

    let stored = runner.results().list().unwrap();
    assert_eq!(stored.len(), 1);
    let raw = std::fs::read(&stored[0].file).unwrap();
    let read_back: RunResult = serde_json::from_slice(&raw).unwrap();
    assert_eq!(read_back.step_logs, result.step_logs);
    assert_eq!(read_back.test_name, "signup");
}
