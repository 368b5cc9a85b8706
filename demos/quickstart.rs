//! Webtest Gateway Quickstart Example
//!
//! Stores a small test case in the daemon, runs it and lists the results.
//!
//! # Prerequisites
//! - Chrome/Chromium installed
//! - webtest-gateway daemon running: `webtest-gateway start`
//!
//! # Running
//! ```bash
//! cargo run --example quickstart
//! ```

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;

use fgp_webtest::config::Settings;

fn call(settings: &Settings, method: &str, params: Value) -> Result<Value> {
    let mut stream = UnixStream::connect(settings.socket_path())
        .context("Failed to connect to daemon. Is it running? Try: webtest-gateway start")?;

    let request = json!({"id": "1", "v": 1, "method": method, "params": params});
    writeln!(stream, "{}", request)?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader.read_line(&mut response)?;

    Ok(serde_json::from_str(&response)?)
}

fn main() -> Result<()> {
    let settings = Settings::default();

    println!("FGP Webtest Gateway Quickstart");
    println!("==============================\n");

    // Step 1: Store a test case
    println!("1. Saving test case 'example-home'...");
    let response = call(
        &settings,
        "webtest.cases.save",
        json!({
            "name": "example-home",
            "steps": [
                {"action": "visit", "url": "https://example.com/", "wait": 1},
                {"action": "assert", "text": "Example Domain", "wait": 0},
                {"action": "click", "selector_type": "link_text", "selector_value": "More information...", "wait": 1}
            ]
        }),
    )?;
    println!("   Response: {}\n", response);

    // Step 2: Run it
    println!("2. Running 'example-home'...");
    let response = call(&settings, "webtest.run", json!({"name": "example-home"}))?;
    if let Some(logs) = response["result"]["logs"].as_array() {
        for log in logs {
            println!("   {:<8} {}", log["action"].as_str().unwrap_or("-"), log["status"]);
        }
    }
    println!();

    // Step 3: List stored results
    println!("3. Listing results...");
    let response = call(&settings, "webtest.results.list", json!({}))?;
    println!("   Results: {}\n", response["result"]);

    println!("Done! The webtest daemon is working correctly.");
    println!("\nTry more commands:");
    println!("  webtest-gateway record-start https://example.com");
    println!("  webtest-gateway record-stop --name my-test");
    println!("  webtest-gateway schedule-add my-test --time 09:00 --days Monday,Friday");

    Ok(())
}
