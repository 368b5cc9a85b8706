//! FGP Webtest Gateway - recorded browser tests via CDP.

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use fgp_daemon::{cleanup_socket, FgpServer};
use futures::StreamExt;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use fgp_webtest::browser::ChromeProvider;
use fgp_webtest::config::{init_tracing, Settings, DEFAULT_HOME};
use fgp_webtest::screenshot::ScreenshotStore;
use fgp_webtest::selector::identify_selectors;
use fgp_webtest::service::WebTestService;
use fgp_webtest::store::{DataSource, ResultStore, TestCaseStore};
use fgp_webtest::{ExecutorConfig, RunOptions, RunResult, Step, StepExecutor, StepLog, TestRunner};

#[derive(Parser)]
#[command(name = "webtest-gateway")]
#[command(about = "FGP daemon for recorded, data-driven browser tests via Chrome DevTools Protocol")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output JSON (for agent consumption)
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding test cases, schedules, results and the socket
    #[arg(long, global = true, env = "WEBTEST_HOME", default_value = DEFAULT_HOME)]
    home: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webtest daemon (runs the scheduler)
    Start {
        /// Run in foreground
        #[arg(short, long)]
        foreground: bool,

        /// Run test browsers in headed mode (visible)
        #[arg(long)]
        headed: bool,
    },

    /// Stop the webtest daemon
    Stop,

    /// Check daemon status
    Status,

    /// Run a stored test case locally, printing each step as it completes
    Run {
        /// Test case name
        name: String,
        /// Repetitions (per CSV row when --csv is given)
        #[arg(short, long, default_value = "1")]
        iterations: usize,
        /// CSV data file; one iteration per row
        #[arg(long)]
        csv: Option<String>,
        /// Show the browser
        #[arg(long)]
        headed: bool,
        /// Skip step screenshots
        #[arg(long)]
        no_screenshots: bool,
    },

    /// List stored test cases
    Cases,

    /// Start recording interactions in a visible browser
    RecordStart {
        /// Page to start recording on
        url: String,
    },

    /// Stop recording; save the steps when a name is given
    RecordStop {
        /// Save the recording as a test case with this name
        #[arg(long)]
        name: Option<String>,
    },

    /// Schedule a test case
    ScheduleAdd {
        /// Test case name
        name: String,
        /// Time of day (HH:MM)
        #[arg(long)]
        time: String,
        /// Weekdays (e.g. Monday,Wednesday)
        #[arg(long, value_delimiter = ',', required = true)]
        days: Vec<String>,
        /// CSV data file for the scheduled runs
        #[arg(long)]
        csv: Option<String>,
    },

    /// List scheduled tests
    Schedules,

    /// Remove a scheduled test by index
    ScheduleRemove { index: usize },

    /// List stored run results
    Results,

    /// Suggest selectors for an HTML element snippet
    Identify {
        /// Element markup, e.g. '<input id="email" placeholder="Email">'
        html: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::new(&cli.home);

    match cli.command {
        Commands::Start { foreground, headed } => cmd_start(&settings, foreground, !headed),
        Commands::Stop => cmd_stop(&settings),
        Commands::Status => cmd_status(&settings),
        Commands::Run {
            name,
            iterations,
            csv,
            headed,
            no_screenshots,
        } => cmd_run(&settings, &name, iterations, csv, !headed, no_screenshots, cli.json),
        Commands::Cases => {
            cmd_call_daemon(&settings, "webtest.cases.list", serde_json::json!({}), cli.json)
        }
        Commands::RecordStart { url } => cmd_call_daemon(
            &settings,
            "webtest.record.start",
            serde_json::json!({"url": url}),
            cli.json,
        ),
        Commands::RecordStop { name } => cmd_call_daemon(
            &settings,
            "webtest.record.stop",
            serde_json::json!({"name": name}),
            cli.json,
        ),
        Commands::ScheduleAdd {
            name,
            time,
            days,
            csv,
        } => cmd_call_daemon(
            &settings,
            "webtest.schedule.add",
            serde_json::json!({"name": name, "time": time, "days": days, "csv_path": csv}),
            cli.json,
        ),
        Commands::Schedules => {
            cmd_call_daemon(&settings, "webtest.schedule.list", serde_json::json!({}), cli.json)
        }
        Commands::ScheduleRemove { index } => cmd_call_daemon(
            &settings,
            "webtest.schedule.remove",
            serde_json::json!({"index": index}),
            cli.json,
        ),
        Commands::Results => {
            cmd_call_daemon(&settings, "webtest.results.list", serde_json::json!({}), cli.json)
        }
        Commands::Identify { html } => cmd_identify(&html, cli.json),
    }
}

fn cmd_identify(html: &str, json_output: bool) -> Result<()> {
    let suggested = identify_selectors(html).context("No HTML element found")?;
    if json_output {
        println!("{}", serde_json::to_string(&suggested)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&suggested)?);
    }
    Ok(())
}

fn serve(settings: &Settings, headless: bool) -> Result<()> {
    init_tracing();

    let socket_path = settings.socket_path().to_string_lossy().to_string();
    let service =
        WebTestService::new(settings, headless).context("Failed to create WebTestService")?;
    let server = FgpServer::new(service, &socket_path).context("Failed to create FGP server")?;
    server.serve().context("Server error")?;
    Ok(())
}

fn cmd_start(settings: &Settings, foreground: bool, headless: bool) -> Result<()> {
    settings.ensure_dirs()?;
    let socket_path = settings.socket_path();
    let pid_file = settings.pid_file();

    println!("Starting webtest-gateway daemon...");
    println!("Socket: {}", socket_path.display());
    println!("Mode: {}", if headless { "headless" } else { "headed" });

    if foreground {
        serve(settings, headless)?;
    } else {
        use daemonize::Daemonize;

        let daemonize = Daemonize::new()
            .pid_file(&pid_file)
            .working_directory("/tmp");

        match daemonize.start() {
            Ok(_) => serve(settings, headless)?,
            Err(e) => {
                eprintln!("Failed to daemonize: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn cmd_stop(settings: &Settings) -> Result<()> {
    let socket_path = settings.socket_path().to_string_lossy().to_string();
    let pid_file = settings.pid_file();

    let pid_str = std::fs::read_to_string(&pid_file)
        .context("Failed to read PID file - daemon may not be running")?;
    let pid: i32 = pid_str.trim().parse().context("Invalid PID in file")?;

    println!("Stopping webtest-gateway daemon (PID: {})...", pid);

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    std::thread::sleep(std::time::Duration::from_millis(500));

    let _ = cleanup_socket(&socket_path, Some(Path::new(&pid_file)));
    let _ = std::fs::remove_file(&pid_file);

    println!("Daemon stopped.");
    Ok(())
}

fn cmd_status(settings: &Settings) -> Result<()> {
    let socket_path = settings.socket_path();

    if !socket_path.exists() {
        println!("Status: NOT RUNNING");
        println!("Socket {} does not exist", socket_path.display());
        return Ok(());
    }

    match UnixStream::connect(&socket_path) {
        Ok(mut stream) => {
            let request = r#"{"id":"status","v":1,"method":"health","params":{}}"#;
            writeln!(stream, "{}", request)?;
            stream.flush()?;

            let mut reader = BufReader::new(stream);
            let mut response = String::new();
            reader.read_line(&mut response)?;

            println!("Status: RUNNING");
            println!("Socket: {}", socket_path.display());
            println!("Health: {}", response.trim());
        }
        Err(e) => {
            println!("Status: NOT RESPONDING");
            println!("Socket exists but connection failed: {}", e);
        }
    }

    Ok(())
}

fn print_log(log: &StepLog, json_output: bool) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string(log)?);
        return Ok(());
    }

    let mark = if log.passed { "ok  " } else { "FAIL" };
    let who = log
        .login_email
        .as_deref()
        .map(|e| format!(" [{}]", e))
        .unwrap_or_default();
    let action = log.step.as_ref().map(Step::action).unwrap_or("session");
    println!("{} #{}{} {:<16} {}", mark, log.iteration, who, action, log.status);
    for note in &log.notifications {
        println!("       notification: {}", note);
    }
    Ok(())
}

fn cmd_run(
    settings: &Settings,
    name: &str,
    iterations: usize,
    csv: Option<String>,
    headless: bool,
    no_screenshots: bool,
    json_output: bool,
) -> Result<()> {
    init_tracing();
    settings.ensure_dirs()?;

    let screenshots = if no_screenshots {
        ScreenshotStore::disabled()
    } else {
        ScreenshotStore::new(settings.screenshots_dir())
    };
    let runner = TestRunner::new(
        ChromeProvider,
        StepExecutor::new(ExecutorConfig::default(), screenshots),
        TestCaseStore::new(settings.test_cases_file()),
        ResultStore::new(settings.results_dir()),
    );

    let case = runner
        .cases()
        .get(name)?
        .with_context(|| format!("Test case '{}' not found", name))?;

    let cancel = CancellationToken::new();
    let mut options = RunOptions {
        headless,
        iterations,
        cancel: cancel.clone(),
        ..RunOptions::default()
    };
    if let Some(path) = csv {
        options = options.with_data_source(DataSource::from_csv(shellexpand::tilde(&path).into_owned())?);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let result = runtime.block_on(async {
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Cancelling run...");
                    cancel.cancel();
                }
            }
        });

        let started_at = Local::now();
        let data_source = options.data_source.clone();
        let mut step_logs = Vec::new();
        let mut stream = runner.run(&case, options);
        while let Some(log) = stream.next().await {
            print_log(&log, json_output)?;
            step_logs.push(log);
        }
        drop(stream);

        let result = RunResult {
            test_name: case.name.clone(),
            started_at,
            step_logs,
            data_source,
        };
        let path = runner.results().save(&result).await?;
        Ok::<_, anyhow::Error>((result, path))
    });
    let (result, path) = result?;

    if !json_output {
        println!(
            "\n{}: {} passed, {} failed. Result saved to {}",
            result.test_name,
            result.passed(),
            result.failed(),
            path.display()
        );
    }
    Ok(())
}

fn cmd_call_daemon(
    settings: &Settings,
    method: &str,
    params: serde_json::Value,
    json_output: bool,
) -> Result<()> {
    let socket_path = settings.socket_path();

    let mut stream = UnixStream::connect(&socket_path)
        .context("Failed to connect to daemon. Is it running? Try: webtest-gateway start")?;

    let request = serde_json::json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "v": 1,
        "method": method,
        "params": params,
    });

    writeln!(stream, "{}", request)?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader.read_line(&mut response)?;

    if json_output {
        println!("{}", response.trim());
    } else {
        // Pretty print for humans
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&response) {
            if let Some(result) = parsed.get("result") {
                println!("{}", serde_json::to_string_pretty(result)?);
            } else if let Some(error) = parsed.get("error") {
                eprintln!("Error: {}", error);
                std::process::exit(1);
            } else {
                println!("{}", serde_json::to_string_pretty(&parsed)?);
            }
        } else {
            println!("{}", response.trim());
        }
    }

    Ok(())
}
