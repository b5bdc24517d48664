//! stepchain CLI - data-driven browser test execution tool.

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use std::time::Instant;
use stepchain::report::{print_report, save_report};
use stepchain::{
    DefaultTestRunner, JsonScriptParser, RemoteWebDriverFactory, ReportFormat, ReportListener,
    ScriptConfigManager, Settings, TestCase, TestRunListener, TestRunner,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_SETTINGS: &str = "stepchain.yaml";

/// stepchain - run browser automation scripts, suites and data-driven chains.
#[derive(Parser, Debug)]
#[command(name = "stepchain", version, about)]
struct Cli {
    /// Script file or directory path.
    #[arg(short = 'p', long = "path")]
    script_path: Option<String>,

    /// Settings file (defaults to ./stepchain.yaml when present).
    #[arg(short = 's', long = "settings")]
    settings: Option<PathBuf>,

    /// Filter scripts by name (partial match).
    #[arg(short = 'f', long = "filter")]
    filter: Option<String>,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Maximum wait of wait steps, in milliseconds.
    #[arg(short = 't', long = "max-wait")]
    max_wait_ms: Option<u64>,

    /// Directory to save test report files.
    #[arg(short = 'r', long = "report-dir")]
    report_dir: Option<PathBuf>,

    /// Report output format.
    #[arg(long = "report-format")]
    report_format: Option<ReportFormat>,

    /// Browser name requested from the WebDriver server.
    #[arg(short = 'b', long = "browser")]
    browser: Option<String>,

    /// WebDriver server URL.
    #[arg(long = "webdriver-url", env = "STEPCHAIN_WEBDRIVER_URL")]
    webdriver_url: Option<String>,

    /// Directory data source files are looked up in.
    #[arg(long = "data-source-dir")]
    data_source_dir: Option<PathBuf>,
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None if Path::new(DEFAULT_SETTINGS).exists() => Settings::load(DEFAULT_SETTINGS)?,
        None => Settings::default(),
    };

    if let Some(browser) = &cli.browser {
        settings.browser = browser.clone();
    }
    if let Some(url) = &cli.webdriver_url {
        settings.driver_config.insert("url".to_string(), url.clone());
    }
    if let Some(ms) = cli.max_wait_ms {
        settings.max_wait_ms = ms;
    }
    if let Some(dir) = &cli.data_source_dir {
        settings.data_source_dir = dir.clone();
    }
    if let Some(dir) = &cli.report_dir {
        settings.result_dir = dir.clone();
    }
    if let Some(format) = cli.report_format {
        settings.report_format = format;
    }
    Ok(settings)
}

fn prepare_scripts(manager: &mut ScriptConfigManager, script_path: Option<&str>) -> Result<Vec<TestCase>> {
    let cases = match script_path {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(anyhow!("Path does not exist: {}", path.display()));
            }
            if path.is_file() {
                vec![manager.load_script(&path)?]
            } else {
                manager.load_scripts_from_dir(&path).context(format!(
                    "Failed to load scripts from directory: {}",
                    path.display()
                ))?
            }
        }
        None => {
            for dir in ["tests/scripts", "scripts"] {
                if Path::new(dir).exists() {
                    manager.add_path(dir);
                }
            }
            manager.load_all_scripts()?
        }
    };

    if cases.is_empty() {
        return Err(anyhow!("No scripts found"));
    }
    Ok(cases)
}

fn run_all(runner: &DefaultTestRunner, cases: Vec<TestCase>, filter: Option<&str>) -> Result<bool> {
    let filtered: Vec<TestCase> = match filter {
        Some(filter) => cases
            .into_iter()
            .filter(|c| c.name().to_lowercase().contains(&filter.to_lowercase()))
            .collect(),
        None => cases,
    };
    if filtered.is_empty() {
        return Err(anyhow!("No scripts matching the filter were found"));
    }

    let total = filtered.len();
    info!("Running {} script(s)...", total);
    let (mut passed, mut failed) = (0, 0);
    for (idx, case) in filtered.iter().enumerate() {
        if runner.stop_signal().is_stopped() {
            warn!("Interrupted, {} script(s) not run", total - idx);
            failed += total - idx;
            break;
        }
        info!("Script {}/{}: {}", idx + 1, total, case.name());
        match runner.run(case) {
            Ok(true) => passed += 1,
            Ok(false) => failed += 1,
            Err(e) => {
                error!("\x1b[31mExecution error: {} - {:#}\x1b[0m", case.name(), anyhow::Error::new(e));
                failed += 1;
            }
        }
    }

    info!(
        "Summary:\n  Total: {}\n  \x1b[32mPassed: {}\x1b[0m\n  \x1b[31mFailed: {}\x1b[0m",
        passed + failed,
        passed,
        failed
    );
    Ok(failed == 0)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let settings = load_settings(&cli)?;
    let context = Arc::new(settings.build_context(Arc::new(RemoteWebDriverFactory))?);
    let parser = JsonScriptParser::new(Arc::clone(&context.step_types));
    let mut manager = ScriptConfigManager::new(parser);
    let cases = prepare_scripts(&mut manager, cli.script_path.as_deref())?;

    let listener = Arc::new(ReportListener::new(&settings.result_dir));
    let runner = DefaultTestRunner::new(context, Arc::clone(&listener) as Arc<dyn TestRunListener>);

    let stop = runner.stop_signal();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after the current step");
        stop.stop();
    })
    .context("Failed to install Ctrl-C handler")?;

    let start = Instant::now();
    let success = run_all(&runner, cases, cli.filter.as_deref())?;

    let name = cli
        .script_path
        .as_deref()
        .and_then(|p| Path::new(p).file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stepchain".to_string());
    let report = listener.report(&name);
    print_report(&report, cli.verbose);
    info!("Total duration: {} ms", start.elapsed().as_millis());

    if cli.report_dir.is_some() {
        match save_report(&report, &settings.result_dir, settings.report_format) {
            Ok(path) => info!("Report saved: {}", path.display()),
            Err(e) => error!("Failed to save report: {}", e),
        }
    }

    if !success || !report.success {
        exit(1);
    }

    Ok(())
}
