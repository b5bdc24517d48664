//! Listener collecting suite results, and report files written from them.

use crate::input_data::InputData;
use crate::listener::TestRunListener;
use crate::test_case::TestCase;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Output format of report files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Yaml,
    Text,
}

/// Result of one suite, i.e. one run or one data-driven group of runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub name: String,
    pub script: Option<String>,
    pub success: bool,
    /// Failures and errors raised outside of any step.
    pub errors: Vec<String>,
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Result of a single step within a suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Every suite of one top-level execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub name: String,
    pub success: bool,
    pub suites: Vec<SuiteResult>,
    pub total_duration_ms: u64,
    pub timestamp: String,
}

impl TestReport {
    pub fn failed_suites(&self) -> impl Iterator<Item = &SuiteResult> {
        self.suites.iter().filter(|s| !s.success)
    }
}

struct OpenSuite {
    order: usize,
    result: SuiteResult,
    started: Instant,
    step: Option<(StepResult, Instant)>,
}

#[derive(Default)]
struct ReportState {
    opened: usize,
    stack: Vec<OpenSuite>,
    finished: Vec<(usize, SuiteResult)>,
}

/// Listener building a [`TestReport`].
pub struct ReportListener {
    result_dir: PathBuf,
    started: Instant,
    state: Mutex<ReportState>,
}

impl std::fmt::Debug for ReportListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportListener")
            .field("result_dir", &self.result_dir)
            .finish()
    }
}

impl ReportListener {
    pub fn new(result_dir: impl Into<PathBuf>) -> Self {
        Self {
            result_dir: result_dir.into(),
            started: Instant::now(),
            state: Mutex::new(ReportState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReportState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the suites closed so far, in the order they opened.
    pub fn report(&self, name: &str) -> TestReport {
        let mut finished = self.lock().finished.clone();
        finished.sort_by_key(|(order, _)| *order);
        let suites: Vec<SuiteResult> = finished.into_iter().map(|(_, s)| s).collect();
        TestReport {
            name: name.to_string(),
            success: suites.iter().all(|s| s.success),
            suites,
            total_duration_ms: self.started.elapsed().as_millis() as u64,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn record_problem(&self, message: String) {
        let mut state = self.lock();
        let Some(suite) = state.stack.last_mut() else {
            warn!("Problem reported outside of a suite: {}", message);
            return;
        };
        suite.result.success = false;
        match suite.step.as_mut() {
            Some((step, _)) => {
                step.success = false;
                step.error.get_or_insert(message);
            }
            None => suite.result.errors.push(message),
        }
    }
}

impl TestRunListener for ReportListener {
    fn open_test_suite(&self, test_case: &TestCase, name: &str, _vars: &InputData) -> bool {
        let mut state = self.lock();
        let order = state.opened;
        state.opened += 1;
        state.stack.push(OpenSuite {
            order,
            result: SuiteResult {
                name: name.to_string(),
                script: test_case.path().map(|p| p.display().to_string()),
                success: true,
                errors: Vec::new(),
                steps: Vec::new(),
                started_at: Utc::now(),
                duration_ms: 0,
            },
            started: Instant::now(),
            step: None,
        });
        true
    }

    fn start_test(&self, name: &str) {
        let mut state = self.lock();
        if let Some(suite) = state.stack.last_mut() {
            let step = StepResult {
                name: name.to_string(),
                success: true,
                error: None,
                duration_ms: 0,
            };
            suite.step = Some((step, Instant::now()));
        }
    }

    fn end_test(&self) {
        let mut state = self.lock();
        if let Some(suite) = state.stack.last_mut() {
            if let Some((mut step, started)) = suite.step.take() {
                step.duration_ms = started.elapsed().as_millis() as u64;
                suite.result.steps.push(step);
            }
        }
    }

    fn add_failure(&self, message: &str) {
        self.record_problem(message.to_string());
    }

    fn add_error(&self, error: &(dyn std::error::Error + 'static)) {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(&format!(": {cause}"));
            source = cause.source();
        }
        self.record_problem(message);
    }

    fn close_test_suite(&self) {
        let mut state = self.lock();
        let Some(mut suite) = state.stack.pop() else {
            warn!("close_test_suite without an open suite");
            return;
        };
        if let Some((step, _)) = suite.step.take() {
            suite.result.steps.push(step);
        }
        suite.result.duration_ms = suite.started.elapsed().as_millis() as u64;
        debug!(
            "Suite {} closed ({})",
            suite.result.name,
            if suite.result.success { "PASS" } else { "FAIL" }
        );
        state.finished.push((suite.order, suite.result));
    }

    fn result_dir(&self) -> PathBuf {
        self.result_dir.clone()
    }
}

/// Log a colored summary of `report`.
pub fn print_report(report: &TestReport, verbose: bool) {
    for suite in &report.suites {
        let status = if suite.success {
            "\x1b[32mPASS\x1b[0m"
        } else {
            "\x1b[31mFAIL\x1b[0m"
        };
        tracing::info!("{} suite: {} ({} ms)", status, suite.name, suite.duration_ms);

        for error in &suite.errors {
            error!("     \x1b[31mError: {}\x1b[0m", error);
        }
        for (i, step) in suite.steps.iter().enumerate() {
            if step.success && !verbose {
                continue;
            }
            let mark = if step.success {
                "\x1b[32m✓\x1b[0m"
            } else {
                "\x1b[31m✗\x1b[0m"
            };
            tracing::info!("  {}. {} {} ({} ms)", i + 1, mark, step.name, step.duration_ms);
            if let Some(error) = &step.error {
                error!("     \x1b[31mError: {}\x1b[0m", error);
            }
        }
    }
}

/// Write `report` to `report_dir`, returning the file path.
pub fn save_report(report: &TestReport, report_dir: &Path, format: ReportFormat) -> Result<PathBuf> {
    if !report_dir.exists() {
        fs::create_dir_all(report_dir)?;
    }

    let timestamp = Utc::now().timestamp();
    let sanitized_name = report.name.replace([' ', '/', '\\'], "_");

    let (filename, content) = match format {
        ReportFormat::Json => (
            format!("{sanitized_name}-{timestamp}.json"),
            serde_json::to_string_pretty(report)?,
        ),
        ReportFormat::Yaml => (
            format!("{sanitized_name}-{timestamp}.yaml"),
            serde_yaml::to_string(report)?,
        ),
        ReportFormat::Text => (format!("{sanitized_name}-{timestamp}.txt"), render_text(report)),
    };

    let file_path = report_dir.join(filename);
    let mut file = File::create(&file_path)?;
    file.write_all(content.as_bytes())?;

    Ok(file_path)
}

fn render_text(report: &TestReport) -> String {
    let mut content = String::new();
    content.push_str(&format!("Test result: {}\n", report.name));
    content.push_str(&format!(
        "Status: {}\n",
        if report.success { "PASS" } else { "FAIL" }
    ));
    content.push_str(&format!("Duration: {} ms\n", report.total_duration_ms));
    for suite in &report.suites {
        content.push_str(&format!(
            "\nSuite: {} ({})\n",
            suite.name,
            if suite.success { "PASS" } else { "FAIL" }
        ));
        for error in &suite.errors {
            content.push_str(&format!("  Error: {error}\n"));
        }
        for (i, step) in suite.steps.iter().enumerate() {
            content.push_str(&format!(
                "  {}. {} ({})\n",
                i + 1,
                step.name,
                if step.success { "PASS" } else { "FAIL" }
            ));
            if let Some(error) = &step.error {
                content.push_str(&format!("     Error: {error}\n"));
            }
            content.push_str(&format!("     Duration: {} ms\n", step.duration_ms));
        }
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunError;
    use crate::test_case::ScriptFile;

    fn case() -> TestCase {
        TestCase::builder(ScriptFile::new("login")).build()
    }

    #[test]
    fn test_nested_suites_are_reported_in_open_order() {
        let listener = ReportListener::new("out");
        let vars = InputData::new();
        listener.open_test_suite(&case(), "parent", &vars);
        listener.start_test("echo");
        listener.open_test_suite(&case(), "parent_00_echo_before", &vars);
        listener.close_test_suite();
        listener.end_test();
        listener.start_test("assertTitle");
        listener.add_failure("assertTitle failed");
        listener.end_test();
        listener.close_test_suite();

        let report = listener.report("login");
        let names: Vec<_> = report.suites.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["parent", "parent_00_echo_before"]);
        assert!(!report.success);
        let parent = &report.suites[0];
        assert_eq!(parent.steps.len(), 2);
        assert!(parent.steps[0].success);
        assert_eq!(parent.steps[1].error.as_deref(), Some("assertTitle failed"));
        assert_eq!(report.failed_suites().count(), 1);
    }

    #[test]
    fn test_error_outside_step_goes_to_suite() {
        let listener = ReportListener::new("out");
        listener.open_test_suite(&case(), "p", &InputData::new());
        let err = RunError::DriverCreation(anyhow::anyhow!("refused"));
        listener.add_error(&err);
        listener.close_test_suite();

        let report = listener.report("p");
        assert_eq!(
            report.suites[0].errors,
            vec!["unable to create driver: refused".to_string()]
        );
        assert_eq!(listener.result_dir(), PathBuf::from("out"));
        assert_eq!(listener.screenshot_dir(), PathBuf::from("out/screenshot"));
    }

    #[test]
    fn test_save_report_formats() {
        let dir = tempfile::tempdir().unwrap();
        let listener = ReportListener::new(dir.path());
        listener.open_test_suite(&case(), "my suite", &InputData::new());
        listener.start_test("echo");
        listener.end_test();
        listener.close_test_suite();
        let report = listener.report("my suite");

        let json = save_report(&report, dir.path(), ReportFormat::Json).unwrap();
        assert!(json.file_name().unwrap().to_string_lossy().starts_with("my_suite-"));
        let parsed: TestReport =
            serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(parsed.suites.len(), 1);

        let yaml = save_report(&report, dir.path(), ReportFormat::Yaml).unwrap();
        assert!(fs::read_to_string(yaml).unwrap().contains("name: my suite"));

        let text = save_report(&report, dir.path(), ReportFormat::Text).unwrap();
        let text = fs::read_to_string(text).unwrap();
        assert!(text.contains("Status: PASS"));
        assert!(text.contains("1. echo (PASS)"));
    }
}
