//! Observer of suite and test events.

use crate::input_data::InputData;
use crate::test_case::TestCase;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Receives the events of every run, nested runs included.
///
/// Shared as `Arc<dyn TestRunListener>`; implementations use interior
/// mutability for their state.
pub trait TestRunListener: Send + Sync + fmt::Debug {
    /// Called when a run starts. Returning `false` is reported but does not
    /// stop the run.
    fn open_test_suite(&self, test_case: &TestCase, name: &str, vars: &InputData) -> bool;

    fn start_test(&self, name: &str);

    fn end_test(&self);

    fn add_failure(&self, message: &str);

    fn add_error(&self, error: &(dyn std::error::Error + 'static));

    fn close_test_suite(&self);

    fn result_dir(&self) -> PathBuf {
        PathBuf::from("result")
    }

    fn download_dir(&self) -> PathBuf {
        self.result_dir().join("download")
    }

    fn screenshot_dir(&self) -> PathBuf {
        self.result_dir().join("screenshot")
    }

    fn template_dir(&self) -> PathBuf {
        self.result_dir().join("template")
    }
}

/// One recorded listener call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    OpenSuite(String),
    StartTest(String),
    EndTest,
    Failure(String),
    Error(String),
    CloseSuite,
}

/// Listener that logs every event and keeps them in order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.lock().clone()
    }

    /// Names of the suites opened so far.
    pub fn suites(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ListenerEvent::OpenSuite(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&ListenerEvent) -> bool) -> usize {
        self.lock().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: ListenerEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ListenerEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TestRunListener for RecordingListener {
    fn open_test_suite(&self, _test_case: &TestCase, name: &str, _vars: &InputData) -> bool {
        info!("Suite opened: {}", name);
        self.push(ListenerEvent::OpenSuite(name.to_string()));
        true
    }

    fn start_test(&self, name: &str) {
        self.push(ListenerEvent::StartTest(name.to_string()));
    }

    fn end_test(&self) {
        self.push(ListenerEvent::EndTest);
    }

    fn add_failure(&self, message: &str) {
        warn!("Failure: {}", message);
        self.push(ListenerEvent::Failure(message.to_string()));
    }

    fn add_error(&self, error: &(dyn std::error::Error + 'static)) {
        error!("Error: {}", error);
        self.push(ListenerEvent::Error(error.to_string()));
    }

    fn close_test_suite(&self) {
        self.push(ListenerEvent::CloseSuite);
    }
}
