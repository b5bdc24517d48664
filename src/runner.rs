//! Test execution entry point for top-level cases.

use crate::context::Context;
use crate::error::RunError;
use crate::listener::TestRunListener;
use crate::status::StopSignal;
use crate::test_case::TestCase;
use crate::test_run::TestRunBuilder;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Test runner trait
pub trait TestRunner {
    /// Execute a test case once per data row. `Ok(false)` means at least
    /// one run failed a verification or was stopped.
    fn run(&self, test_case: &TestCase) -> Result<bool, RunError>;
}

/// Default test runner
#[derive(Debug)]
pub struct DefaultTestRunner {
    context: Arc<Context>,
    listener: Arc<dyn TestRunListener>,
    stop: StopSignal,
}

impl DefaultTestRunner {
    pub fn new(context: Arc<Context>, listener: Arc<dyn TestRunListener>) -> Self {
        Self {
            context,
            listener,
            stop: StopSignal::new(),
        }
    }

    /// Stops every run started by this runner, from any thread.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn execute(&self, case: Arc<TestCase>) -> Result<bool, RunError> {
        let seed = self.context.new_input_data().last_row(true);
        let rows = case.load_data(&self.context, &seed)?;
        let multi_line = case.is_multi_line(&self.context);
        // a share-state case keeps one browser across its rows
        let shared = case.is_share_state().then(|| self.context.new_session());

        let mut success = true;
        let mut result = Ok(());
        for (n, row) in rows.into_iter().enumerate() {
            if self.stop.is_stopped() {
                info!("Stopped before row {} of '{}'", n + 1, case.name());
                success = false;
                break;
            }
            let name = if multi_line {
                format!("{}_row_{}", case.name(), n + 1)
            } else {
                case.name().to_string()
            };
            let mut builder = TestRunBuilder::new(Arc::clone(&case))
                .name(name)
                .vars(row)
                .listener(Arc::clone(&self.listener))
                .stop_signal(self.stop.child());
            if let Some(session) = &shared {
                builder = builder.session(session.clone(), false);
            }
            match builder.build(Arc::clone(&self.context)).finish() {
                Ok(row_success) => success = row_success && success,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if let Some(session) = shared {
            session.quit();
        }
        result.map(|_| success)
    }
}

impl TestRunner for DefaultTestRunner {
    #[instrument(skip_all, fields(case = %test_case.name()))]
    fn run(&self, test_case: &TestCase) -> Result<bool, RunError> {
        let start = Instant::now();
        let case = Arc::new(
            test_case.materialize(&self.context.new_input_data())?,
        );
        let result = self.execute(case);
        match &result {
            Ok(success) => info!(
                success,
                duration_ms = start.elapsed().as_millis() as u64,
                "Test case finished"
            ),
            Err(e) => warn!("Test case '{}' failed: {}", test_case.name(), e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::DataSourceLoader;
    use crate::listener::{ListenerEvent, RecordingListener};
    use crate::test_case::{ScriptFile, TestCaseChains};
    use crate::testing::{echo, step, test_context_with, FakeFactory};
    use std::collections::BTreeMap;

    fn manual(rows: &str) -> DataSourceLoader {
        let mut config = BTreeMap::new();
        config.insert("data".to_string(), rows.to_string());
        DataSourceLoader::new("manual", config, ".")
    }

    fn runner(factory: Arc<FakeFactory>) -> (DefaultTestRunner, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::new());
        let runner = DefaultTestRunner::new(
            Arc::new(test_context_with(factory)),
            Arc::clone(&listener) as Arc<dyn TestRunListener>,
        );
        (runner, listener)
    }

    #[test]
    fn test_empty_data_source_runs_nothing() {
        let factory = Arc::new(FakeFactory::default());
        let (runner, listener) = runner(Arc::clone(&factory));
        let case = TestCase::builder(ScriptFile::new("search"))
            .step(echo("${q}"))
            .data_source(manual("[]"))
            .build();
        assert!(runner.run(&case).unwrap());
        assert!(listener.suites().is_empty());
        assert_eq!(factory.created(), 0);
    }

    #[test]
    fn test_one_run_per_row() {
        let factory = Arc::new(FakeFactory::default());
        let (runner, listener) = runner(Arc::clone(&factory));
        let case = TestCase::builder(ScriptFile::new("search"))
            .step(echo("${q}"))
            .data_source(manual(r#"[{"q":"a"},{"q":"b"}]"#))
            .build();

        assert!(runner.run(&case).unwrap());
        assert_eq!(listener.suites(), vec!["search_row_1", "search_row_2"]);
        assert_eq!(
            listener.count(|e| matches!(e, ListenerEvent::StartTest(name) if name.starts_with("echo"))),
            2
        );
    }

    #[test]
    fn test_single_row_keeps_case_name() {
        let (runner, listener) = runner(Arc::new(FakeFactory::default()));
        let case = TestCase::builder(ScriptFile::new("login"))
            .step(echo("hi"))
            .build();
        assert!(runner.run(&case).unwrap());
        assert_eq!(listener.suites(), vec!["login"]);
    }

    #[test]
    fn test_share_state_case_uses_one_session() {
        let factory = Arc::new(FakeFactory::default());
        let (runner, _) = runner(Arc::clone(&factory));
        let context = Arc::clone(runner.context());
        let open = step(&context, "get").put("url", "http://localhost/${q}").build();
        let case = TestCase::builder(ScriptFile::new("shared"))
            .step(open)
            .share_state(true)
            .data_source(manual(r#"[{"q":"a"},{"q":"b"}]"#))
            .build();

        assert!(runner.run(&case).unwrap());
        assert_eq!(factory.created(), 1);
        assert_eq!(factory.quits(), 1);
    }

    #[test]
    fn test_owned_sessions_quit_per_row() {
        let factory = Arc::new(FakeFactory::default());
        let (runner, _) = runner(Arc::clone(&factory));
        let context = Arc::clone(runner.context());
        let open = step(&context, "get").put("url", "http://localhost/").build();
        let case = TestCase::builder(ScriptFile::new("own"))
            .step(open)
            .data_source(manual(r#"[{"q":"a"},{"q":"b"}]"#))
            .build();

        assert!(runner.run(&case).unwrap());
        assert_eq!(factory.created(), 2);
        assert_eq!(factory.quits(), 2);
    }

    #[test]
    fn test_suite_runs_children_on_shared_session() {
        let factory = Arc::new(FakeFactory::default());
        let (runner, listener) = runner(Arc::clone(&factory));
        let context = Arc::clone(runner.context());
        let child = |name: &str| {
            TestCase::builder(ScriptFile::new(name))
                .step(step(&context, "get").put("url", "http://localhost/").build())
                .share_state(true)
                .build()
        };
        let chains = TestCaseChains::new().append(child("a")).append(child("b"));
        let suite = TestCase::suite(ScriptFile::new("suite"), chains).build();

        assert!(runner.run(&suite).unwrap());
        assert_eq!(listener.suites(), vec!["suite", "suite_1_a", "suite_2_b"]);
        assert_eq!(factory.created(), 1);
        assert_eq!(factory.quits(), 1);
    }

    #[test]
    fn test_stopped_runner_runs_nothing() {
        let (runner, listener) = runner(Arc::new(FakeFactory::default()));
        runner.stop_signal().stop();
        let case = TestCase::builder(ScriptFile::new("x")).step(echo("a")).build();
        assert!(!runner.run(&case).unwrap());
        assert!(listener.events().is_empty());
    }

    #[test]
    fn test_data_source_error() {
        let (runner, _) = runner(Arc::new(FakeFactory::default()));
        let case = TestCase::builder(ScriptFile::new("x"))
            .data_source(DataSourceLoader::new("csv", BTreeMap::new(), "."))
            .build();
        assert!(matches!(runner.run(&case), Err(RunError::DataSource { .. })));
    }
}
