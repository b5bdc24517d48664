//! Execution of the cases chained below a finished run.

use crate::aspect::Aspect;
use crate::context::Context;
use crate::driver::BrowserSession;
use crate::error::RunError;
use crate::input_data::InputData;
use crate::listener::TestRunListener;
use crate::status::StopSignal;
use crate::test_case::{TestCase, TestCaseChains};
use crate::test_run::{TestRun, TestRunBuilder};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs every child of a case's chain, one run per data row.
pub(crate) struct ChainRunner {
    parent_name: String,
    chains: TestCaseChains,
    context: Arc<Context>,
    session: BrowserSession,
    listener: Arc<dyn TestRunListener>,
    seed: InputData,
    stop: StopSignal,
    aspect: Aspect,
}

/// What running one chained child produced.
struct ChildOutcome {
    success: bool,
    last_vars: Option<InputData>,
}

impl ChainRunner {
    pub(crate) fn new(parent: &TestRun) -> Self {
        Self {
            parent_name: parent.name().to_string(),
            chains: parent.test_case().chains().clone(),
            context: Arc::clone(parent.context()),
            session: parent.session().clone(),
            listener: Arc::clone(parent.listener()),
            seed: parent.vars().clone(),
            stop: parent.stop_signal().clone(),
            aspect: parent.chain_aspect(),
        }
    }

    pub(crate) fn run(self) -> Result<bool, RunError> {
        let mut seed = self.seed.clone();
        let mut success = true;

        for (i, child) in self.chains.cases().iter().enumerate() {
            if self.stop.is_stopped() {
                info!("Chain of '{}' stopped", self.parent_name);
                break;
            }
            let index = i + 1;
            if child.is_skip(&seed) {
                info!("Skipping chained case '{}'", child.name());
                continue;
            }
            if child.is_break_nested_chain() && !seed.is_last_row() {
                debug!("'{}' waits for the last row", child.name());
                continue;
            }

            let outcome = self.run_child(index, child, &seed)?;
            success = outcome.success && success;
            if self.chains.is_take_over_last_run() {
                if let Some(vars) = outcome.last_vars {
                    seed = vars.last_row(seed.is_last_row());
                }
            }
        }
        Ok(success)
    }

    fn reported(&self, e: RunError) -> RunError {
        self.listener.add_error(&e);
        e
    }

    fn run_child(
        &self,
        index: usize,
        child: &Arc<TestCase>,
        seed: &InputData,
    ) -> Result<ChildOutcome, RunError> {
        let case = Arc::new(child.materialize(seed).map_err(|e| self.reported(e))?);
        let rows = case
            .load_data(&self.context, seed)
            .map_err(|e| self.reported(e))?;
        let multi_line = case.is_multi_line(&self.context);
        let name = format!("{}_{}_{}", self.parent_name, index, case.name());

        if multi_line && !self.listener.open_test_suite(&case, &name, seed) {
            warn!("Listener rejected suite '{}'", name);
        }
        let result = self.run_rows(&case, &name, rows, multi_line, seed);
        if multi_line {
            self.listener.close_test_suite();
        }
        let (mut success, last_run) = result?;

        let last_vars = last_run.as_ref().map(|run| run.vars().clone());
        if let Some(last) = last_run.filter(|_| Self::is_deferred(&case)) {
            // the last row kept its session for the deferred chain
            if !last.is_aborted() && !last.is_stopped() {
                debug!("Running deferred chain of '{}'", last.name());
                let deferred = ChainRunner::new(&last).run();
                if !case.is_share_state() {
                    last.session().quit();
                }
                success = deferred? && success;
            } else if !case.is_share_state() {
                last.session().quit();
            }
        }

        Ok(ChildOutcome { success, last_vars })
    }

    fn is_deferred(case: &TestCase) -> bool {
        case.has_chain() && !case.is_nested_chain()
    }

    fn run_rows(
        &self,
        case: &Arc<TestCase>,
        name: &str,
        rows: Vec<InputData>,
        multi_line: bool,
        seed: &InputData,
    ) -> Result<(bool, Option<TestRun>), RunError> {
        let deferred = Self::is_deferred(case);
        let last = rows.len().saturating_sub(1);
        let mut success = true;
        let mut last_run = None;

        for (n, row) in rows.into_iter().enumerate() {
            if self.stop.is_stopped() {
                break;
            }
            let run_name = if multi_line {
                format!("{}_row_{}", name, n + 1)
            } else {
                name.to_string()
            };
            let last_row = if multi_line {
                row.is_last_row()
            } else {
                seed.is_last_row()
            };
            let vars = seed.clear_row_number().merge(&row).last_row(last_row);

            let (session, owns) = if case.is_share_state() {
                (self.session.clone(), false)
            } else {
                (self.session.fresh(), !(deferred && n == last))
            };

            let mut run = TestRunBuilder::new(Arc::clone(case))
                .name(run_name)
                .vars(vars)
                .session(session, owns)
                .listener(Arc::clone(&self.listener))
                .inherited_aspect(self.aspect.clone())
                .stop_signal(self.stop.child())
                .chain_enabled(case.is_nested_chain())
                .build(Arc::clone(&self.context));
            let finished = run.finish();
            if finished.is_err() && !owns && !case.is_share_state() {
                run.session().quit();
            }
            success = finished? && success;
            last_run = Some(run);
        }
        Ok((success, last_run))
    }
}
