//! The execution cursor over one test case instance.

use crate::aspect::{Advice, AdviceKind, Aspect};
use crate::chain::ChainRunner;
use crate::context::Context;
use crate::driver::{BrowserSession, WebDriver};
use crate::error::RunError;
use crate::input_data::InputData;
use crate::listener::{RecordingListener, TestRunListener};
use crate::status::{StopSignal, TestRunStatus};
use crate::step::{Locator, Step, StepOutcome};
use crate::test_case::TestCase;
use anyhow::anyhow;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Span};

/// Error of a nested step that has already reached the listener.
#[derive(Debug, Error)]
#[error(transparent)]
pub(crate) struct Reported(pub(crate) RunError);

/// Configures a [`TestRun`].
pub struct TestRunBuilder {
    test_case: Arc<TestCase>,
    name: Option<String>,
    vars: Option<InputData>,
    session: Option<(BrowserSession, bool)>,
    listener: Option<Arc<dyn TestRunListener>>,
    inherited_aspect: Aspect,
    stop: Option<StopSignal>,
    chain_enabled: bool,
}

impl TestRunBuilder {
    pub fn new(test_case: impl Into<Arc<TestCase>>) -> Self {
        Self {
            test_case: test_case.into(),
            name: None,
            vars: None,
            session: None,
            listener: None,
            inherited_aspect: Aspect::default(),
            stop: None,
            chain_enabled: true,
        }
    }

    /// Defaults to the case name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn vars(mut self, vars: InputData) -> Self {
        self.vars = Some(vars);
        self
    }

    /// Run on `session`; the run quits it at the end only when `owns`.
    /// Without a session the run gets a fresh one, owned unless the case
    /// shares state.
    pub fn session(mut self, session: BrowserSession, owns: bool) -> Self {
        self.session = Some((session, owns));
        self
    }

    pub fn listener(mut self, listener: Arc<dyn TestRunListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Interceptors taken over from the run that spawned this one.
    pub fn inherited_aspect(mut self, aspect: Aspect) -> Self {
        self.inherited_aspect = aspect;
        self
    }

    pub fn stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Whether the run executes the case's chain when its steps are done.
    pub fn chain_enabled(mut self, enabled: bool) -> Self {
        self.chain_enabled = enabled;
        self
    }

    pub fn build(self, context: Arc<Context>) -> TestRun {
        let case = self.test_case;
        let name = self.name.unwrap_or_else(|| case.name().to_string());
        let (session, owns_session) = self
            .session
            .unwrap_or_else(|| (context.new_session(), !case.is_share_state()));
        let vars = self
            .vars
            .unwrap_or_default()
            .with_env_properties(Arc::clone(&context.env));

        let mut aspect = case.aspect().merge(&self.inherited_aspect);
        if !case.is_prevent_context_aspect() {
            aspect = aspect.merge(&context.aspect);
        }

        let status = TestRunStatus::new(self.chain_enabled && case.has_chain());
        let span = info_span!("test_run", name = %name);
        TestRun {
            name,
            test_case: case,
            context,
            session,
            owns_session,
            listener: self
                .listener
                .unwrap_or_else(|| Arc::new(RecordingListener::new())),
            vars,
            aspect,
            inherited_aspect: self.inherited_aspect,
            status,
            stop: self.stop.unwrap_or_default(),
            aborted: false,
            span,
        }
    }
}

/// Mutable state of one execution of a test case.
pub struct TestRun {
    name: String,
    test_case: Arc<TestCase>,
    context: Arc<Context>,
    session: BrowserSession,
    owns_session: bool,
    listener: Arc<dyn TestRunListener>,
    vars: InputData,
    aspect: Aspect,
    inherited_aspect: Aspect,
    status: TestRunStatus,
    stop: StopSignal,
    aborted: bool,
    span: Span,
}

impl TestRun {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn test_case(&self) -> &Arc<TestCase> {
        &self.test_case
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn vars(&self) -> &InputData {
        &self.vars
    }

    pub fn put_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars = self.vars.add(key, value);
    }

    pub fn status(&self) -> TestRunStatus {
        self.status
    }

    pub fn aspect(&self) -> &Aspect {
        &self.aspect
    }

    /// Interceptors passed on to chain runs spawned from this one.
    /// Context advice is left out; every chain run adds it again.
    pub fn chain_aspect(&self) -> Aspect {
        self.test_case
            .aspect()
            .merge(&self.inherited_aspect)
            .materialize(&self.vars)
            .chain_inherited()
    }

    pub fn session(&self) -> &BrowserSession {
        &self.session
    }

    pub fn owns_session(&self) -> bool {
        self.owns_session
    }

    pub fn listener(&self) -> &Arc<dyn TestRunListener> {
        &self.listener
    }

    /// The browser driver, created on first use.
    pub fn driver(&self) -> anyhow::Result<Arc<dyn WebDriver>> {
        Ok(self.session.driver()?)
    }

    pub fn current_step_index(&self) -> Option<usize> {
        self.status.current()
    }

    pub fn current_step(&self) -> Option<Step> {
        self.current_step_ref().cloned()
    }

    /// Steps after the current one.
    pub fn remaining_steps(&self) -> usize {
        let len = self.test_case.steps().len();
        match self.status.current() {
            Some(i) => len.saturating_sub(i + 1),
            None => len,
        }
    }

    fn current_step_ref(&self) -> Option<&Step> {
        self.status.current().and_then(|i| self.test_case.step(i))
    }

    fn raw_param(&self, key: &str) -> anyhow::Result<&str> {
        let step = self
            .current_step_ref()
            .ok_or_else(|| anyhow!("no step is running"))?;
        step.param(key)
            .ok_or_else(|| anyhow!("missing parameter '{}' of {}", key, step.type_name()))
    }

    /// Parameter `key` of the current step, bound against the variables.
    pub fn string(&self, key: &str) -> anyhow::Result<String> {
        Ok(self.vars.bind(self.raw_param(key)?))
    }

    /// Parameter `key` of the current step as written.
    pub fn raw_string(&self, key: &str) -> anyhow::Result<String> {
        Ok(self.raw_param(key)?.to_string())
    }

    pub fn optional_string(&self, key: &str) -> Option<String> {
        self.raw_param(key).ok().map(|v| self.vars.bind(v))
    }

    /// Parameter `key` with its `${...}` expressions evaluated.
    pub fn evaluated_string(&self, key: &str) -> anyhow::Result<String> {
        Ok(self.vars.evaluate_string(self.raw_param(key)?))
    }

    pub fn locator(&self, key: &str) -> anyhow::Result<Locator> {
        let step = self
            .current_step_ref()
            .ok_or_else(|| anyhow!("no step is running"))?;
        step.locator(key)
            .map(|l| l.bind(&self.vars))
            .ok_or_else(|| anyhow!("missing locator '{}' of {}", key, step.type_name()))
    }

    pub fn is_stopped(&self) -> bool {
        self.status.is_stopped() || self.stop.is_stopped()
    }

    /// Stop this run and every run nested in it at the next step boundary.
    pub fn stop(&mut self) {
        info!("Stopping test run '{}'", self.name);
        self.status = self.status.stop();
        self.stop.stop();
    }

    /// Handle that stops this run from elsewhere, another thread included.
    pub fn stop_handle(&self) -> StopSignal {
        self.stop.clone()
    }

    pub(crate) fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    fn last_index(&self) -> isize {
        self.test_case.steps().len() as isize - 1
    }

    /// Inject the reserved variables, bind the aspect and open the suite.
    pub fn start(&mut self) {
        let listener = &self.listener;
        let dirs = [
            ("_resultDir", listener.result_dir()),
            ("_screenShotDir", listener.screenshot_dir()),
            ("_downloadDir", listener.download_dir()),
            ("_templateDir", listener.template_dir()),
        ];
        self.vars = self
            .vars
            .add("_testCaseName", self.name.clone())
            .add_all(self.context.reserved_vars())
            .add_all(
                dirs.into_iter()
                    .map(|(k, v)| (k, v.to_string_lossy().into_owned())),
            );
        self.aspect = self.aspect.materialize(&self.vars);

        if !self
            .listener
            .open_test_suite(&self.test_case, &self.name, &self.vars)
        {
            warn!("Listener rejected suite '{}'", self.name);
        }
    }

    pub fn has_next(&mut self) -> bool {
        if self.stop.is_stopped() && !self.status.is_stopped() {
            self.status = self.status.stop();
        }
        self.status.is_need_running(self.last_index())
    }

    /// Execute the next step, and move past any steps it consumed.
    pub fn next(&mut self) -> Result<bool, RunError> {
        self.status = self.status.start_step();
        let outcome = self.run_current_step()?;
        self.status = self.status.forward(outcome.exec_steps.saturating_sub(1));
        Ok(outcome.success)
    }

    fn run_current_step(&mut self) -> Result<StepOutcome, RunError> {
        let Some(step) = self.current_step() else {
            return Ok(StepOutcome {
                success: true,
                exec_steps: 1,
            });
        };
        if !self.test_case.is_included(&step, &self.vars) {
            debug!("Step {} filtered out", step.type_name());
            return Ok(StepOutcome {
                success: true,
                exec_steps: 1,
            });
        }
        step.execute(self)
    }

    /// Run the `count` steps following the current one, then return the
    /// cursor to it. Used by flow-control step types.
    pub fn execute_sub_steps(&mut self, count: usize) -> anyhow::Result<bool> {
        let Some(origin) = self.status.current() else {
            return Err(anyhow!("no step is running"));
        };
        let end = origin.saturating_add(count).min(self.test_case.steps().len().saturating_sub(1));
        let mut index = origin + 1;
        let mut success = true;
        while index <= end && !self.is_stopped() {
            self.status = self.status.to_step(index);
            let outcome = self.run_current_step();
            match outcome {
                Ok(outcome) => {
                    success = outcome.success && success;
                    index += outcome.exec_steps;
                }
                Err(e) => {
                    self.status = self.status.to_step(origin);
                    return Err(Reported(e).into());
                }
            }
        }
        self.status = self.status.to_step(origin);
        Ok(success)
    }

    /// Execute the whole case: steps, then the chain.
    ///
    /// `Ok(false)` covers verification failures and stops. Errors come back
    /// as [`RunError::Fatal`], after the suite was closed and an owned
    /// session quit.
    pub fn finish(&mut self) -> Result<bool, RunError> {
        let span = self.span.clone();
        let _enter = span.enter();
        info!("Starting test run");
        self.start();

        let mut success = true;
        while self.has_next() {
            match self.next() {
                Ok(result) => success = result && success,
                Err(e) if e.is_verification() => return Ok(self.abort()),
                Err(e) => return Err(self.absent(e)),
            }
        }
        self.end(success)
    }

    fn abort(&mut self) -> bool {
        info!("Test run '{}' aborted by a failed verification", self.name);
        self.aborted = true;
        self.listener.close_test_suite();
        self.quit_owned();
        self.status = self.status.finish();
        false
    }

    fn absent(&mut self, e: RunError) -> RunError {
        warn!("Test run '{}' failed: {}", self.name, e);
        self.listener.close_test_suite();
        self.quit_owned();
        self.status = self.status.finish();
        e.into_fatal(&self.name)
    }

    /// Close the suite, run the pending chain and release the session.
    pub fn end(&mut self, success: bool) -> Result<bool, RunError> {
        self.listener.close_test_suite();

        let mut chain_success = true;
        if self.status.is_need_chain() {
            self.status = self.status.chain_called();
            match ChainRunner::new(self).run() {
                Ok(result) => chain_success = result,
                Err(e) => {
                    self.quit_owned();
                    self.status = self.status.finish();
                    return Err(e.into_fatal(&self.name));
                }
            }
        }

        self.quit_owned();
        self.status = self.status.finish();
        let result = success && chain_success && !self.is_stopped();
        info!(success = result, "Test run finished");
        Ok(result)
    }

    fn quit_owned(&self) {
        if self.owns_session {
            self.session.quit();
        }
    }

    pub(crate) fn advice_for(&self, step: &Step) -> Advice {
        self.aspect.advice(self, step, &self.vars)
    }

    /// Nested run executing an advice case around `step`.
    pub(crate) fn advice_run(&self, case: Arc<TestCase>, step: &Step, kind: AdviceKind) -> TestRun {
        let index = self.status.current().unwrap_or(0);
        let name = format!(
            "{}_{:02}_{}_{}",
            self.name,
            index,
            step.type_name(),
            kind.as_str()
        );
        let vars = self
            .vars
            .add_all(step.to_target_vars())
            .add("_target.currentStepIndex", index.to_string());
        let case = case.map(|b| b.prevent_context_aspect(true));
        TestRunBuilder::new(case)
            .name(name)
            .vars(vars)
            .session(self.session.clone(), false)
            .listener(Arc::clone(&self.listener))
            .stop_signal(self.stop.child())
            .build(Arc::clone(&self.context))
    }

    pub(crate) fn process_step_success(
        &mut self,
        advice: &Advice,
        step: &Step,
        label: &str,
    ) -> Result<bool, RunError> {
        if step.step_type().accept_end_advice() && !advice.invoke_after(self)? {
            debug!("After advice rejected {}", label);
            return self.process_step_failure(advice, step, label);
        }
        self.listener.end_test();
        Ok(true)
    }

    pub(crate) fn process_step_failure(
        &mut self,
        advice: &Advice,
        step: &Step,
        label: &str,
    ) -> Result<bool, RunError> {
        let message = format!("{label} failed");
        self.listener.add_failure(&message);
        let advice_result = advice.invoke_failure(self);
        self.listener.end_test();
        advice_result?;
        if step.step_type().continue_at_failure() {
            Ok(false)
        } else {
            Err(RunError::Verification(message))
        }
    }

    pub(crate) fn process_step_error(
        &mut self,
        advice: &Advice,
        label: &str,
        err: anyhow::Error,
    ) -> RunError {
        let err = match err.downcast::<RunError>() {
            Ok(run_error) => run_error,
            Err(source) => RunError::Step {
                step: label.to_string(),
                source,
            },
        };
        self.listener.add_error(&err);
        if let Err(advice_err) = advice.invoke_failure(self) {
            warn!("Failure advice of {} raised: {}", label, advice_err);
        }
        self.listener.end_test();
        err
    }
}

impl std::fmt::Debug for TestRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRun")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("owns_session", &self.owns_session)
            .finish()
    }
}
