//! Before / after / failure advice applied around steps.

use crate::error::RunError;
use crate::input_data::InputData;
use crate::pointcut::Pointcut;
use crate::step::Step;
use crate::test_case::TestCase;
use crate::test_run::TestRun;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which hook of an interceptor is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdviceKind {
    Before,
    After,
    Failure,
}

impl AdviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdviceKind::Before => "before",
            AdviceKind::After => "after",
            AdviceKind::Failure => "failure",
        }
    }
}

/// Cross-cutting logic attached to the steps its pointcut selects.
pub trait Interceptor: Send + Sync + fmt::Debug {
    fn is_pointcut(&self, run: &TestRun, step: &Step, vars: &InputData) -> bool;

    /// `Ok(false)` vetoes the step.
    fn invoke_before(&self, run: &mut TestRun, step: &Step) -> Result<bool, RunError>;

    /// `Ok(false)` fails the step.
    fn invoke_after(&self, run: &mut TestRun, step: &Step) -> Result<bool, RunError>;

    fn invoke_failure(&self, run: &mut TestRun, step: &Step) -> Result<bool, RunError>;

    /// Whether chain runs spawned from the run inherit this interceptor.
    fn take_over_chain(&self) -> bool;

    fn with_take_over_chain(&self, take_over: bool) -> Arc<dyn Interceptor>;

    /// Copy with templates bound against `vars`.
    fn materialize(&self, vars: &InputData) -> Arc<dyn Interceptor>;
}

/// Interceptor whose hooks are test cases, run as nested runs.
#[derive(Debug, Clone, Default)]
pub struct StepInterceptor {
    pointcut: Option<Pointcut>,
    before: Option<Arc<TestCase>>,
    after: Option<Arc<TestCase>>,
    failure: Option<Arc<TestCase>>,
    take_over_chain: bool,
}

impl StepInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pointcut(mut self, pointcut: Pointcut) -> Self {
        self.pointcut = Some(pointcut);
        self
    }

    pub fn before(mut self, case: TestCase) -> Self {
        self.before = Some(Arc::new(case));
        self
    }

    pub fn after(mut self, case: TestCase) -> Self {
        self.after = Some(Arc::new(case));
        self
    }

    pub fn failure(mut self, case: TestCase) -> Self {
        self.failure = Some(Arc::new(case));
        self
    }

    pub fn take_over(mut self, take_over: bool) -> Self {
        self.take_over_chain = take_over;
        self
    }

    fn run_advice(
        &self,
        case: &Option<Arc<TestCase>>,
        kind: AdviceKind,
        run: &mut TestRun,
        step: &Step,
    ) -> Result<bool, RunError> {
        let Some(case) = case else {
            return Ok(true);
        };
        let mut advice_run = run.advice_run(Arc::clone(case), step, kind);
        debug!("Running {} advice '{}'", kind.as_str(), advice_run.name());
        advice_run.finish()
    }
}

impl Interceptor for StepInterceptor {
    fn is_pointcut(&self, _run: &TestRun, step: &Step, vars: &InputData) -> bool {
        match &self.pointcut {
            Some(pointcut) => pointcut.is_handle(step, vars),
            // without a pointcut only a pure failure handler applies
            None => self.failure.is_some() && self.before.is_none() && self.after.is_none(),
        }
    }

    fn invoke_before(&self, run: &mut TestRun, step: &Step) -> Result<bool, RunError> {
        self.run_advice(&self.before, AdviceKind::Before, run, step)
    }

    fn invoke_after(&self, run: &mut TestRun, step: &Step) -> Result<bool, RunError> {
        self.run_advice(&self.after, AdviceKind::After, run, step)
    }

    fn invoke_failure(&self, run: &mut TestRun, step: &Step) -> Result<bool, RunError> {
        self.run_advice(&self.failure, AdviceKind::Failure, run, step)
    }

    fn take_over_chain(&self) -> bool {
        self.take_over_chain
    }

    fn with_take_over_chain(&self, take_over: bool) -> Arc<dyn Interceptor> {
        Arc::new(self.clone().take_over(take_over))
    }

    fn materialize(&self, vars: &InputData) -> Arc<dyn Interceptor> {
        Arc::new(Self {
            pointcut: self.pointcut.as_ref().map(|p| p.materialize(vars)),
            ..self.clone()
        })
    }
}

type Hook = dyn Fn(&mut TestRun, &Step) -> Result<bool, RunError> + Send + Sync;

/// Interceptor whose hooks are closures.
#[derive(Clone)]
pub struct FnInterceptor {
    pointcut: Pointcut,
    before: Option<Arc<Hook>>,
    after: Option<Arc<Hook>>,
    failure: Option<Arc<Hook>>,
    take_over_chain: bool,
}

impl FnInterceptor {
    pub fn new(pointcut: Pointcut) -> Self {
        Self {
            pointcut,
            before: None,
            after: None,
            failure: None,
            take_over_chain: false,
        }
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut TestRun, &Step) -> Result<bool, RunError> + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(hook));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut TestRun, &Step) -> Result<bool, RunError> + Send + Sync + 'static,
    {
        self.after = Some(Arc::new(hook));
        self
    }

    pub fn failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut TestRun, &Step) -> Result<bool, RunError> + Send + Sync + 'static,
    {
        self.failure = Some(Arc::new(hook));
        self
    }

    pub fn take_over(mut self, take_over: bool) -> Self {
        self.take_over_chain = take_over;
        self
    }

    fn call(hook: &Option<Arc<Hook>>, run: &mut TestRun, step: &Step) -> Result<bool, RunError> {
        match hook {
            Some(hook) => hook(run, step),
            None => Ok(true),
        }
    }
}

impl fmt::Debug for FnInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInterceptor")
            .field("pointcut", &self.pointcut)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("failure", &self.failure.is_some())
            .field("take_over_chain", &self.take_over_chain)
            .finish()
    }
}

impl Interceptor for FnInterceptor {
    fn is_pointcut(&self, _run: &TestRun, step: &Step, vars: &InputData) -> bool {
        self.pointcut.is_handle(step, vars)
    }

    fn invoke_before(&self, run: &mut TestRun, step: &Step) -> Result<bool, RunError> {
        Self::call(&self.before, run, step)
    }

    fn invoke_after(&self, run: &mut TestRun, step: &Step) -> Result<bool, RunError> {
        Self::call(&self.after, run, step)
    }

    fn invoke_failure(&self, run: &mut TestRun, step: &Step) -> Result<bool, RunError> {
        Self::call(&self.failure, run, step)
    }

    fn take_over_chain(&self) -> bool {
        self.take_over_chain
    }

    fn with_take_over_chain(&self, take_over: bool) -> Arc<dyn Interceptor> {
        Arc::new(self.clone().take_over(take_over))
    }

    fn materialize(&self, vars: &InputData) -> Arc<dyn Interceptor> {
        Arc::new(Self {
            pointcut: self.pointcut.materialize(vars),
            ..self.clone()
        })
    }
}

/// Ordered collection of interceptors.
#[derive(Debug, Clone, Default)]
pub struct Aspect {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Aspect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(&self, interceptor: impl Interceptor + 'static) -> Self {
        self.with_arc(Arc::new(interceptor))
    }

    pub fn with_arc(&self, interceptor: Arc<dyn Interceptor>) -> Self {
        let mut interceptors = self.interceptors.clone();
        interceptors.push(interceptor);
        Self { interceptors }
    }

    /// Interceptors of `self` followed by those of `other`.
    pub fn merge(&self, other: &Aspect) -> Self {
        let mut interceptors = self.interceptors.clone();
        interceptors.extend(other.interceptors.iter().cloned());
        Self { interceptors }
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    /// Interceptors matching `step`, in registration order.
    pub fn advice(&self, run: &TestRun, step: &Step, vars: &InputData) -> Advice {
        Advice {
            step: step.clone(),
            interceptors: self
                .interceptors
                .iter()
                .filter(|i| i.is_pointcut(run, step, vars))
                .cloned()
                .collect(),
        }
    }

    pub fn materialize(&self, vars: &InputData) -> Self {
        Self {
            interceptors: self.interceptors.iter().map(|i| i.materialize(vars)).collect(),
        }
    }

    pub fn filter(&self, pred: impl Fn(&Arc<dyn Interceptor>) -> bool) -> Self {
        Self {
            interceptors: self.interceptors.iter().filter(|i| pred(i)).cloned().collect(),
        }
    }

    /// Copy with every interceptor's take-over flag set to `take_over`.
    pub fn take_over_chain(&self, take_over: bool) -> Self {
        Self {
            interceptors: self
                .interceptors
                .iter()
                .map(|i| i.with_take_over_chain(take_over))
                .collect(),
        }
    }

    /// The interceptors chain runs inherit.
    pub fn chain_inherited(&self) -> Self {
        self.filter(|i| i.take_over_chain())
    }
}

/// Interceptors selected for one step.
#[derive(Debug, Clone)]
pub struct Advice {
    step: Step,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Advice {
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs the before hooks; the first `false` vetoes the step.
    pub fn invoke_before(&self, run: &mut TestRun) -> Result<bool, RunError> {
        for interceptor in &self.interceptors {
            if !interceptor.invoke_before(run, &self.step)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Runs the after hooks; the first `false` fails the step.
    pub fn invoke_after(&self, run: &mut TestRun) -> Result<bool, RunError> {
        for interceptor in &self.interceptors {
            if !interceptor.invoke_after(run, &self.step)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Runs every failure hook, whatever the earlier ones returned.
    pub fn invoke_failure(&self, run: &mut TestRun) -> Result<bool, RunError> {
        let mut result = true;
        for interceptor in &self.interceptors {
            result = interceptor.invoke_failure(run, &self.step)? && result;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ListenerEvent, RecordingListener};
    use crate::step_type::StepType;
    use crate::test_case::ScriptFile;
    use crate::test_run::TestRunBuilder;
    use crate::testing::{echo, step, test_context};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Counting(AtomicUsize);

    impl StepType for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn run(&self, _run: &mut TestRun) -> anyhow::Result<bool> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> FnInterceptor {
        let log = Arc::clone(log);
        FnInterceptor::new(Pointcut::Any).before(move |_, _| {
            log.lock().unwrap().push(label.to_string());
            Ok(true)
        })
    }

    #[test]
    fn test_local_advice_runs_before_context_advice() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut context = test_context();
        context.aspect = Aspect::new().with(recorder(&log, "context"));
        let case = TestCase::builder(ScriptFile::new("order"))
            .step(echo("x"))
            .aspect(Aspect::new().with(recorder(&log, "local")))
            .build();
        let mut run = TestRunBuilder::new(case).build(Arc::new(context.clone()));
        assert!(run.finish().unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["local", "context"]);

        log.lock().unwrap().clear();
        let prevented = TestCase::builder(ScriptFile::new("prevented"))
            .step(echo("x"))
            .prevent_context_aspect(true)
            .build();
        let mut run = TestRunBuilder::new(prevented).build(Arc::new(context));
        assert!(run.finish().unwrap());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_before_veto_skips_step() {
        let counting = Arc::new(Counting::default());
        let vetoed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&vetoed);
        let veto = FnInterceptor::new(Pointcut::step_type("counting")).before(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        });
        let case = TestCase::builder(ScriptFile::new("veto"))
            .step(Step::of(counting.clone()).build())
            .step(Step::of(counting.clone()).build())
            .aspect(Aspect::new().with(veto))
            .build();
        let listener = Arc::new(RecordingListener::new());
        let mut run = TestRunBuilder::new(case)
            .listener(listener.clone())
            .build(Arc::new(test_context()));

        assert!(run.finish().unwrap());
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
        assert_eq!(vetoed.load(Ordering::SeqCst), 2);
        assert_eq!(
            listener.count(|e| matches!(e, ListenerEvent::StartTest(_))),
            0
        );
    }

    #[test]
    fn test_after_rejection_fails_step() {
        let reject = FnInterceptor::new(Pointcut::Any).after(|_, _| Ok(false));
        let case = TestCase::builder(ScriptFile::new("after"))
            .step(echo("x"))
            .step(echo("y"))
            .aspect(Aspect::new().with(reject))
            .build();
        let listener = Arc::new(RecordingListener::new());
        let mut run = TestRunBuilder::new(case)
            .listener(listener.clone())
            .build(Arc::new(test_context()));
        assert!(!run.finish().unwrap());
        assert_eq!(listener.count(|e| matches!(e, ListenerEvent::StartTest(_))), 1);
    }

    #[test]
    fn test_every_failure_hook_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            FnInterceptor::new(Pointcut::Any).failure(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            })
        };
        let context = test_context();
        let case = TestCase::builder(ScriptFile::new("failure"))
            .step(step(&context, "assertTitle").put("title", "Nope").build())
            .aspect(Aspect::new().with(hook(&calls)).with(hook(&calls)))
            .build();
        let mut run = TestRunBuilder::new(case).build(Arc::new(context));
        assert!(!run.finish().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_step_interceptor_runs_named_advice() {
        let before = TestCase::builder(ScriptFile::new("advice"))
            .step(echo("around ${_target.type} at ${_target.currentStepIndex}"))
            .build();
        let interceptor = StepInterceptor::new()
            .pointcut(Pointcut::step_type("echo"))
            .before(before);
        let case = TestCase::builder(ScriptFile::new("main"))
            .step(echo("one"))
            .aspect(Aspect::new().with(interceptor))
            .build();
        let listener = Arc::new(RecordingListener::new());
        let mut run = TestRunBuilder::new(case)
            .listener(listener.clone())
            .build(Arc::new(test_context()));

        assert!(run.finish().unwrap());
        assert_eq!(listener.suites(), vec!["main", "main_00_echo_before"]);
        assert_eq!(
            listener.count(|e| *e == ListenerEvent::StartTest("echo text:around echo at 0".into())),
            1
        );
        // advice variables stay in the advice run
        assert!(!run.vars().contains("_target.type"));
        assert!(!run.session().is_active());
    }

    #[test]
    fn test_failure_only_interceptor_needs_no_pointcut() {
        let context = test_context();
        let on_failure = TestCase::builder(ScriptFile::new("cleanup"))
            .step(echo("cleanup"))
            .build();
        let case = TestCase::builder(ScriptFile::new("main"))
            .step(echo("fine"))
            .step(step(&context, "assertTitle").put("title", "Nope").build())
            .aspect(Aspect::new().with(StepInterceptor::new().failure(on_failure)))
            .build();
        let listener = Arc::new(RecordingListener::new());
        let mut run = TestRunBuilder::new(case)
            .listener(listener.clone())
            .build(Arc::new(context));

        assert!(!run.finish().unwrap());
        assert_eq!(listener.suites(), vec!["main", "main_01_assertTitle_failure"]);
    }

    #[test]
    fn test_aspect_composition() {
        let a = Aspect::new().with(FnInterceptor::new(Pointcut::Any).take_over(true));
        let b = Aspect::new().with(FnInterceptor::new(Pointcut::None));
        let merged = a.merge(&b);
        assert_eq!(merged.len(), 2);
        assert_eq!(a.len(), 1);
        assert_eq!(merged.chain_inherited().len(), 1);
        assert_eq!(merged.take_over_chain(true).chain_inherited().len(), 2);
        assert_eq!(merged.take_over_chain(false).chain_inherited().len(), 0);
        assert!(merged.filter(|i| !i.take_over_chain()).len() == 1);
    }
}
