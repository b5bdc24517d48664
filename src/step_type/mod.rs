//! Step behaviour, looked up by name.

mod browser;
mod flow;
mod getter;

pub use browser::{ClickElement, Get, SendKeysToElement, SetElementText};
pub use flow::{If, Loop};
pub use getter::{
    Assert, CurrentUrl, ElementPresent, Expression, Getter, StoreValue, Text,
    TextPresent, Title, Verify, WaitFor,
};

use crate::step::Step;
use crate::test_run::TestRun;
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Behaviour behind a [`Step`].
pub trait StepType: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Perform the action. `Ok(false)` is a verification failure, `Err`
    /// an unrecoverable error.
    fn run(&self, run: &mut TestRun) -> Result<bool>;

    /// Whether the run carries on after this step returns `false`.
    fn continue_at_failure(&self) -> bool {
        false
    }

    fn accept_end_advice(&self) -> bool {
        true
    }

    /// Entries of the step list this step accounts for, itself included.
    fn exec_steps(&self, _run: &TestRun, _step: &Step) -> usize {
        1
    }
}

/// Open registry of step types keyed by name.
#[derive(Debug, Clone, Default)]
pub struct StepTypeRegistry {
    types: BTreeMap<String, Arc<dyn StepType>>,
}

impl StepTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in step type.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(Echo))
            .register(Arc::new(Store))
            .register(Arc::new(Pause))
            .register(Arc::new(Get))
            .register(Arc::new(ClickElement))
            .register(Arc::new(SetElementText))
            .register(Arc::new(SendKeysToElement))
            .register(Arc::new(Loop))
            .register(Arc::new(If));

        let getters: Vec<Arc<dyn Getter>> = vec![
            Arc::new(Title),
            Arc::new(CurrentUrl),
            Arc::new(Text),
            Arc::new(ElementPresent),
            Arc::new(TextPresent),
            Arc::new(Expression),
        ];
        for getter in getters {
            registry
                .register(Arc::new(Verify::new(Arc::clone(&getter))))
                .register(Arc::new(Assert::new(Arc::clone(&getter))))
                .register(Arc::new(WaitFor::new(Arc::clone(&getter))))
                .register(Arc::new(StoreValue::new(getter)));
        }
        registry
    }

    pub fn register(&mut self, step_type: Arc<dyn StepType>) -> &mut Self {
        self.types.insert(step_type.name().to_string(), step_type);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepType>> {
        self.types.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

/// Logs `text`.
#[derive(Debug, Clone, Copy)]
pub struct Echo;

impl StepType for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        let text = run.string("text")?;
        info!("{}", text);
        Ok(true)
    }
}

/// Binds `text` and stores it as `variable`.
#[derive(Debug, Clone, Copy)]
pub struct Store;

impl StepType for Store {
    fn name(&self) -> &str {
        "store"
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        let variable = run.string("variable")?;
        let text = run.evaluated_string("text")?;
        run.put_var(variable, text);
        Ok(true)
    }
}

/// Sleeps for `waitTime` milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct Pause;

impl StepType for Pause {
    fn name(&self) -> &str {
        "pause"
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        let millis: u64 = run.string("waitTime")?.trim().parse()?;
        std::thread::sleep(Duration::from_millis(millis));
        Ok(true)
    }

    fn accept_end_advice(&self) -> bool {
        false
    }
}
