//! Value getters and the verify / assert / waitFor / store step types
//! derived from each of them.

use super::StepType;
use crate::test_run::TestRun;
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Reads one value from the page or the run.
pub trait Getter: Send + Sync + fmt::Debug {
    /// Suffix of the derived step type names, e.g. `Title`.
    fn name(&self) -> &str;

    fn get(&self, run: &mut TestRun) -> Result<String>;

    /// Parameter holding the expected value. `None` for boolean getters,
    /// which pass when the value is `true`.
    fn compare_param(&self) -> Option<&str> {
        None
    }

    fn matches(&self, run: &mut TestRun) -> Result<bool> {
        let actual = self.get(run)?;
        let passed = match self.compare_param() {
            Some(param) => {
                let expected = run.string(param)?;
                debug!(getter = self.name(), %expected, %actual, "comparing");
                actual == expected
            }
            None => actual == "true",
        };
        Ok(passed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Title;

impl Getter for Title {
    fn name(&self) -> &str {
        "Title"
    }

    fn get(&self, run: &mut TestRun) -> Result<String> {
        run.driver()?.title()
    }

    fn compare_param(&self) -> Option<&str> {
        Some("title")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CurrentUrl;

impl Getter for CurrentUrl {
    fn name(&self) -> &str {
        "CurrentUrl"
    }

    fn get(&self, run: &mut TestRun) -> Result<String> {
        run.driver()?.current_url()
    }

    fn compare_param(&self) -> Option<&str> {
        Some("url")
    }
}

/// Text of the element at `locator`.
#[derive(Debug, Clone, Copy)]
pub struct Text;

impl Getter for Text {
    fn name(&self) -> &str {
        "Text"
    }

    fn get(&self, run: &mut TestRun) -> Result<String> {
        let locator = run.locator("locator")?;
        let driver = run.driver()?;
        match driver.find_elements(&locator)?.first() {
            Some(element) => driver.element_text(element),
            None => Ok(String::new()),
        }
    }

    fn compare_param(&self) -> Option<&str> {
        Some("text")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ElementPresent;

impl Getter for ElementPresent {
    fn name(&self) -> &str {
        "ElementPresent"
    }

    fn get(&self, run: &mut TestRun) -> Result<String> {
        let locator = run.locator("locator")?;
        let found = !run.driver()?.find_elements(&locator)?.is_empty();
        Ok(found.to_string())
    }
}

/// Whether the page source contains `text`.
#[derive(Debug, Clone, Copy)]
pub struct TextPresent;

impl Getter for TextPresent {
    fn name(&self) -> &str {
        "TextPresent"
    }

    fn get(&self, run: &mut TestRun) -> Result<String> {
        let text = run.string("text")?;
        let source = run.driver()?.page_source()?;
        Ok(source.contains(&text).to_string())
    }
}

/// Result of evaluating `expression` against the run's variables.
#[derive(Debug, Clone, Copy)]
pub struct Expression;

impl Getter for Expression {
    fn name(&self) -> &str {
        "Expression"
    }

    fn get(&self, run: &mut TestRun) -> Result<String> {
        run.evaluated_string("expression")
    }
}

/// `verify<Getter>`: records a failure and carries on.
#[derive(Debug)]
pub struct Verify {
    name: String,
    getter: Arc<dyn Getter>,
}

impl Verify {
    pub fn new(getter: Arc<dyn Getter>) -> Self {
        Self {
            name: format!("verify{}", getter.name()),
            getter,
        }
    }
}

impl StepType for Verify {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        self.getter.matches(run)
    }

    fn continue_at_failure(&self) -> bool {
        true
    }
}

/// `assert<Getter>`: a mismatch halts the run.
#[derive(Debug)]
pub struct Assert {
    name: String,
    getter: Arc<dyn Getter>,
}

impl Assert {
    pub fn new(getter: Arc<dyn Getter>) -> Self {
        Self {
            name: format!("assert{}", getter.name()),
            getter,
        }
    }
}

impl StepType for Assert {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        self.getter.matches(run)
    }
}

/// `waitFor<Getter>`: polls until the getter matches or `maxWait`
/// (milliseconds, default from the context) elapses.
#[derive(Debug)]
pub struct WaitFor {
    name: String,
    getter: Arc<dyn Getter>,
}

impl WaitFor {
    pub fn new(getter: Arc<dyn Getter>) -> Self {
        Self {
            name: format!("waitFor{}", getter.name()),
            getter,
        }
    }
}

impl StepType for WaitFor {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        let max_wait = match run.optional_string("maxWait") {
            Some(ms) => Duration::from_millis(ms.trim().parse()?),
            None => run.context().max_wait,
        };
        let interval = run.context().poll_interval;
        let deadline = Instant::now() + max_wait;
        loop {
            if self.getter.matches(run)? {
                return Ok(true);
            }
            if Instant::now() >= deadline || run.is_stopped() {
                debug!(step = %self.name, ?max_wait, "gave up waiting");
                return Ok(false);
            }
            std::thread::sleep(interval);
        }
    }
}

/// `store<Getter>`: saves the getter's value as `variable`.
#[derive(Debug)]
pub struct StoreValue {
    name: String,
    getter: Arc<dyn Getter>,
}

impl StoreValue {
    pub fn new(getter: Arc<dyn Getter>) -> Self {
        Self {
            name: format!("store{}", getter.name()),
            getter,
        }
    }
}

impl StepType for StoreValue {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        let variable = run.string("variable")?;
        let value = self.getter.get(run)?;
        run.put_var(variable, value);
        Ok(true)
    }
}
