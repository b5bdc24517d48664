//! Fakes shared by the unit tests.

use crate::context::Context;
use crate::driver::{ElementId, WebDriver, WebDriverFactory};
use crate::step::{Locator, Step};
use crate::step_type::Echo;
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory browser recording the calls it receives.
#[derive(Debug, Default)]
pub struct FakeDriver {
    pub calls: Mutex<Vec<String>>,
    quits: Arc<AtomicUsize>,
}

impl FakeDriver {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl WebDriver for FakeDriver {
    fn navigate(&self, url: &str) -> Result<()> {
        self.record(format!("navigate {url}"));
        Ok(())
    }

    fn current_url(&self) -> Result<String> {
        Ok("http://localhost/home".to_string())
    }

    fn title(&self) -> Result<String> {
        Ok("Home".to_string())
    }

    fn page_source(&self) -> Result<String> {
        Ok("<html><body>Welcome back</body></html>".to_string())
    }

    fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementId>> {
        if locator.value.contains("missing") {
            return Ok(Vec::new());
        }
        Ok(vec![ElementId(locator.value.clone())])
    }

    fn click(&self, element: &ElementId) -> Result<()> {
        self.record(format!("click {}", element.0));
        Ok(())
    }

    fn clear(&self, element: &ElementId) -> Result<()> {
        self.record(format!("clear {}", element.0));
        Ok(())
    }

    fn send_keys(&self, element: &ElementId, text: &str) -> Result<()> {
        self.record(format!("keys {} {text}", element.0));
        Ok(())
    }

    fn element_text(&self, element: &ElementId) -> Result<String> {
        Ok(format!("text of {}", element.0))
    }

    fn quit(&self) -> Result<()> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory counting the drivers it made and how many were quit.
#[derive(Debug, Default)]
pub struct FakeFactory {
    created: AtomicUsize,
    quits: Arc<AtomicUsize>,
    last: Mutex<Option<Arc<FakeDriver>>>,
}

impl FakeFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }

    pub fn last_driver(&self) -> Option<Arc<FakeDriver>> {
        self.last.lock().unwrap().clone()
    }
}

impl WebDriverFactory for FakeFactory {
    fn make(&self, _config: &BTreeMap<String, String>) -> Result<Arc<dyn WebDriver>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let driver = Arc::new(FakeDriver {
            calls: Mutex::default(),
            quits: Arc::clone(&self.quits),
        });
        *self.last.lock().unwrap() = Some(Arc::clone(&driver));
        Ok(driver)
    }
}

#[derive(Debug)]
pub struct FailingFactory;

impl WebDriverFactory for FailingFactory {
    fn make(&self, _config: &BTreeMap<String, String>) -> Result<Arc<dyn WebDriver>> {
        Err(anyhow!("browser not installed"))
    }
}

pub fn test_context() -> Context {
    test_context_with(Arc::new(FakeFactory::default()))
}

pub fn test_context_with(factory: Arc<dyn WebDriverFactory>) -> Context {
    let mut context = Context::new(factory);
    context.max_wait = Duration::from_millis(50);
    context.poll_interval = Duration::from_millis(5);
    context
}

pub fn echo(text: &str) -> Step {
    Step::of(Arc::new(Echo)).put("text", text).build()
}

/// Step of the named built-in type.
pub fn step(context: &Context, type_name: &str) -> crate::step::StepBuilder {
    let step_type = context
        .step_types
        .get(type_name)
        .unwrap_or_else(|| panic!("unknown step type {type_name}"));
    Step::of(step_type)
}
