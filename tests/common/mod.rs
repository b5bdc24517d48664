use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stepchain::{ElementId, Locator, WebDriver, WebDriverFactory};

/// Browser double recording every call it receives.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingDriver {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl WebDriver for RecordingDriver {
    fn navigate(&self, url: &str) -> Result<()> {
        self.record(format!("navigate {url}"));
        Ok(())
    }

    fn current_url(&self) -> Result<String> {
        Ok("http://app.test/home".to_string())
    }

    fn title(&self) -> Result<String> {
        Ok("Home".to_string())
    }

    fn page_source(&self) -> Result<String> {
        Ok("<p>Welcome back</p>".to_string())
    }

    fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementId>> {
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
        Ok(element.0.clone())
    }

    fn quit(&self) -> Result<()> {
        self.record("quit".to_string());
        Ok(())
    }
}

/// Factory handing out [`RecordingDriver`]s that share one call log.
#[derive(Debug, Default)]
pub struct RecordingFactory {
    pub created: AtomicUsize,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingFactory {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl WebDriverFactory for RecordingFactory {
    fn make(&self, _config: &BTreeMap<String, String>) -> Result<Arc<dyn WebDriver>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingDriver {
            calls: Arc::clone(&self.calls),
        }))
    }
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}
