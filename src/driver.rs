//! Browser driver contract and the lazily created, shareable session.

use crate::error::RunError;
use crate::step::Locator;
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Opaque handle of an element returned by [`WebDriver::find_elements`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(pub String);

/// Operations the step types need from a browser.
pub trait WebDriver: Send + Sync + fmt::Debug {
    fn navigate(&self, url: &str) -> Result<()>;
    fn current_url(&self) -> Result<String>;
    fn title(&self) -> Result<String>;
    fn page_source(&self) -> Result<String>;
    fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementId>>;
    fn click(&self, element: &ElementId) -> Result<()>;
    fn clear(&self, element: &ElementId) -> Result<()>;
    fn send_keys(&self, element: &ElementId, text: &str) -> Result<()>;
    fn element_text(&self, element: &ElementId) -> Result<String>;
    fn quit(&self) -> Result<()>;
}

/// Creates drivers from the driver configuration of the context.
pub trait WebDriverFactory: Send + Sync + fmt::Debug {
    fn make(&self, config: &BTreeMap<String, String>) -> Result<Arc<dyn WebDriver>>;
}

type Slot = Arc<Mutex<Option<Arc<dyn WebDriver>>>>;

/// Browser session shared between the runs of one scenario.
///
/// The driver is created on first use. Clones share the same slot, so a
/// quit through any clone is seen by all of them.
#[derive(Clone)]
pub struct BrowserSession {
    slot: Slot,
    factory: Arc<dyn WebDriverFactory>,
    config: Arc<BTreeMap<String, String>>,
}

impl BrowserSession {
    pub fn new(
        factory: Arc<dyn WebDriverFactory>,
        config: Arc<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            factory,
            config,
        }
    }

    /// The driver, created on first call.
    pub fn driver(&self) -> Result<Arc<dyn WebDriver>, RunError> {
        let mut slot = self.lock();
        if let Some(driver) = slot.as_ref() {
            return Ok(Arc::clone(driver));
        }
        debug!("Creating browser driver");
        let driver = self
            .factory
            .make(&self.config)
            .map_err(RunError::DriverCreation)?;
        *slot = Some(Arc::clone(&driver));
        Ok(driver)
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Whether both handles point at the same slot.
    pub fn same_session(&self, other: &BrowserSession) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// A fresh, empty session using the same factory and configuration.
    pub fn fresh(&self) -> Self {
        Self::new(Arc::clone(&self.factory), Arc::clone(&self.config))
    }

    /// Quit the driver if one was created. Later calls are no-ops.
    pub fn quit(&self) {
        let driver = self.lock().take();
        if let Some(driver) = driver {
            info!("Quitting browser driver");
            if let Err(e) = driver.quit() {
                warn!("Failed to quit driver: {:#}", e);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn WebDriver>>> {
        // A poisoned slot still holds a usable driver handle.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for BrowserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserSession")
            .field("active", &self.is_active())
            .field("factory", &self.factory)
            .finish()
    }
}
