//! Process-wide configuration handed to every run.

use crate::aspect::Aspect;
use crate::data_source::DataSourceRegistry;
use crate::driver::{BrowserSession, WebDriverFactory};
use crate::input_data::InputData;
use crate::step_type::StepTypeRegistry;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared, read-only settings of a test execution.
#[derive(Debug, Clone)]
pub struct Context {
    /// Applied to every run unless the case prevents it.
    pub aspect: Aspect,
    pub browser: String,
    pub driver_config: Arc<BTreeMap<String, String>>,
    pub base_dir: PathBuf,
    pub data_source_dir: PathBuf,
    /// Reachable from templates as `${env.NAME}`.
    pub env: Arc<BTreeMap<String, String>>,
    pub driver_factory: Arc<dyn WebDriverFactory>,
    pub step_types: Arc<StepTypeRegistry>,
    pub data_sources: Arc<DataSourceRegistry>,
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Context {
    /// Context with built-in step types and data sources.
    pub fn new(driver_factory: Arc<dyn WebDriverFactory>) -> Self {
        Self {
            aspect: Aspect::default(),
            browser: "chrome".to_string(),
            driver_config: Arc::default(),
            base_dir: PathBuf::from("."),
            data_source_dir: PathBuf::from("."),
            env: Arc::default(),
            driver_factory,
            step_types: Arc::new(StepTypeRegistry::with_builtins()),
            data_sources: Arc::new(DataSourceRegistry::with_builtins()),
            max_wait: DEFAULT_MAX_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// A new session that creates its driver on first use.
    pub fn new_session(&self) -> BrowserSession {
        BrowserSession::new(
            Arc::clone(&self.driver_factory),
            Arc::clone(&self.driver_config),
        )
    }

    /// Empty row carrying the environment properties.
    pub fn new_input_data(&self) -> InputData {
        InputData::new().with_env_properties(Arc::clone(&self.env))
    }

    /// Reserved variables describing this context.
    pub fn reserved_vars(&self) -> Vec<(String, String)> {
        vec![
            ("_browser".to_string(), self.browser.clone()),
            (
                "_baseDir".to_string(),
                self.base_dir.to_string_lossy().into_owned(),
            ),
            (
                "_dataSourceDir".to_string(),
                self.data_source_dir.to_string_lossy().into_owned(),
            ),
        ]
    }
}
