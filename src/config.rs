//! Settings file and discovery of script files.

use crate::aspect::Aspect;
use crate::context::{Context as RunContext, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL};
use crate::driver::WebDriverFactory;
use crate::parser::{JsonScriptParser, ScriptParser};
use crate::report::ReportFormat;
use crate::test_case::TestCase;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Execution settings, usually read from `stepchain.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub browser: String,
    /// Passed to the driver factory, e.g. `url` of the WebDriver server.
    pub driver_config: BTreeMap<String, String>,
    pub base_dir: PathBuf,
    pub data_source_dir: PathBuf,
    pub result_dir: PathBuf,
    /// Aspect file applied to every run.
    pub aspect: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub max_wait_ms: u64,
    pub poll_interval_ms: u64,
    pub report_format: ReportFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            browser: "chrome".to_string(),
            driver_config: BTreeMap::new(),
            base_dir: PathBuf::from("."),
            data_source_dir: PathBuf::from("."),
            result_dir: PathBuf::from("result"),
            aspect: None,
            env: BTreeMap::new(),
            max_wait_ms: DEFAULT_MAX_WAIT.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            report_format: ReportFormat::default(),
        }
    }
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse settings YAML")
    }

    /// Settings from `path`; relative directories resolve from its folder.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading settings from {}", path.display());
        let content = fs::read_to_string(path)
            .context(format!("Failed to read settings file: {}", path.display()))?;
        let mut settings = Self::from_yaml(&content)
            .context(format!("Failed to load settings from {}", path.display()))?;
        if let Some(dir) = path.parent() {
            settings.resolve_relative_to(dir);
        }
        Ok(settings)
    }

    fn resolve_relative_to(&mut self, dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        resolve(&mut self.base_dir);
        resolve(&mut self.data_source_dir);
        resolve(&mut self.result_dir);
        if let Some(aspect) = self.aspect.as_mut() {
            resolve(aspect);
        }
    }

    /// Context for `factory`, with the settings' aspect file loaded.
    pub fn build_context(&self, factory: Arc<dyn WebDriverFactory>) -> Result<RunContext> {
        let mut context = RunContext::new(factory);
        context.browser = self.browser.clone();
        let mut driver_config = self.driver_config.clone();
        driver_config
            .entry("browser".to_string())
            .or_insert_with(|| self.browser.clone());
        context.driver_config = Arc::new(driver_config);
        context.base_dir = self.base_dir.clone();
        context.data_source_dir = self.data_source_dir.clone();
        context.env = Arc::new(self.env.clone());
        context.max_wait = Duration::from_millis(self.max_wait_ms);
        context.poll_interval = Duration::from_millis(self.poll_interval_ms);
        context.aspect = match &self.aspect {
            Some(path) => JsonScriptParser::new(Arc::clone(&context.step_types))
                .load_aspect(path)
                .context(format!("Failed to load aspect: {}", path.display()))?,
            None => Aspect::default(),
        };
        Ok(context)
    }
}

/// Finds and loads script files.
#[derive(Debug)]
pub struct ScriptConfigManager {
    pub script_paths: Vec<PathBuf>,
    parser: JsonScriptParser,
}

impl ScriptConfigManager {
    pub fn new(parser: JsonScriptParser) -> Self {
        Self {
            script_paths: Vec::new(),
            parser,
        }
    }

    pub fn add_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.script_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn load_script<P: AsRef<Path>>(&self, path: P) -> Result<TestCase> {
        let path = path.as_ref();
        let case = self
            .parser
            .load(path)
            .context(format!("Failed to load script: {}", path.display()))?;
        debug!("Successfully loaded script: {}", case.name());
        Ok(case)
    }

    /// Every script directly inside `dir`, sorted by file name. Files that
    /// fail to parse are skipped.
    pub fn load_scripts_from_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<TestCase>> {
        let dir = dir.as_ref();
        info!("Loading scripts from directory: {}", dir.display());

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).context(format!("Failed to read directory: {}", dir.display()))? {
            let path = entry?.path();
            if path.is_file() && is_script_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut cases = Vec::new();
        for path in paths {
            match self.load_script(&path) {
                Ok(case) => cases.push(case),
                Err(err) => {
                    debug!("Failed to load script from {}: {:#}", path.display(), err);
                }
            }
        }

        info!("Loaded {} scripts from {}", cases.len(), dir.display());
        Ok(cases)
    }

    pub fn load_all_scripts(&self) -> Result<Vec<TestCase>> {
        let mut all = Vec::new();
        for path in &self.script_paths {
            if path.is_dir() {
                match self.load_scripts_from_dir(path) {
                    Ok(mut cases) => all.append(&mut cases),
                    Err(err) => {
                        debug!("Failed to load scripts from {}: {}", path.display(), err);
                    }
                }
            } else if path.is_file() {
                all.push(self.load_script(path)?);
            }
        }
        info!("Loaded {} scripts in total", all.len());
        Ok(all)
    }
}

/// `.json`, `.yaml` or `.yml`, excluding settings files.
fn is_script_file(path: &Path) -> bool {
    let is_settings = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s == "stepchain");
    !is_settings
        && path
            .extension()
            .is_some_and(|ext| ext == "json" || ext == "yaml" || ext == "yml")
}
