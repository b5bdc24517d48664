//! Data sources turning a case's configuration into rows of variables.

use crate::context::Context;
use crate::error::RunError;
use crate::input_data::{InputData, ROW_NUMBER};
use anyhow::{anyhow, bail, Context as _, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NONE: &str = "none";

/// Producer of data rows for a test case.
pub trait DataSource: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Whether `config` carries what this source needs.
    fn is_loadable(&self, config: &BTreeMap<String, String>) -> bool;

    /// Raw rows. Files are looked up in `search_dirs` in order.
    fn get_data(
        &self,
        config: &BTreeMap<String, String>,
        search_dirs: &[PathBuf],
        vars: &InputData,
    ) -> Result<Vec<InputData>>;

    /// Whether rows are tagged with `_rowNumber` and reported per row.
    fn enable_multi_line(&self) -> bool {
        true
    }
}

/// Resolve `file` against each of `dirs`, falling back to `file` itself.
pub fn resolve_path(file: &str, dirs: &[PathBuf]) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    dirs.iter()
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

fn required<'a>(config: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    config
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing '{key}' in data source config"))
}

/// Single empty row.
#[derive(Debug, Clone, Copy)]
pub struct NoDataSource;

impl DataSource for NoDataSource {
    fn name(&self) -> &str {
        NONE
    }

    fn is_loadable(&self, _config: &BTreeMap<String, String>) -> bool {
        true
    }

    fn get_data(
        &self,
        _config: &BTreeMap<String, String>,
        _search_dirs: &[PathBuf],
        _vars: &InputData,
    ) -> Result<Vec<InputData>> {
        Ok(vec![InputData::new()])
    }

    fn enable_multi_line(&self) -> bool {
        false
    }
}

/// Rows of a CSV file with a header line. Config: `path`, optional
/// `delimiter` (one character).
#[derive(Debug, Clone, Copy)]
pub struct CsvDataSource;

impl DataSource for CsvDataSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn is_loadable(&self, config: &BTreeMap<String, String>) -> bool {
        config.contains_key("path")
    }

    fn get_data(
        &self,
        config: &BTreeMap<String, String>,
        search_dirs: &[PathBuf],
        _vars: &InputData,
    ) -> Result<Vec<InputData>> {
        let path = resolve_path(required(config, "path")?, search_dirs);
        let delimiter = match config.get("delimiter").map(String::as_bytes) {
            Some([b]) => *b,
            Some(_) => bail!("delimiter must be a single byte"),
            None => b',',
        };
        debug!("Reading CSV data from {}", path.display());

        let file = File::open(&path)
            .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .from_reader(file);
        let headers = reader.headers().context("Failed to read CSV header")?.clone();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context("Failed to parse CSV record")?;
            rows.push(
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }
        Ok(rows)
    }
}

fn json_rows(value: Value) -> Result<Vec<InputData>> {
    let Value::Array(items) = value else {
        bail!("JSON data must be an array of objects");
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s,
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (k, v)
                })
                .collect()),
            other => Err(anyhow!("JSON data row is not an object: {other}")),
        })
        .collect()
}

/// Rows of a JSON file holding an array of objects. Config: `path`.
#[derive(Debug, Clone, Copy)]
pub struct JsonDataSource;

impl DataSource for JsonDataSource {
    fn name(&self) -> &str {
        "json"
    }

    fn is_loadable(&self, config: &BTreeMap<String, String>) -> bool {
        config.contains_key("path")
    }

    fn get_data(
        &self,
        config: &BTreeMap<String, String>,
        search_dirs: &[PathBuf],
        _vars: &InputData,
    ) -> Result<Vec<InputData>> {
        let path = resolve_path(required(config, "path")?, search_dirs);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read JSON data: {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON data: {}", path.display()))?;
        json_rows(value)
    }
}

/// Rows written inline in the script, held as a JSON array under `data`.
#[derive(Debug, Clone, Copy)]
pub struct ManualDataSource;

impl DataSource for ManualDataSource {
    fn name(&self) -> &str {
        "manual"
    }

    fn is_loadable(&self, config: &BTreeMap<String, String>) -> bool {
        config.contains_key("data")
    }

    fn get_data(
        &self,
        config: &BTreeMap<String, String>,
        _search_dirs: &[PathBuf],
        _vars: &InputData,
    ) -> Result<Vec<InputData>> {
        let value: Value = serde_json::from_str(required(config, "data")?)
            .context("Failed to parse manual data rows")?;
        json_rows(value)
    }
}

/// Open registry of data sources keyed by name.
#[derive(Debug, Clone, Default)]
pub struct DataSourceRegistry {
    sources: BTreeMap<String, Arc<dyn DataSource>>,
}

impl DataSourceRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry
            .register(Arc::new(NoDataSource))
            .register(Arc::new(CsvDataSource))
            .register(Arc::new(JsonDataSource))
            .register(Arc::new(ManualDataSource));
        registry
    }

    pub fn register(&mut self, source: Arc<dyn DataSource>) -> &mut Self {
        self.sources.insert(source.name().to_string(), source);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DataSource>> {
        self.sources.get(name).cloned()
    }
}

/// A case's data source selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceLoader {
    source: String,
    config: BTreeMap<String, String>,
    relative_dir: PathBuf,
}

impl Default for DataSourceLoader {
    fn default() -> Self {
        Self::none()
    }
}

impl DataSourceLoader {
    pub fn new(
        source: impl Into<String>,
        config: BTreeMap<String, String>,
        relative_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            config,
            relative_dir: relative_dir.into(),
        }
    }

    pub fn none() -> Self {
        Self::new(NONE, BTreeMap::new(), PathBuf::new())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    pub fn relative_dir(&self) -> &Path {
        &self.relative_dir
    }

    pub fn is_none(&self) -> bool {
        self.source == NONE
    }

    pub fn with_relative_dir(&self, relative_dir: impl Into<PathBuf>) -> Self {
        Self {
            relative_dir: relative_dir.into(),
            ..self.clone()
        }
    }

    fn data_source(&self, context: &Context) -> Result<Arc<dyn DataSource>, RunError> {
        context
            .data_sources
            .get(&self.source)
            .ok_or_else(|| RunError::DataSource {
                name: self.source.clone(),
                source: anyhow!("unknown data source"),
            })
    }

    pub fn is_multi_line(&self, context: &Context) -> bool {
        self.data_source(context)
            .map(|s| s.enable_multi_line())
            .unwrap_or(false)
    }

    /// Rows for one run each. Multi-line sources tag every row with its
    /// 1-based `_rowNumber`; the final row is flagged as the last one.
    pub fn load_data(
        &self,
        context: &Context,
        vars: &InputData,
    ) -> Result<Vec<InputData>, RunError> {
        let source = self.data_source(context)?;
        let config: BTreeMap<String, String> = self
            .config
            .iter()
            .map(|(k, v)| (k.clone(), vars.bind(v)))
            .collect();
        let data_err = |source: anyhow::Error| RunError::DataSource {
            name: self.source.clone(),
            source,
        };
        if !source.is_loadable(&config) {
            return Err(data_err(anyhow!("incomplete config: {:?}", config)));
        }

        let search_dirs = vec![self.relative_dir.clone(), context.data_source_dir.clone()];
        let rows = source
            .get_data(&config, &search_dirs, vars)
            .map_err(data_err)?;
        if rows.is_empty() {
            warn!("Data source '{}' produced no rows", self.source);
            return Ok(Vec::new());
        }
        info!("Loaded {} rows from data source '{}'", rows.len(), self.source);

        let multi_line = source.enable_multi_line();
        let last = rows.len() - 1;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let row = if multi_line {
                    row.add(ROW_NUMBER, (i + 1).to_string())
                } else {
                    row
                };
                row.last_row(i == last)
            })
            .collect())
    }
}
