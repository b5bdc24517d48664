//! Loads scripts, suites and aspect files written as JSON or YAML.
//!
//! Both formats share one document model; YAML documents are read into
//! the same `serde_json::Value` tree as JSON ones.

use crate::aspect::{Aspect, StepInterceptor};
use crate::data_source::DataSourceLoader;
use crate::error::RunError;
use crate::input_data::InputData;
use crate::pointcut::{MatchMethod, Pointcut};
use crate::step::{Locator, Step};
use crate::step_type::StepTypeRegistry;
use crate::test_case::{ScriptFile, TestCase, TestCaseBuilder, TestCaseChains};
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Turns script files into test cases.
pub trait ScriptParser: Send + Sync {
    fn load(&self, path: &Path) -> Result<TestCase>;

    fn load_aspect(&self, path: &Path) -> Result<Aspect>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptDocument {
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    steps: Vec<Value>,
    #[serde(default)]
    data_source: Option<DataSourceDocument>,
    #[serde(default)]
    aspect: Vec<InterceptorDocument>,
    #[serde(default)]
    chains: Vec<EntryDocument>,
    #[serde(default)]
    scripts: Vec<EntryDocument>,
    #[serde(default)]
    share_state: Option<bool>,
    #[serde(default)]
    take_over_last_run: bool,
    #[serde(default)]
    include: Vec<Map<String, Value>>,
    #[serde(default)]
    exclude: Vec<Map<String, Value>>,
}

fn default_kind() -> String {
    "script".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct DataSourceDocument {
    source: String,
    #[serde(default)]
    configs: BTreeMap<String, Value>,
    /// Inline rows for the `manual` source.
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EntryDocument {
    Chain(ChainDocument),
    Script(ScriptEntry),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainDocument {
    chain: Vec<EntryDocument>,
    #[serde(default)]
    take_over_last_run: bool,
    #[serde(default)]
    skip: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptEntry {
    path: String,
    #[serde(default)]
    skip: Option<String>,
    #[serde(default)]
    data_source: Option<DataSourceDocument>,
    #[serde(default)]
    nested_chain: bool,
    #[serde(default)]
    break_nested_chain: bool,
    #[serde(default)]
    share_state: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct AspectDocument {
    #[serde(default)]
    aspect: Vec<InterceptorDocument>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterceptorDocument {
    #[serde(default)]
    pointcut: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    before: Option<Vec<Value>>,
    #[serde(default)]
    after: Option<Vec<Value>>,
    #[serde(default)]
    failure: Option<Vec<Value>>,
    #[serde(default)]
    take_over_chain: bool,
}

/// Parser for the JSON/YAML script format.
#[derive(Debug, Clone)]
pub struct JsonScriptParser {
    step_types: Arc<StepTypeRegistry>,
}

impl JsonScriptParser {
    pub fn new(step_types: Arc<StepTypeRegistry>) -> Self {
        Self { step_types }
    }

    fn read_document<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read script: {}", path.display()))?;
        if is_yaml(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML from {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON from {}", path.display()))
        }
    }

    /// Build a case from an in-memory document.
    pub fn parse_value(&self, value: Value, script: ScriptFile) -> Result<TestCase> {
        let document: ScriptDocument = serde_json::from_value(value)
            .with_context(|| format!("Invalid script document '{}'", script.name()))?;
        self.build_case(document, script)
    }

    fn build_case(&self, document: ScriptDocument, script: ScriptFile) -> Result<TestCase> {
        let script = match &document.name {
            Some(name) => script.with_name(name.clone()),
            None => script,
        };
        let dir = script.relative_dir().to_path_buf();

        let mut builder = match document.kind.as_str() {
            "script" => TestCase::builder(script.clone()).steps(self.parse_steps(&document.steps)?),
            "suite" => {
                let share_state = document.share_state.unwrap_or(true);
                let mut chains = TestCaseChains::new().take_over_last_run(document.take_over_last_run);
                for entry in &document.scripts {
                    chains = chains.append(self.parse_entry(entry, &dir, share_state)?);
                }
                TestCase::suite(script.clone(), chains)
            }
            other => bail!("Unknown script type '{}' in {}", other, script.name()),
        };

        if let Some(data_source) = &document.data_source {
            builder = builder.data_source(data_source_loader(data_source, &dir)?);
        }
        if !document.aspect.is_empty() {
            builder = builder.aspect(self.parse_interceptors(&document.aspect, &dir)?);
        }
        if !document.chains.is_empty() {
            let mut chains = TestCaseChains::new().take_over_last_run(document.take_over_last_run);
            for entry in &document.chains {
                chains = chains.append(self.parse_entry(entry, &dir, false)?);
            }
            builder = builder.chains(chains);
        }
        if let Some(share_state) = document.share_state {
            builder = builder.share_state(share_state);
        }
        if !document.include.is_empty() {
            builder = builder.include(parse_pointcut(&document.include)?);
        }
        if !document.exclude.is_empty() {
            builder = builder.exclude(parse_pointcut(&document.exclude)?);
        }

        let case = builder.build();
        debug!("Parsed {:?}", case);
        Ok(case)
    }

    fn parse_entry(&self, entry: &EntryDocument, dir: &Path, share_state: bool) -> Result<TestCase> {
        match entry {
            EntryDocument::Chain(chain) => {
                let mut chains = TestCaseChains::new().take_over_last_run(chain.take_over_last_run);
                for child in &chain.chain {
                    chains = chains.append(self.parse_entry(child, dir, share_state)?);
                }
                let mut builder =
                    TestCase::suite(ScriptFile::new("chain").with_relative_dir(dir), chains);
                if let Some(skip) = &chain.skip {
                    builder = builder.skip(skip.clone());
                }
                Ok(builder.build())
            }
            EntryDocument::Script(script) => self.parse_script_entry(script, dir, share_state),
        }
    }

    fn parse_script_entry(&self, entry: &ScriptEntry, dir: &Path, share_state: bool) -> Result<TestCase> {
        let overrides = EntryOverrides::new(entry, dir, share_state)?;
        if entry.path.contains("${") {
            let parser = self.clone();
            let template = entry.path.clone();
            let base = dir.to_path_buf();
            let apply = overrides.clone();
            let script = ScriptFile::new(template.clone()).with_relative_dir(dir);
            let builder = TestCase::lazy(script, move |_, vars: &InputData| {
                let path = base.join(vars.bind(&template));
                parser
                    .load(&path)
                    .map(|case| apply.apply(case))
                    .map_err(|source| RunError::Load {
                        name: path.display().to_string(),
                        source,
                    })
            });
            return Ok(overrides.apply_builder(builder).build());
        }
        let case = self.load(&dir.join(&entry.path))?;
        Ok(overrides.apply(case))
    }

    fn parse_steps(&self, steps: &[Value]) -> Result<Vec<Step>> {
        steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                self.parse_step(step)
                    .with_context(|| format!("Failed to parse step {}", i + 1))
            })
            .collect()
    }

    fn parse_step(&self, value: &Value) -> Result<Step> {
        let Value::Object(fields) = value else {
            bail!("step must be an object, found {}", value);
        };
        let type_name = fields
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("step has no type"))?;
        let step_type = self
            .step_types
            .get(type_name)
            .ok_or_else(|| anyhow!("unknown step type '{}'", type_name))?;

        let mut builder = Step::of(step_type);
        for (key, value) in fields {
            builder = match (key.as_str(), value) {
                ("type", _) => builder,
                ("negated", value) => builder.negated(as_bool(value)),
                ("name", value) => builder.name(scalar(value)),
                (_, Value::Object(object)) if is_locator(object) => {
                    builder.locator(key.clone(), locator(object)?)
                }
                (_, value) => builder.put(key.clone(), scalar(value)),
            };
        }
        Ok(builder.build())
    }

    fn advice_case(&self, steps: &[Value], name: &str, dir: &Path) -> Result<TestCase> {
        Ok(TestCase::builder(ScriptFile::new(name).with_relative_dir(dir))
            .steps(self.parse_steps(steps)?)
            .build())
    }

    fn parse_interceptors(&self, documents: &[InterceptorDocument], dir: &Path) -> Result<Aspect> {
        let mut aspect = Aspect::new();
        for document in documents {
            let mut interceptor = StepInterceptor::new().take_over(document.take_over_chain);
            if let Some(pointcut) = &document.pointcut {
                interceptor = interceptor.pointcut(parse_pointcut(pointcut)?);
            }
            if let Some(steps) = &document.before {
                interceptor = interceptor.before(self.advice_case(steps, "before", dir)?);
            }
            if let Some(steps) = &document.after {
                interceptor = interceptor.after(self.advice_case(steps, "after", dir)?);
            }
            if let Some(steps) = &document.failure {
                interceptor = interceptor.failure(self.advice_case(steps, "failure", dir)?);
            }
            aspect = aspect.with(interceptor);
        }
        Ok(aspect)
    }
}

impl ScriptParser for JsonScriptParser {
    fn load(&self, path: &Path) -> Result<TestCase> {
        info!("Loading script from {}", path.display());
        let document: ScriptDocument = Self::read_document(path)?;
        self.build_case(document, ScriptFile::from_path(path))
            .with_context(|| format!("Failed to load script: {}", path.display()))
    }

    fn load_aspect(&self, path: &Path) -> Result<Aspect> {
        info!("Loading aspect from {}", path.display());
        let document: AspectDocument = Self::read_document(path)?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.parse_interceptors(&document.aspect, &dir)
            .with_context(|| format!("Failed to load aspect: {}", path.display()))
    }
}

/// Settings a chain or suite entry imposes on the case it points to.
#[derive(Debug, Clone)]
struct EntryOverrides {
    skip: Option<String>,
    data_source: Option<DataSourceLoader>,
    nested_chain: bool,
    break_nested_chain: bool,
    share_state: bool,
}

impl EntryOverrides {
    fn new(entry: &ScriptEntry, dir: &Path, share_state: bool) -> Result<Self> {
        Ok(Self {
            skip: entry.skip.clone(),
            data_source: entry
                .data_source
                .as_ref()
                .map(|d| data_source_loader(d, dir))
                .transpose()?,
            nested_chain: entry.nested_chain,
            break_nested_chain: entry.break_nested_chain,
            share_state: entry.share_state.unwrap_or(share_state),
        })
    }

    fn apply_builder(&self, mut builder: TestCaseBuilder) -> TestCaseBuilder {
        if let Some(skip) = &self.skip {
            builder = builder.skip(skip.clone());
        }
        builder
            .override_data_source(self.data_source.clone())
            .nested_chain(self.nested_chain)
            .break_nested_chain(self.break_nested_chain)
            .share_state(self.share_state)
    }

    fn apply(&self, case: TestCase) -> TestCase {
        case.map(|b| self.apply_builder(b))
    }
}

fn data_source_loader(document: &DataSourceDocument, dir: &Path) -> Result<DataSourceLoader> {
    let mut config: BTreeMap<String, String> = document
        .configs
        .iter()
        .map(|(k, v)| (k.clone(), scalar(v)))
        .collect();
    if let Some(data) = &document.data {
        config.insert("data".to_string(), serde_json::to_string(data)?);
    }
    Ok(DataSourceLoader::new(document.source.clone(), config, PathBuf::from(dir)))
}

/// Entries of the list are ORed; the keys of each entry are ANDed.
fn parse_pointcut(entries: &[Map<String, Value>]) -> Result<Pointcut> {
    let mut pointcut = Pointcut::None;
    for entry in entries {
        pointcut = pointcut.or(parse_pointcut_entry(entry)?);
    }
    Ok(pointcut)
}

fn parse_pointcut_entry(entry: &Map<String, Value>) -> Result<Pointcut> {
    let mut pointcut = Pointcut::Any;
    for (key, value) in entry {
        let filter = match (key.as_str(), value) {
            ("type", Value::Array(names)) => {
                Pointcut::StepType(names.iter().map(scalar).collect())
            }
            ("type", name) => Pointcut::StepType(vec![scalar(name)]),
            ("negated", value) => Pointcut::Negated(as_bool(value)),
            ("skip", value) => Pointcut::Skip(as_bool(value)),
            ("not", Value::Object(inner)) => parse_pointcut_entry(inner)?.not(),
            ("not", Value::Array(inner)) => {
                let inner: Vec<Map<String, Value>> = inner
                    .iter()
                    .map(|v| v.as_object().cloned().ok_or_else(|| anyhow!("invalid not entry")))
                    .collect::<Result<_>>()?;
                parse_pointcut(&inner)?.not()
            }
            (_, Value::Object(object)) if object.contains_key("method") => {
                let method_name = object.get("method").map(scalar).unwrap_or_default();
                let method = MatchMethod::parse(&method_name)
                    .ok_or_else(|| anyhow!("unknown match method '{}'", method_name))?;
                Pointcut::StringParam {
                    key: key.clone(),
                    value: object.get("value").map(scalar).unwrap_or_default(),
                    method,
                }
            }
            (_, Value::Object(object)) if is_locator(object) => Pointcut::Locator {
                key: key.clone(),
                locator: locator(object)?,
            },
            (_, value) => Pointcut::param(key.clone(), scalar(value)),
        };
        pointcut = pointcut.and(filter);
    }
    Ok(pointcut)
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

fn is_locator(object: &Map<String, Value>) -> bool {
    object.contains_key("type") && object.contains_key("value") && !object.contains_key("method")
}

fn locator(object: &Map<String, Value>) -> Result<Locator> {
    let kind = object.get("type").map(scalar).ok_or_else(|| anyhow!("locator has no type"))?;
    let value = object.get("value").map(scalar).ok_or_else(|| anyhow!("locator has no value"))?;
    Ok(Locator::new(kind, value))
}

/// String form of a parameter value; strings are taken unquoted.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> JsonScriptParser {
        JsonScriptParser::new(Arc::new(StepTypeRegistry::with_builtins()))
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_json_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "login.json",
            &json!({
                "type": "script",
                "steps": [
                    {"type": "get", "url": "${baseUrl}/login"},
                    {"type": "setElementText", "locator": {"type": "css", "value": "#user"}, "text": "${user}"},
                    {"type": "verifyTextPresent", "text": "Welcome", "negated": true, "skip": "${_rowNumber == 2}"},
                    {"type": "pause", "waitTime": 10}
                ],
                "dataSource": {"source": "csv", "configs": {"path": "users.csv"}}
            })
            .to_string(),
        );

        let case = parser().load(&path).unwrap();
        assert_eq!(case.name(), "login");
        assert_eq!(case.relative_dir(), dir.path());
        assert_eq!(case.steps().len(), 4);
        assert_eq!(case.steps()[0].type_name(), "get");
        assert_eq!(case.steps()[1].locator("locator"), Some(&Locator::css("#user")));
        assert!(case.steps()[2].is_negated());
        assert_eq!(case.steps()[2].param("skip"), Some("${_rowNumber == 2}"));
        assert_eq!(case.steps()[3].param("waitTime"), Some("10"));
        let loader = case.data_source_loader();
        assert_eq!(loader.source(), "csv");
        assert_eq!(loader.config().get("path").map(String::as_str), Some("users.csv"));
        assert_eq!(loader.relative_dir(), dir.path());
    }

    #[test]
    fn test_load_yaml_script_with_manual_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "search.yaml",
            "steps:\n  - type: echo\n    text: ${q}\ndataSource:\n  source: manual\n  data:\n    - q: rust\n    - q: cel\n",
        );
        let case = parser().load(&path).unwrap();
        assert_eq!(case.steps().len(), 1);
        let data = case.data_source_loader().config().get("data").unwrap();
        let rows: Value = serde_json::from_str(data).unwrap();
        assert_eq!(rows, json!([{"q": "rust"}, {"q": "cel"}]));
    }

    #[test]
    fn test_unknown_step_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.json", r#"{"steps":[{"type":"teleport"}]}"#);
        let err = parser().load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("unknown step type 'teleport'"));
    }

    #[test]
    fn test_suite_with_chain_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.json", r#"{"steps":[{"type":"echo","text":"a"}]}"#);
        write(dir.path(), "b.json", r#"{"steps":[{"type":"echo","text":"b"}]}"#);
        let suite = write(
            dir.path(),
            "suite.json",
            &json!({
                "type": "suite",
                "scripts": [
                    {"path": "a.json", "skip": "${skipA}"},
                    {"chain": [
                        {"path": "a.json"},
                        {"path": "b.json", "nestedChain": true, "shareState": false,
                         "dataSource": {"source": "manual", "data": [{"x": "1"}]}}
                    ], "takeOverLastRun": true}
                ]
            })
            .to_string(),
        );

        let case = parser().load(&suite).unwrap();
        assert!(case.is_suite());
        assert!(case.is_share_state());
        let children = case.chains().cases();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].skip(), "${skipA}");
        assert!(children[0].is_share_state());

        let chain = &children[1];
        assert!(chain.is_suite());
        assert!(chain.chains().is_take_over_last_run());
        let links = chain.chains().cases();
        assert_eq!(links[0].name(), "a");
        assert!(links[1].is_nested_chain());
        assert!(!links[1].is_share_state());
        assert_eq!(links[1].effective_loader().source(), "manual");
    }

    #[test]
    fn test_lazy_entry_resolves_against_vars() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "page_en.json", r#"{"steps":[{"type":"echo","text":"en"}]}"#);
        let suite = write(
            dir.path(),
            "suite.json",
            r#"{"type":"suite","scripts":[{"path":"page_${lang}.json","nestedChain":true}]}"#,
        );
        let case = parser().load(&suite).unwrap();
        let lazy = &case.chains().cases()[0];
        assert!(lazy.is_lazy());

        let loaded = lazy.materialize(&InputData::new().add("lang", "en")).unwrap();
        assert!(!loaded.is_lazy());
        assert_eq!(loaded.name(), "page_en");
        assert!(loaded.is_nested_chain());

        let err = lazy.materialize(&InputData::new().add("lang", "fr")).unwrap_err();
        assert!(matches!(err, RunError::Load { .. }));
    }

    #[test]
    fn test_aspect_pointcuts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "aspect.json",
            &json!({
                "aspect": [{
                    "pointcut": [
                        {"type": "clickElement", "locator": {"type": "css", "value": "#ok"}},
                        {"type": ["get", "echo"], "text": {"method": "startsWith", "value": "he"}},
                        {"not": {"negated": false}}
                    ],
                    "before": [{"type": "echo", "text": "before"}],
                    "takeOverChain": true
                }]
            })
            .to_string(),
        );
        let aspect = parser().load_aspect(&path).unwrap();
        assert_eq!(aspect.len(), 1);
        assert!(aspect.interceptors()[0].take_over_chain());

        let entries: Vec<Map<String, Value>> = serde_json::from_value(json!([
            {"type": "clickElement", "locator": {"type": "css", "value": "#ok"}},
            {"type": ["get", "echo"], "text": {"method": "startsWith", "value": "he"}},
            {"not": {"negated": false}}
        ]))
        .unwrap();
        let pointcut = parse_pointcut(&entries).unwrap();
        let registry = StepTypeRegistry::with_builtins();
        let vars = InputData::new();
        let step = |name: &str| Step::of(registry.get(name).unwrap());

        assert!(pointcut.is_handle(&step("clickElement").locator("locator", Locator::css("#ok")).build(), &vars));
        assert!(!pointcut.is_handle(&step("clickElement").locator("locator", Locator::css("#no")).build(), &vars));
        assert!(pointcut.is_handle(&step("echo").put("text", "hello").build(), &vars));
        assert!(!pointcut.is_handle(&step("echo").put("text", "bye").build(), &vars));
        assert!(pointcut.is_handle(&step("echo").put("text", "bye").negated(true).build(), &vars));
    }

    #[test]
    fn test_unknown_match_method() {
        let entries: Vec<Map<String, Value>> =
            serde_json::from_value(json!([{"text": {"method": "sounds like", "value": "x"}}])).unwrap();
        assert!(parse_pointcut(&entries).is_err());
    }
}
