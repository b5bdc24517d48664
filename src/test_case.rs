//! Test cases and the chains linking them into scenarios.

use crate::aspect::Aspect;
use crate::context::Context;
use crate::data_source::DataSourceLoader;
use crate::error::RunError;
use crate::input_data::InputData;
use crate::pointcut::Pointcut;
use crate::step::Step;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Identity of the script a case was read from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptFile {
    name: String,
    path: Option<PathBuf>,
    relative_dir: PathBuf,
}

impl ScriptFile {
    /// A script with no backing file.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            relative_dir: PathBuf::new(),
        }
    }

    /// Named after the file stem; relative paths resolve from its directory.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            name,
            path: Some(path.to_path_buf()),
            relative_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn relative_dir(&self) -> &Path {
        &self.relative_dir
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn with_relative_dir(&self, relative_dir: impl Into<PathBuf>) -> Self {
        Self {
            relative_dir: relative_dir.into(),
            ..self.clone()
        }
    }

    fn same_identity(&self, other: &ScriptFile) -> bool {
        match (&self.path, &other.path) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.name == other.name,
            _ => false,
        }
    }
}

/// Resolves a lazily loaded case against the variables of the run that
/// reaches it.
pub type LazyLoad = dyn Fn(&TestCase, &InputData) -> Result<TestCase, RunError> + Send + Sync;

/// Ordered children of a case.
#[derive(Debug, Clone, Default)]
pub struct TestCaseChains {
    cases: Vec<Arc<TestCase>>,
    take_over_last_run: bool,
}

impl TestCaseChains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_over_last_run(mut self, take_over: bool) -> Self {
        self.take_over_last_run = take_over;
        self
    }

    pub fn is_take_over_last_run(&self) -> bool {
        self.take_over_last_run
    }

    /// Append `case`. A case sharing the identity of an earlier child is
    /// renamed to `name(n)`, with `n` the smallest suffix not yet taken.
    pub fn append(&self, case: TestCase) -> Self {
        let collides = self
            .cases
            .iter()
            .any(|c| c.script.same_identity(&case.script));
        let case = if collides {
            let name = (1..)
                .map(|n| format!("{}({})", case.name(), n))
                .find(|name| self.cases.iter().all(|c| c.name() != name))
                .unwrap_or_default();
            case.map(|b| b.script(case.script.with_name(name)))
        } else {
            case
        };
        let mut cases = self.cases.clone();
        cases.push(Arc::new(case));
        Self {
            cases,
            take_over_last_run: self.take_over_last_run,
        }
    }

    pub fn cases(&self) -> &[Arc<TestCase>] {
        &self.cases
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }
}

/// Immutable script: steps plus everything governing how they run.
#[derive(Clone)]
pub struct TestCase {
    script: ScriptFile,
    steps: Vec<Step>,
    data_source_loader: DataSourceLoader,
    override_data_source_loader: Option<DataSourceLoader>,
    aspect: Aspect,
    include: Pointcut,
    exclude: Pointcut,
    share_state: bool,
    skip: String,
    chains: TestCaseChains,
    nested_chain: bool,
    break_nested_chain: bool,
    prevent_context_aspect: bool,
    suite: bool,
    lazy_load: Option<Arc<LazyLoad>>,
}

impl TestCase {
    pub fn builder(script: ScriptFile) -> TestCaseBuilder {
        TestCaseBuilder::new(script)
    }

    /// Suite head chaining `chains`. A suite always shares state.
    pub fn suite(script: ScriptFile, chains: TestCaseChains) -> TestCaseBuilder {
        let mut builder = TestCaseBuilder::new(script).chains(chains);
        builder.case.suite = true;
        builder
    }

    /// Placeholder resolved by `load` when a run reaches it.
    pub fn lazy<F>(script: ScriptFile, load: F) -> TestCaseBuilder
    where
        F: Fn(&TestCase, &InputData) -> Result<TestCase, RunError> + Send + Sync + 'static,
    {
        let mut builder = TestCaseBuilder::new(script);
        builder.case.lazy_load = Some(Arc::new(load));
        builder
    }

    /// Derived copy.
    pub fn map(&self, f: impl FnOnce(TestCaseBuilder) -> TestCaseBuilder) -> TestCase {
        f(TestCaseBuilder { case: self.clone() }).build()
    }

    pub fn script(&self) -> &ScriptFile {
        &self.script
    }

    pub fn name(&self) -> &str {
        self.script.name()
    }

    pub fn path(&self) -> Option<&Path> {
        self.script.path()
    }

    pub fn relative_dir(&self) -> &Path {
        self.script.relative_dir()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn data_source_loader(&self) -> &DataSourceLoader {
        &self.data_source_loader
    }

    pub fn override_data_source_loader(&self) -> Option<&DataSourceLoader> {
        self.override_data_source_loader.as_ref()
    }

    /// The override loader when set, otherwise the case's own.
    pub fn effective_loader(&self) -> &DataSourceLoader {
        self.override_data_source_loader
            .as_ref()
            .unwrap_or(&self.data_source_loader)
    }

    pub fn aspect(&self) -> &Aspect {
        &self.aspect
    }

    pub fn include(&self) -> &Pointcut {
        &self.include
    }

    pub fn exclude(&self) -> &Pointcut {
        &self.exclude
    }

    pub fn is_share_state(&self) -> bool {
        self.share_state
    }

    pub fn skip(&self) -> &str {
        &self.skip
    }

    pub fn chains(&self) -> &TestCaseChains {
        &self.chains
    }

    pub fn has_chain(&self) -> bool {
        !self.chains.is_empty()
    }

    pub fn is_nested_chain(&self) -> bool {
        self.nested_chain
    }

    pub fn is_break_nested_chain(&self) -> bool {
        self.break_nested_chain
    }

    pub fn is_prevent_context_aspect(&self) -> bool {
        self.prevent_context_aspect
    }

    pub fn is_suite(&self) -> bool {
        self.suite
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy_load.is_some()
    }

    pub fn is_skip(&self, vars: &InputData) -> bool {
        vars.evaluate(&self.skip)
    }

    /// Whether `step` passes the include and exclude filters.
    pub fn is_included(&self, step: &Step, vars: &InputData) -> bool {
        self.include.is_handle(step, vars) && !self.exclude.is_handle(step, vars)
    }

    /// The loaded case for a lazy placeholder, `self` otherwise.
    pub fn materialize(&self, vars: &InputData) -> Result<TestCase, RunError> {
        match &self.lazy_load {
            Some(load) => {
                debug!("Loading lazy test case '{}'", self.name());
                let mut loaded = load(self, vars)?;
                loaded.lazy_load = None;
                Ok(loaded)
            }
            None => Ok(self.clone()),
        }
    }

    pub fn load_data(&self, context: &Context, vars: &InputData) -> Result<Vec<InputData>, RunError> {
        self.effective_loader().load_data(context, vars)
    }

    pub fn is_multi_line(&self, context: &Context) -> bool {
        self.effective_loader().is_multi_line(context)
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("script", &self.script)
            .field("steps", &self.steps.len())
            .field("data_source", &self.effective_loader().source())
            .field("share_state", &self.share_state)
            .field("skip", &self.skip)
            .field("chains", &self.chains.len())
            .field("nested_chain", &self.nested_chain)
            .field("break_nested_chain", &self.break_nested_chain)
            .field("suite", &self.suite)
            .field("lazy", &self.is_lazy())
            .finish()
    }
}

/// Assembles a [`TestCase`].
#[derive(Clone)]
pub struct TestCaseBuilder {
    case: TestCase,
}

impl TestCaseBuilder {
    pub fn new(script: ScriptFile) -> Self {
        let relative_dir = script.relative_dir().to_path_buf();
        Self {
            case: TestCase {
                script,
                steps: Vec::new(),
                data_source_loader: DataSourceLoader::none().with_relative_dir(relative_dir),
                override_data_source_loader: None,
                aspect: Aspect::default(),
                include: Pointcut::Any,
                exclude: Pointcut::None,
                share_state: false,
                skip: "false".to_string(),
                chains: TestCaseChains::default(),
                nested_chain: false,
                break_nested_chain: false,
                prevent_context_aspect: false,
                suite: false,
                lazy_load: None,
            },
        }
    }

    pub fn script(mut self, script: ScriptFile) -> Self {
        self.case.script = script;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.case.script = self.case.script.with_name(name);
        self
    }

    pub fn steps(mut self, steps: Vec<Step>) -> Self {
        self.case.steps = steps;
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.case.steps.push(step);
        self
    }

    pub fn data_source(mut self, loader: DataSourceLoader) -> Self {
        self.case.data_source_loader = loader;
        self
    }

    pub fn override_data_source(mut self, loader: Option<DataSourceLoader>) -> Self {
        self.case.override_data_source_loader = loader;
        self
    }

    pub fn aspect(mut self, aspect: Aspect) -> Self {
        self.case.aspect = aspect;
        self
    }

    pub fn include(mut self, pointcut: Pointcut) -> Self {
        self.case.include = pointcut;
        self
    }

    pub fn exclude(mut self, pointcut: Pointcut) -> Self {
        self.case.exclude = pointcut;
        self
    }

    pub fn share_state(mut self, share_state: bool) -> Self {
        self.case.share_state = share_state;
        self
    }

    pub fn skip(mut self, skip: impl Into<String>) -> Self {
        self.case.skip = skip.into();
        self
    }

    pub fn chains(mut self, chains: TestCaseChains) -> Self {
        self.case.chains = chains;
        self
    }

    /// Append one chained child, renaming it on identity collisions.
    pub fn chain(mut self, case: TestCase) -> Self {
        self.case.chains = self.case.chains.append(case);
        self
    }

    pub fn nested_chain(mut self, nested: bool) -> Self {
        self.case.nested_chain = nested;
        self
    }

    pub fn break_nested_chain(mut self, brk: bool) -> Self {
        self.case.break_nested_chain = brk;
        self
    }

    pub fn prevent_context_aspect(mut self, prevent: bool) -> Self {
        self.case.prevent_context_aspect = prevent;
        self
    }

    pub fn build(mut self) -> TestCase {
        if self.case.suite {
            self.case.share_state = true;
        }
        self.case
    }
}
