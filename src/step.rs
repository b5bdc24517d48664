//! Steps: immutable units of work handed to a [`StepType`].

use crate::error::RunError;
use crate::input_data::InputData;
use crate::step_type::StepType;
use crate::test_run::{Reported, TestRun};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// How to find an element on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Locator {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self::new("css", value)
    }

    /// Copy with the value bound against `vars`.
    pub fn bind(&self, vars: &InputData) -> Self {
        Self::new(self.kind.clone(), vars.bind(&self.value))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind, self.value)
    }
}

/// What executing one logical step produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub success: bool,
    /// How many entries of the step list this step accounted for.
    pub exec_steps: usize,
}

#[derive(Clone)]
pub struct Step {
    name: Option<String>,
    step_type: Arc<dyn StepType>,
    negated: bool,
    string_params: IndexMap<String, String>,
    locator_params: IndexMap<String, Locator>,
    binary_params: IndexMap<String, Vec<u8>>,
}

impl Step {
    pub fn of(step_type: Arc<dyn StepType>) -> StepBuilder {
        StepBuilder::new(step_type)
    }

    /// Builder pre-filled with this step's content.
    pub fn builder(&self) -> StepBuilder {
        StepBuilder {
            name: self.name.clone(),
            step_type: Arc::clone(&self.step_type),
            negated: self.negated,
            string_params: self.string_params.clone(),
            locator_params: self.locator_params.clone(),
            binary_params: self.binary_params.clone(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn step_type(&self) -> &Arc<dyn StepType> {
        &self.step_type
    }

    pub fn type_name(&self) -> &str {
        self.step_type.name()
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn string_params(&self) -> &IndexMap<String, String> {
        &self.string_params
    }

    pub fn locator_params(&self) -> &IndexMap<String, Locator> {
        &self.locator_params
    }

    pub fn binary_params(&self) -> &IndexMap<String, Vec<u8>> {
        &self.binary_params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.string_params.get(key).map(String::as_str)
    }

    pub fn locator(&self, key: &str) -> Option<&Locator> {
        self.locator_params.get(key)
    }

    pub fn contains_param(&self, key: &str) -> bool {
        self.string_params.contains_key(key)
            || self.locator_params.contains_key(key)
            || self.binary_params.contains_key(key)
    }

    /// Label reported to listeners.
    pub fn display_name(&self, vars: &InputData) -> String {
        match &self.name {
            Some(name) => vars.bind(name),
            None => {
                let mut label = self.type_name().to_string();
                if self.negated {
                    label.insert_str(0, "not ");
                }
                for (key, locator) in &self.locator_params {
                    label.push_str(&format!(" {key}:{}", locator.bind(vars)));
                }
                for (key, value) in &self.string_params {
                    if key != "skip" {
                        label.push_str(&format!(" {key}:{}", vars.bind(value)));
                    }
                }
                label
            }
        }
    }

    /// `true` when the `skip` parameter evaluates true.
    pub fn is_skip(&self, vars: &InputData) -> bool {
        self.param("skip").is_some_and(|skip| vars.evaluate(skip))
    }

    /// Description of this step as `_target.` prefixed variables, for
    /// advice scripts that inspect the step they wrap.
    pub fn to_target_vars(&self) -> IndexMap<String, String> {
        let mut vars = IndexMap::new();
        vars.insert("_target.type".to_string(), self.type_name().to_string());
        vars.insert("_target.negated".to_string(), self.negated.to_string());
        if let Some(name) = &self.name {
            vars.insert("_target.name".to_string(), name.clone());
        }
        for (key, value) in &self.string_params {
            vars.insert(format!("_target.{key}"), value.clone());
        }
        for (key, locator) in &self.locator_params {
            vars.insert(format!("_target.{key}.type"), locator.kind.clone());
            vars.insert(format!("_target.{key}.value"), locator.value.clone());
        }
        vars
    }

    /// Run this step against `run`, whose cursor points at it.
    pub fn execute(&self, run: &mut TestRun) -> Result<StepOutcome, RunError> {
        let exec_steps = self.step_type.exec_steps(run, self).max(1);

        if self.is_skip(run.vars()) {
            debug!(step = self.type_name(), "skip condition met");
            return Ok(StepOutcome {
                success: true,
                exec_steps,
            });
        }

        let advice = run.advice_for(self);
        if !advice.invoke_before(run)? {
            info!(step = self.type_name(), "before advice declined the step");
            return Ok(StepOutcome {
                success: true,
                exec_steps,
            });
        }

        let label = self.display_name(run.vars());
        run.listener().start_test(&label);
        debug!("Executing step: {}", label);

        let success = match self.step_type.run(run) {
            Ok(result) => {
                if result != self.negated {
                    run.process_step_success(&advice, self, &label)?
                } else {
                    run.process_step_failure(&advice, self, &label)?
                }
            }
            Err(err) => {
                // errors of nested steps were already reported by them
                return match err.downcast::<Reported>() {
                    Ok(Reported(inner)) => {
                        run.listener().end_test();
                        Err(inner)
                    }
                    Err(err) => Err(run.process_step_error(&advice, &label, err)),
                };
            }
        };

        Ok(StepOutcome {
            success,
            exec_steps,
        })
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("type", &self.type_name())
            .field("negated", &self.negated)
            .field("string_params", &self.string_params)
            .field("locator_params", &self.locator_params)
            .field("binary_params", &self.binary_params.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PartialEq for Step {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.type_name() == other.type_name()
            && self.negated == other.negated
            && self.string_params == other.string_params
            && self.locator_params == other.locator_params
            && self.binary_params == other.binary_params
    }
}

/// Assembles a [`Step`].
#[derive(Clone)]
pub struct StepBuilder {
    name: Option<String>,
    step_type: Arc<dyn StepType>,
    negated: bool,
    string_params: IndexMap<String, String>,
    locator_params: IndexMap<String, Locator>,
    binary_params: IndexMap<String, Vec<u8>>,
}

impl StepBuilder {
    pub fn new(step_type: Arc<dyn StepType>) -> Self {
        Self {
            name: None,
            step_type,
            negated: false,
            string_params: IndexMap::new(),
            locator_params: IndexMap::new(),
            binary_params: IndexMap::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn negated(mut self, negated: bool) -> Self {
        self.negated = negated;
        self
    }

    pub fn step_type(mut self, step_type: Arc<dyn StepType>) -> Self {
        self.step_type = step_type;
        self
    }

    /// Set a string parameter; drops a locator or binary under the same key.
    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.locator_params.shift_remove(&key);
        self.binary_params.shift_remove(&key);
        self.string_params.insert(key, value.into());
        self
    }

    pub fn locator(mut self, key: impl Into<String>, locator: Locator) -> Self {
        let key = key.into();
        self.string_params.shift_remove(&key);
        self.binary_params.shift_remove(&key);
        self.locator_params.insert(key, locator);
        self
    }

    pub fn binary(mut self, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        let key = key.into();
        self.string_params.shift_remove(&key);
        self.locator_params.shift_remove(&key);
        self.binary_params.insert(key, bytes);
        self
    }

    pub fn remove(mut self, key: &str) -> Self {
        self.string_params.shift_remove(key);
        self.locator_params.shift_remove(key);
        self.binary_params.shift_remove(key);
        self
    }

    pub fn skip(self, condition: impl Into<String>) -> Self {
        self.put("skip", condition)
    }

    pub fn build(self) -> Step {
        Step {
            name: self.name,
            step_type: self.step_type,
            negated: self.negated,
            string_params: self.string_params,
            locator_params: self.locator_params,
            binary_params: self.binary_params,
        }
    }
}
