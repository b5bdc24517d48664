//! Predicates selecting the steps an interceptor or step filter applies to.

use crate::input_data::InputData;
use crate::step::{Locator, Step};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// How a string parameter is compared with the expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMethod {
    #[default]
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
}

impl MatchMethod {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "equals" | "equal" => Some(Self::Equals),
            "contains" => Some(Self::Contains),
            "startsWith" => Some(Self::StartsWith),
            "endsWith" => Some(Self::EndsWith),
            "matches" => Some(Self::Matches),
            _ => None,
        }
    }

    pub fn is_match(&self, actual: &str, expected: &str) -> bool {
        match self {
            Self::Equals => actual == expected,
            Self::Contains => actual.contains(expected),
            Self::StartsWith => actual.starts_with(expected),
            Self::EndsWith => actual.ends_with(expected),
            Self::Matches => Regex::new(expected)
                .map(|re| re.is_match(actual))
                .unwrap_or(false),
        }
    }
}

type Predicate = dyn Fn(&Step, &InputData) -> bool + Send + Sync;

#[derive(Clone)]
pub enum Pointcut {
    Any,
    None,
    /// Step type name, any of the listed.
    StepType(Vec<String>),
    Negated(bool),
    /// Whether the step's skip condition holds.
    Skip(bool),
    StringParam {
        key: String,
        value: String,
        method: MatchMethod,
    },
    Locator {
        key: String,
        locator: Locator,
    },
    And(Box<Pointcut>, Box<Pointcut>),
    Or(Box<Pointcut>, Box<Pointcut>),
    Not(Box<Pointcut>),
    Custom(Arc<Predicate>),
}

impl Pointcut {
    pub fn step_type(name: impl Into<String>) -> Self {
        Pointcut::StepType(vec![name.into()])
    }

    pub fn param(key: impl Into<String>, value: impl Into<String>) -> Self {
        Pointcut::StringParam {
            key: key.into(),
            value: value.into(),
            method: MatchMethod::Equals,
        }
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Step, &InputData) -> bool + Send + Sync + 'static,
    {
        Pointcut::Custom(Arc::new(predicate))
    }

    pub fn and(self, other: Pointcut) -> Self {
        match (self, other) {
            (Pointcut::Any, other) | (other, Pointcut::Any) => other,
            (left, right) => Pointcut::And(Box::new(left), Box::new(right)),
        }
    }

    pub fn or(self, other: Pointcut) -> Self {
        match (self, other) {
            (Pointcut::None, other) | (other, Pointcut::None) => other,
            (left, right) => Pointcut::Or(Box::new(left), Box::new(right)),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Pointcut::Not(Box::new(self))
    }

    /// Whether `step` is selected under `vars`. Expected values are bound
    /// against `vars` first; actual parameter values are bound as well.
    pub fn is_handle(&self, step: &Step, vars: &InputData) -> bool {
        match self {
            Pointcut::Any => true,
            Pointcut::None => false,
            Pointcut::StepType(names) => {
                names.iter().any(|n| vars.bind(n) == step.type_name())
            }
            Pointcut::Negated(negated) => step.is_negated() == *negated,
            Pointcut::Skip(skip) => step.is_skip(vars) == *skip,
            Pointcut::StringParam { key, value, method } => step
                .param(key)
                .is_some_and(|actual| {
                    method.is_match(&vars.bind(actual), &vars.bind(value))
                }),
            Pointcut::Locator { key, locator } => {
                step.locator(key).is_some_and(|actual| {
                    actual.bind(vars) == locator.bind(vars)
                })
            }
            Pointcut::And(left, right) => {
                left.is_handle(step, vars) && right.is_handle(step, vars)
            }
            Pointcut::Or(left, right) => {
                left.is_handle(step, vars) || right.is_handle(step, vars)
            }
            Pointcut::Not(inner) => !inner.is_handle(step, vars),
            Pointcut::Custom(predicate) => predicate(step, vars),
        }
    }

    /// Copy with every expected value bound against `vars`, freezing
    /// templates at the moment a run starts.
    pub fn materialize(&self, vars: &InputData) -> Self {
        match self {
            Pointcut::StepType(names) => {
                Pointcut::StepType(names.iter().map(|n| vars.bind(n)).collect())
            }
            Pointcut::StringParam { key, value, method } => Pointcut::StringParam {
                key: key.clone(),
                value: vars.bind(value),
                method: *method,
            },
            Pointcut::Locator { key, locator } => Pointcut::Locator {
                key: key.clone(),
                locator: locator.bind(vars),
            },
            Pointcut::And(left, right) => Pointcut::And(
                Box::new(left.materialize(vars)),
                Box::new(right.materialize(vars)),
            ),
            Pointcut::Or(left, right) => Pointcut::Or(
                Box::new(left.materialize(vars)),
                Box::new(right.materialize(vars)),
            ),
            Pointcut::Not(inner) => Pointcut::Not(Box::new(inner.materialize(vars))),
            other => other.clone(),
        }
    }
}

impl fmt::Debug for Pointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pointcut::Any => write!(f, "Any"),
            Pointcut::None => write!(f, "None"),
            Pointcut::StepType(names) => write!(f, "StepType({names:?})"),
            Pointcut::Negated(n) => write!(f, "Negated({n})"),
            Pointcut::Skip(s) => write!(f, "Skip({s})"),
            Pointcut::StringParam { key, value, method } => {
                write!(f, "StringParam({key} {method:?} {value})")
            }
            Pointcut::Locator { key, locator } => write!(f, "Locator({key}={locator})"),
            Pointcut::And(l, r) => write!(f, "And({l:?}, {r:?})"),
            Pointcut::Or(l, r) => write!(f, "Or({l:?}, {r:?})"),
            Pointcut::Not(inner) => write!(f, "Not({inner:?})"),
            Pointcut::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step_type::{ClickElement, Echo};

    fn click(selector: &str) -> Step {
        Step::of(Arc::new(ClickElement))
            .locator("locator", Locator::css(selector))
            .build()
    }

    #[test]
    fn test_step_type_and_param() {
        let echo = Step::of(Arc::new(Echo)).put("text", "hello world").build();
        let vars = InputData::new();
        assert!(Pointcut::step_type("echo").is_handle(&echo, &vars));
        assert!(!Pointcut::step_type("clickElement").is_handle(&echo, &vars));
        assert!(Pointcut::param("text", "hello world").is_handle(&echo, &vars));

        let contains = Pointcut::StringParam {
            key: "text".into(),
            value: "world".into(),
            method: MatchMethod::Contains,
        };
        assert!(contains.is_handle(&echo, &vars));
        assert!(!contains.is_handle(&click("#a"), &vars));
    }

    #[test]
    fn test_locator_is_bound() {
        let vars = InputData::new().add("id", "submit");
        let pointcut = Pointcut::Locator {
            key: "locator".into(),
            locator: Locator::css("#${id}"),
        };
        assert!(pointcut.is_handle(&click("#submit"), &vars));
        assert!(!pointcut.is_handle(&click("#cancel"), &vars));
    }

    #[test]
    fn test_combinators() {
        let vars = InputData::new();
        let step = click("#a");
        let click_type = Pointcut::step_type("clickElement");
        assert!(click_type.clone().and(Pointcut::Negated(false)).is_handle(&step, &vars));
        assert!(!click_type.clone().and(Pointcut::Negated(true)).is_handle(&step, &vars));
        assert!(Pointcut::None.or(click_type.clone()).is_handle(&step, &vars));
        assert!(!click_type.not().is_handle(&step, &vars));
        assert!(Pointcut::Any.is_handle(&step, &vars));
        assert!(!Pointcut::None.is_handle(&step, &vars));
    }

    #[test]
    fn test_skip_pointcut() {
        let step = Step::of(Arc::new(Echo)).skip("${flag}").build();
        let on = InputData::new().add("flag", "true");
        let off = InputData::new().add("flag", "false");
        assert!(Pointcut::Skip(true).is_handle(&step, &on));
        assert!(Pointcut::Skip(false).is_handle(&step, &off));
    }

    #[test]
    fn test_materialize_freezes_templates() {
        let pointcut = Pointcut::step_type("${kind}");
        let frozen = pointcut.materialize(&InputData::new().add("kind", "echo"));
        let echo = Step::of(Arc::new(Echo)).build();
        assert!(frozen.is_handle(&echo, &InputData::new().add("kind", "other")));
        assert!(!pointcut.is_handle(&echo, &InputData::new().add("kind", "other")));
    }

    #[test]
    fn test_match_method_parse() {
        assert_eq!(MatchMethod::parse("startsWith"), Some(MatchMethod::StartsWith));
        assert_eq!(MatchMethod::parse("bogus"), None);
        assert!(MatchMethod::Matches.is_match("abc123", r"^abc\d+$"));
        assert!(!MatchMethod::Matches.is_match("abc", "("));
    }
}
