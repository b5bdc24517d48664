//! Immutable variable rows used as the binding environment of a run.

use crate::expression;
use indexmap::IndexMap;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Key holding the 1-based position of the current data row.
pub const ROW_NUMBER: &str = "_rowNumber";

/// Upper bound on substitution passes, so `a=${b}`/`b=${a}` terminates.
const MAX_BIND_PASSES: usize = 32;

static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^{}]+?)\}").expect("failed to compile variable regex")
});

static SPECIAL_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\{([A-Z_0-9]+)\}")
        .expect("failed to compile special key regex")
});

/// One row of variables.
///
/// Every modifier returns a new value; the receiver is left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputData {
    row: IndexMap<String, String>,
    last_row: bool,
    env: Arc<BTreeMap<String, String>>,
}

impl InputData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the read-only environment properties reachable as
    /// `${env.NAME}`.
    pub fn with_env_properties(
        mut self,
        env: Arc<BTreeMap<String, String>>,
    ) -> Self {
        self.env = env;
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.row.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.row.contains_key(key)
    }

    pub fn add(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.row.insert(key.into(), value.into());
        next
    }

    /// Add every entry of `other`, overwriting existing keys.
    pub fn add_all<I, K, V>(&self, other: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut next = self.clone();
        for (k, v) in other {
            next.row.insert(k.into(), v.into());
        }
        next
    }

    /// Merge the entries of another row (its flags are ignored).
    pub fn merge(&self, other: &InputData) -> Self {
        self.add_all(other.row.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    pub fn remove(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.row.shift_remove(key);
        next
    }

    pub fn clear_row_number(&self) -> Self {
        self.remove(ROW_NUMBER)
    }

    pub fn row_number(&self) -> Option<usize> {
        self.get(ROW_NUMBER).and_then(|n| n.parse().ok())
    }

    pub fn last_row(&self, last_row: bool) -> Self {
        let mut next = self.clone();
        next.last_row = last_row;
        next
    }

    pub fn is_last_row(&self) -> bool {
        self.last_row
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.row.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }

    /// Entries without the reserved `_` prefix.
    pub fn visible(&self) -> IndexMap<String, String> {
        self.row
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Substitute `${key}`, `${env.NAME}` and `!{KEY_NAME}` until nothing
    /// changes. Unknown keys are left as they are.
    pub fn bind(&self, template: &str) -> String {
        let mut current = template.to_string();
        for _ in 0..MAX_BIND_PASSES {
            let next = self.bind_once(&current);
            if next == current {
                return next;
            }
            current = next;
        }
        debug!("Substitution did not settle for '{}'", template);
        current
    }

    fn bind_once(&self, text: &str) -> String {
        let replaced = VAR_RE.replace_all(text, |caps: &Captures| {
            let key = caps[1].trim();
            if let Some(value) = self.row.get(key) {
                return value.clone();
            }
            if let Some(name) = key.strip_prefix("env.") {
                if let Some(value) = self.env.get(name) {
                    return value.clone();
                }
            }
            caps[0].to_string()
        });
        SPECIAL_KEY_RE
            .replace_all(&replaced, |caps: &Captures| {
                special_key(&caps[1])
                    .map(str::to_string)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Bind, then evaluate each remaining `${...}` as an expression.
    ///
    /// Any evaluation error yields the bound text unchanged.
    pub fn evaluate_string(&self, template: &str) -> String {
        let bound = self.bind(template);
        if !VAR_RE.is_match(&bound) {
            return bound;
        }
        let mut failed = false;
        let evaluated = VAR_RE.replace_all(&bound, |caps: &Captures| {
            match expression::evaluate_to_string(&caps[1], &self.row) {
                Ok(value) => value,
                Err(e) => {
                    debug!("Expression '{}' not evaluated: {}", &caps[1], e);
                    failed = true;
                    caps[0].to_string()
                }
            }
        });
        if failed {
            return bound;
        }
        evaluated.into_owned()
    }

    /// `true` only when the evaluated template reads `true`
    /// (case-insensitive).
    pub fn evaluate(&self, template: &str) -> bool {
        self.evaluate_string(template)
            .trim()
            .eq_ignore_ascii_case("true")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for InputData {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        InputData::new().add_all(iter)
    }
}

/// WebDriver key codes addressable as `!{KEY_*}`.
fn special_key(name: &str) -> Option<&'static str> {
    let code = match name {
        "KEY_NULL" => "\u{E000}",
        "KEY_CANCEL" => "\u{E001}",
        "KEY_HELP" => "\u{E002}",
        "KEY_BACK_SPACE" | "KEY_BACKSPACE" => "\u{E003}",
        "KEY_TAB" => "\u{E004}",
        "KEY_CLEAR" => "\u{E005}",
        "KEY_RETURN" => "\u{E006}",
        "KEY_ENTER" => "\u{E007}",
        "KEY_SHIFT" => "\u{E008}",
        "KEY_CONTROL" => "\u{E009}",
        "KEY_ALT" => "\u{E00A}",
        "KEY_PAUSE" => "\u{E00B}",
        "KEY_ESCAPE" => "\u{E00C}",
        "KEY_SPACE" => "\u{E00D}",
        "KEY_PAGE_UP" => "\u{E00E}",
        "KEY_PAGE_DOWN" => "\u{E00F}",
        "KEY_END" => "\u{E010}",
        "KEY_HOME" => "\u{E011}",
        "KEY_LEFT" | "KEY_ARROW_LEFT" => "\u{E012}",
        "KEY_UP" | "KEY_ARROW_UP" => "\u{E013}",
        "KEY_RIGHT" | "KEY_ARROW_RIGHT" => "\u{E014}",
        "KEY_DOWN" | "KEY_ARROW_DOWN" => "\u{E015}",
        "KEY_INSERT" => "\u{E016}",
        "KEY_DELETE" => "\u{E017}",
        "KEY_SEMICOLON" => "\u{E018}",
        "KEY_EQUALS" => "\u{E019}",
        "KEY_F1" => "\u{E031}",
        "KEY_F2" => "\u{E032}",
        "KEY_F3" => "\u{E033}",
        "KEY_F4" => "\u{E034}",
        "KEY_F5" => "\u{E035}",
        "KEY_F6" => "\u{E036}",
        "KEY_F7" => "\u{E037}",
        "KEY_F8" => "\u{E038}",
        "KEY_F9" => "\u{E039}",
        "KEY_F10" => "\u{E03A}",
        "KEY_F11" => "\u{E03B}",
        "KEY_F12" => "\u{E03C}",
        "KEY_META" | "KEY_COMMAND" => "\u{E03D}",
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_leaves_original_untouched() {
        let env = InputData::new().add("a", "1");
        let next = env.add("b", "2");
        assert_eq!(next.get("b"), Some("2"));
        assert_eq!(env.get("b"), None);
        assert_eq!(env.len(), 1);

        let removed = next.remove("a");
        assert_eq!(next.get("a"), Some("1"));
        assert_eq!(removed.get("a"), None);
    }

    #[test]
    fn test_last_row_and_row_number() {
        let env = InputData::new().add(ROW_NUMBER, "3");
        let flagged = env.last_row(true);
        assert!(!env.is_last_row());
        assert!(flagged.is_last_row());
        assert_eq!(flagged.row_number(), Some(3));
        assert_eq!(flagged.clear_row_number().row_number(), None);
        assert!(flagged.clear_row_number().is_last_row());
    }

    #[test]
    fn test_visible_hides_reserved_keys() {
        let env: InputData =
            [("_browser", "firefox"), ("user", "bob")].into_iter().collect();
        let visible = env.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible.get("user").map(String::as_str), Some("bob"));
    }

    #[test]
    fn test_bind_nested_references() {
        let env: InputData = [
            ("host", "example.com"),
            ("base", "https://${host}"),
            ("url", "${base}/login"),
        ]
        .into_iter()
        .collect();
        assert_eq!(env.bind("open ${url}"), "open https://example.com/login");
        assert_eq!(env.bind("${missing}"), "${missing}");
    }

    #[test]
    fn test_bind_is_idempotent() {
        let env: InputData =
            [("a", "${b}"), ("b", "value"), ("c", "${c}")].into_iter().collect();
        for template in ["${a}-${c}", "${unknown} ${a}", "plain", "!{KEY_TAB}"] {
            let once = env.bind(template);
            assert_eq!(env.bind(&once), once, "template {template}");
        }
    }

    #[test]
    fn test_bind_cycle_terminates() {
        let env: InputData = [("a", "${b}"), ("b", "${a}")].into_iter().collect();
        let bound = env.bind("${a}");
        assert!(bound == "${a}" || bound == "${b}");
    }

    #[test]
    fn test_bind_env_and_special_keys() {
        let mut props = BTreeMap::new();
        props.insert("HOST".to_string(), "localhost".to_string());
        let env = InputData::new().with_env_properties(Arc::new(props));
        assert_eq!(env.bind("http://${env.HOST}/"), "http://localhost/");
        assert_eq!(env.bind("abc!{KEY_ENTER}"), "abc\u{E007}");
        assert_eq!(env.bind("!{NOT_A_KEY}"), "!{NOT_A_KEY}");
    }

    #[test]
    fn test_evaluate_string() {
        let env = InputData::new().add("n", "2").add("name", "x");
        assert_eq!(env.evaluate_string("${n + 3}"), "5");
        assert_eq!(env.evaluate_string("${n}"), "2");
        assert_eq!(env.evaluate_string("id-${name}"), "id-x");
        assert_eq!(env.evaluate_string("${n == 2}"), "true");
    }

    #[test]
    fn test_evaluate_string_fails_closed() {
        let env = InputData::new().add("n", "2");
        assert_eq!(env.evaluate_string("${n +}"), "${n +}");
        assert_eq!(env.evaluate_string("${n} ${undefined_var}"), "2 ${undefined_var}");
    }

    #[test]
    fn test_evaluate() {
        let env = InputData::new().add(ROW_NUMBER, "2").add("flag", "TRUE");
        assert!(env.evaluate("${_rowNumber == 2}"));
        assert!(!env.evaluate("${_rowNumber == 1}"));
        assert!(env.evaluate("${flag}"));
        assert!(env.evaluate("true"));
        assert!(!env.evaluate("yes"));
        assert!(!env.evaluate("${broken ==}"));
    }

    #[test]
    fn test_evaluate_compares_zero_padded_rows_as_text() {
        let env = InputData::new().add("zip", "007");
        assert_eq!(env.evaluate_string("${zip == '007'}"), "true");
        assert!(env.evaluate("${zip == '007'}"));
        assert!(!env.evaluate("${zip == '7'}"));
    }
}
