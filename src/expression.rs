//! CEL-based evaluation of `${...}` expressions found in step
//! parameters, skip conditions and data-source configs.

use anyhow::{anyhow, Result};
use cel::{Context, Program};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Evaluate `expr` with the row as variable context and render the
/// result as the string a template would contain.
pub fn evaluate_to_string(
    expr: &str,
    row: &IndexMap<String, String>,
) -> Result<String> {
    let program = compile(expr)?;
    let context = build_context(row);
    let result = program
        .execute(&context)
        .map_err(|e| anyhow!("CEL execution error: {e}"))?;

    match cel_to_json(&result)? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Ok(other.to_string()),
    }
}

/// Pre-process an expression so scripts written with JavaScript-style
/// operators keep working.
///
/// Conversions:
/// - `len(x)` → `size(x)`
/// - `===` → `==`, `!==` → `!=`
fn preprocess_expr(expr: &str) -> String {
    use regex::Regex;
    use std::sync::LazyLock;

    static LEN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\blen\(").expect("failed to compile len regex")
    });

    let result = LEN_RE.replace_all(expr, "size(").into_owned();
    result.replace("!==", "!=").replace("===", "==")
}

fn compile(expr: &str) -> Result<Program> {
    let processed = preprocess_expr(expr);
    debug!("Compiling CEL expression: {processed}");
    Program::compile(&processed)
        .map_err(|e| anyhow!("CEL compile error for '{processed}': {e}"))
}

fn build_context<'a>(row: &IndexMap<String, String>) -> Context<'a> {
    let mut context = Context::default();

    for (key, value) in row {
        if is_identifier(key) {
            context.add_variable_from_value(key.as_str(), typed_value(value));
        }
    }

    register_custom_functions(&mut context);
    context
}

fn register_custom_functions(context: &mut Context<'_>) {
    // urlencode(str) - URL-encode a string
    context.add_function("urlencode", |s: Arc<String>| -> Arc<String> {
        Arc::new(
            url::form_urlencoded::byte_serialize(s.as_bytes())
                .collect::<String>(),
        )
    });
}

/// Row values are strings; hand them to CEL with the type they look like.
/// Integers go in as signed so that `count + 1` stays int arithmetic.
/// Zero-padded digits such as `007` stay strings.
fn typed_value(raw: &str) -> cel::Value {
    if let Ok(i) = raw.parse::<i64>() {
        if i.to_string() == raw {
            return cel::Value::Int(i);
        }
    }
    if raw.contains('.') && !is_zero_padded(raw) {
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return cel::Value::Float(f);
            }
        }
    }
    match raw {
        "true" => cel::Value::Bool(true),
        "false" => cel::Value::Bool(false),
        _ => cel::Value::String(Arc::new(raw.to_string())),
    }
}

/// `0123.5`, `+1.5` or `.5` do not read back as the number they parse to.
fn is_zero_padded(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    let int_part = digits.split('.').next().unwrap_or_default();
    int_part.is_empty()
        || !int_part.bytes().all(|b| b.is_ascii_digit())
        || (int_part.len() > 1 && int_part.starts_with('0'))
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn cel_to_json(value: &cel::Value) -> Result<Value> {
    value
        .json()
        .map_err(|e| anyhow!("Failed to convert CEL value to JSON: {e}"))
}
