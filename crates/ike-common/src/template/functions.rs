//! Functions exposed to patch templates
//!
//! - `has(path)`: the resource has a non-null value at `path`
//! - `value(path)`: the value at `path` (none when missing)
//! - `equal(path, expected)`: string comparison of the value at `path`
//! - `required(name)`: the variable `name`, failing when unset or empty

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::{Environment, Error, ErrorKind, Value};

use super::error::TemplateError;
use super::json::Json;

fn to_template_error(err: TemplateError) -> Error {
    Error::new(ErrorKind::InvalidOperation, err.to_string())
}

/// Register the resource and variable accessors on `env`
pub fn register(env: &mut Environment<'_>, data: Arc<Json>, vars: Arc<BTreeMap<String, String>>) {
    let has_data = Arc::clone(&data);
    env.add_function("has", move |path: String| -> Result<bool, Error> {
        has_data.has(&path).map_err(to_template_error)
    });

    let value_data = Arc::clone(&data);
    env.add_function("value", move |path: String| -> Result<Value, Error> {
        value_data
            .value(&path)
            .map(|v| v.map(Value::from_serialize).unwrap_or_else(|| Value::from(())))
            .map_err(to_template_error)
    });

    env.add_function(
        "equal",
        move |path: String, expected: Value| -> Result<bool, Error> {
            let expected = match expected.as_str() {
                Some(s) => s.to_string(),
                None => expected.to_string(),
            };
            data.equal(&path, &expected).map_err(to_template_error)
        },
    );

    env.add_function("required", move |name: String| -> Result<String, Error> {
        required(&vars, &name)
    });
}

/// Look up a variable that must be present and non-empty
pub fn required(vars: &BTreeMap<String, String>, name: &str) -> Result<String, Error> {
    match vars.get(name) {
        Some(value) if !value.is_empty() => Ok(value.clone()),
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("expected {} variable to be set", name),
        )),
    }
}
