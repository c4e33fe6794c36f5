//! Slash-delimited path lookups over a JSON document
//!
//! Paths look like `/spec/template/spec/containers/0/image`. Object segments
//! are keys, array segments must be numeric indexes. A missing key or an
//! out-of-range index resolves to nothing; a non-numeric index into an array
//! is an error because the template is malformed, not the data.

use serde_json::Value;

use super::error::TemplateError;

/// A parsed resource the template functions query
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Json(Value);

impl Json {
    /// Wrap an already parsed document
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Parse raw resource bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TemplateError> {
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(TemplateError::Resource)
    }

    /// Borrow the underlying document
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take the underlying document
    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Resolve `path`, returning `None` when any segment is missing
    pub fn value(&self, path: &str) -> Result<Option<&Value>, TemplateError> {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() < 2 {
            return Err(TemplateError::path(path, "path must start with /"));
        }

        let mut current = &self.0;
        for segment in &segments[1..] {
            current = match current {
                Value::Object(map) => match map.get(*segment) {
                    Some(next) => next,
                    None => return Ok(None),
                },
                Value::Array(items) => {
                    let index: usize = segment
                        .parse()
                        .map_err(|_| TemplateError::path(path, "non numeric array index"))?;
                    match items.get(index) {
                        Some(next) => next,
                        None => return Ok(None),
                    }
                }
                _ => return Ok(None),
            };
        }
        Ok(Some(current))
    }

    /// True when `path` resolves to a non-null value
    pub fn has(&self, path: &str) -> Result<bool, TemplateError> {
        Ok(matches!(self.value(path)?, Some(v) if !v.is_null()))
    }

    /// Compare the string form of the value at `path` with `expected`
    pub fn equal(&self, path: &str, expected: &str) -> Result<bool, TemplateError> {
        Ok(match self.value(path)? {
            Some(Value::String(s)) => s == expected,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == expected,
        })
    }
}

impl From<Value> for Json {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
