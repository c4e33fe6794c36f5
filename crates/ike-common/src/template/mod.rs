//! JSON Patch templating for workload clones
//!
//! A strategy names a template that renders to an RFC 6902 patch. The patch
//! is applied to the JSON of the source workload to produce its clone.
//!
//! Templates use standard minijinja syntax and see:
//! - `data` - the source resource
//! - `new_version` - version label of the clone
//! - `vars` - strategy arguments merged over the template defaults
//!
//! Functions: `has(path)`, `value(path)`, `equal(path, value)`,
//! `required(name)`. Shared fragments (`_basic-version`, `_basic-remove`)
//! are pulled in with `{% include %}`.

mod engine;
mod error;
mod functions;
mod json;

pub use engine::{parse_variables, Patch, PatchEngine};
pub use error::TemplateError;
pub use json::Json;
