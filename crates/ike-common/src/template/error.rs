//! Template error types

use std::fmt;

/// Errors that can occur while rendering or applying a patch template
#[derive(Debug)]
pub enum TemplateError {
    /// No patch registered under the requested name
    UnknownPatch(String),
    /// Template rendering failed (syntax errors and missing variables included)
    Render(minijinja::Error),
    /// Rendered output is not a valid RFC 6902 document
    Decode(serde_json::Error),
    /// Applying the decoded patch to the resource failed
    Apply(json_patch::PatchError),
    /// The resource handed to the engine is not valid JSON
    Resource(serde_json::Error),
    /// A JSON path could not be resolved
    Path(String),
    /// Reading templates from disk failed
    Io {
        /// File or directory involved
        path: String,
        /// Underlying error text
        message: String,
    },
}

impl TemplateError {
    /// Create a path error with the offending path
    pub fn path(path: &str, reason: &str) -> Self {
        Self::Path(format!("{}: {}", reason, path))
    }

    /// Create an I/O error for a file or directory
    pub fn io(path: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPatch(name) => write!(f, "unable to find patch {}", name),
            Self::Render(e) => write!(f, "template render error: {}", e),
            Self::Decode(e) => write!(f, "patch decode error: {}", e),
            Self::Apply(e) => write!(f, "{}", e),
            Self::Resource(e) => write!(f, "resource is not valid json: {}", e),
            Self::Path(msg) => write!(f, "{}", msg),
            Self::Io { path, message } => write!(f, "unable to read {}: {}", path, message),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Render(e) => Some(e),
            Self::Decode(e) | Self::Resource(e) => Some(e),
            Self::Apply(e) => Some(e),
            _ => None,
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        Self::Render(err)
    }
}

impl From<json_patch::PatchError> for TemplateError {
    fn from(err: json_patch::PatchError) -> Self {
        Self::Apply(err)
    }
}
