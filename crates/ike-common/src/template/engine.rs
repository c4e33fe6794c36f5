//! Patch engine
//!
//! A patch is a named minijinja template that renders to an RFC 6902 JSON
//! Patch document. Rendering sees the source resource through the functions
//! in [`super::functions`] and a context of `{data, new_version, vars}`. The
//! rendered patch is decoded and applied to the resource, producing the clone.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use minijinja::{context, Environment, UndefinedBehavior};
use tracing::debug;

use super::error::TemplateError;
use super::functions;
use super::json::Json;

/// Extension of patch template files
const TEMPLATE_EXTENSION: &str = "tpl";
/// Extension of the default variables file next to a template
const VARIABLES_EXTENSION: &str = "var";

const BUILTIN: &[(&str, &str, &str)] = &[
    (
        "_basic-version",
        include_str!("templates/_basic-version.tpl"),
        "",
    ),
    (
        "_basic-remove",
        include_str!("templates/_basic-remove.tpl"),
        "",
    ),
    (
        "prepared-image",
        include_str!("templates/prepared-image.tpl"),
        include_str!("templates/prepared-image.var"),
    ),
    (
        "telepresence",
        include_str!("templates/telepresence.tpl"),
        include_str!("templates/telepresence.var"),
    ),
];

/// A named patch template with its default variables
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    /// Name used as the strategy of a ref
    pub name: String,
    /// minijinja source rendering to a JSON Patch array
    pub template: String,
    /// Defaults merged under the caller's variables
    pub variables: BTreeMap<String, String>,
}

impl Patch {
    /// Create a patch from its parts
    pub fn new(
        name: impl Into<String>,
        template: impl Into<String>,
        variables: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            variables,
        }
    }
}

/// Parse `key=value` lines; blank lines and `#` comments are skipped
pub fn parse_variables(source: &str) -> BTreeMap<String, String> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            line.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Registry of patches and the entry point for rendering them
#[derive(Clone, Debug)]
pub struct PatchEngine {
    patches: BTreeMap<String, Patch>,
}

impl Default for PatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchEngine {
    /// Engine with the built-in strategies
    pub fn new() -> Self {
        let patches = BUILTIN
            .iter()
            .map(|(name, template, vars)| {
                (
                    name.to_string(),
                    Patch::new(*name, *template, parse_variables(vars)),
                )
            })
            .collect();
        Self { patches }
    }

    /// Engine with built-ins plus every `*.tpl` under `dir`
    ///
    /// Files override built-ins with the same name.
    pub fn with_template_dir(dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let mut engine = Self::new();
        for patch in load_dir(dir.as_ref())? {
            engine.add(patch);
        }
        Ok(engine)
    }

    /// Register or replace a patch
    pub fn add(&mut self, patch: Patch) {
        debug!(name = %patch.name, "registering patch template");
        self.patches.insert(patch.name.clone(), patch);
    }

    /// Look up a patch by name
    pub fn get(&self, name: &str) -> Option<&Patch> {
        self.patches.get(name)
    }

    /// Names of every registered patch, shared fragments included
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patches.keys().map(String::as_str)
    }

    /// Render patch `name` against `resource` and apply it
    ///
    /// `vars` are layered over the patch defaults. The returned bytes are the
    /// patched resource as JSON.
    pub fn run(
        &self,
        name: &str,
        resource: &[u8],
        new_version: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>, TemplateError> {
        let patch = self
            .get(name)
            .ok_or_else(|| TemplateError::UnknownPatch(name.to_string()))?;

        let mut variables = patch.variables.clone();
        variables.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));

        let data = Json::from_slice(resource)?;
        let rendered = self.render(name, &data, new_version, variables)?;

        let ops: json_patch::Patch =
            serde_json::from_str(&rendered).map_err(TemplateError::Decode)?;
        let mut document = data.into_inner();
        json_patch::patch(&mut document, &ops.0)?;

        serde_json::to_vec(&document).map_err(TemplateError::Resource)
    }

    fn render(
        &self,
        name: &str,
        data: &Json,
        new_version: &str,
        variables: BTreeMap<String, String>,
    ) -> Result<String, TemplateError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        for patch in self.patches.values() {
            env.add_template(&patch.name, &patch.template)?;
        }

        let variables = Arc::new(variables);
        functions::register(&mut env, Arc::new(data.clone()), Arc::clone(&variables));

        let template = env.get_template(name)?;
        let rendered = template.render(context! {
            data => data.as_value(),
            new_version => new_version,
            vars => variables.as_ref(),
        })?;
        Ok(rendered)
    }
}

fn load_dir(dir: &Path) -> Result<Vec<Patch>, TemplateError> {
    let display = dir.display().to_string();
    let entries = std::fs::read_dir(dir).map_err(|e| TemplateError::io(&display, e))?;

    let mut patches = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| TemplateError::io(&display, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let template = std::fs::read_to_string(&path)
            .map_err(|e| TemplateError::io(path.display().to_string(), e))?;
        let var_path = path.with_extension(VARIABLES_EXTENSION);
        let variables = if var_path.exists() {
            let source = std::fs::read_to_string(&var_path)
                .map_err(|e| TemplateError::io(var_path.display().to_string(), e))?;
            parse_variables(&source)
        } else {
            BTreeMap::new()
        };

        patches.push(Patch::new(name, template, variables));
    }
    Ok(patches)
}
