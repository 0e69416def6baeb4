//! Server templates.
//!
//! Templates are YAML files loaded once at startup. Each one names a container
//! specification, a flat server-config overlay merged into the container
//! environment, and optional lifecycle hooks:
//!
//! ```yaml
//! name: lobby
//! container:
//!   image: ghcr.io/example/lobby:1.4
//!   ports:
//!     - host: 0
//!       container: 5520
//! server:
//!   MAX_PLAYERS: "16"
//! hooks:
//!   pre_start: http://auth.internal/tokens
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::provider::ContainerSpec;

/// Template loading errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The templates directory could not be read.
    #[error("failed to read templates directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lifecycle hooks declared by a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hooks {
    /// URL called before the container is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_start: Option<String>,
}

/// A named server template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Template name, used by callers to select it.
    pub name: String,

    /// Container specification shared by every server built from this template.
    pub container: ContainerSpec,

    /// Server config overlay merged into the environment.
    #[serde(default)]
    pub server: BTreeMap<String, String>,

    /// Lifecycle hooks.
    #[serde(default)]
    pub hooks: Hooks,
}

impl Template {
    /// The pre-start hook URL, if declared and non-empty.
    pub fn pre_start_hook(&self) -> Option<&str> {
        self.hooks.pre_start.as_deref().filter(|url| !url.is_empty())
    }
}

/// Read-only set of templates keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: HashMap<String, Template>,
}

fn is_template_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl TemplateStore {
    /// Build a store from already-parsed templates.
    pub fn from_templates(templates: impl IntoIterator<Item = Template>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|template| (template.name.clone(), template))
                .collect(),
        }
    }

    /// Load every `*.yaml` / `*.yml` file in `dir`.
    ///
    /// Files that cannot be read or parsed are skipped. Only an unreadable
    /// directory is an error.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| TemplateError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_template_file(path))
            .collect();
        paths.sort();

        let mut templates = HashMap::new();
        for path in paths {
            let contents = match std::fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable template");
                    continue;
                }
            };

            let template: Template = match serde_yaml::from_str(&contents) {
                Ok(template) => template,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping malformed template");
                    continue;
                }
            };

            if template.name.trim().is_empty() {
                warn!(path = %path.display(), "Skipping template without a name");
                continue;
            }
            // Names become server ID prefixes, which cannot contain these.
            if template
                .name
                .chars()
                .any(|c| c.is_whitespace() || c.is_control())
            {
                warn!(
                    path = %path.display(),
                    name = %template.name.escape_debug(),
                    "Skipping template with an invalid name"
                );
                continue;
            }

            debug!(name = %template.name, path = %path.display(), "Loaded template");
            if let Some(previous) = templates.insert(template.name.clone(), template) {
                warn!(
                    name = %previous.name,
                    path = %path.display(),
                    "Duplicate template name, later file wins"
                );
            }
        }

        info!(dir = %dir.display(), count = templates.len(), "Templates loaded");
        Ok(Self { templates })
    }

    /// Look up a template by name.
    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// Template names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true if no templates are loaded.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
