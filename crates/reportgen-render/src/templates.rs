//! Template library loading.
//!
//! Two sources, both trusted configuration read at startup:
//! - a YAML file with named templates (or the legacy single `template:` form)
//! - a directory of `*.hbs` / `*.html` files, named by file stem
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use reportgen_core::{ReportError, Result};

/// Top-level templates file structure
#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesFile {
    #[serde(default = "default_version")]
    pub version: String,
    pub templates: BTreeMap<String, TemplateDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDef {
    #[serde(default)]
    pub description: String,
    pub template: String,
}

/// Legacy single-template file format
#[derive(Debug, Deserialize)]
struct LegacyTemplatesFile {
    template: String,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl TemplatesFile {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(file) = serde_yaml::from_str::<TemplatesFile>(yaml) {
            return Ok(file);
        }
        match serde_yaml::from_str::<LegacyTemplatesFile>(yaml) {
            Ok(legacy) => {
                let mut templates = BTreeMap::new();
                templates.insert(
                    "default".to_string(),
                    TemplateDef {
                        description: "Default template".to_string(),
                        template: legacy.template,
                    },
                );
                Ok(TemplatesFile {
                    version: default_version(),
                    templates,
                })
            }
            Err(e) => Err(ReportError::template(format!(
                "failed to parse templates YAML: {}",
                e
            ))),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReportError::config(format!(
                "failed to read templates file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }
}

/// Template sources by name.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, String>,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(file: TemplatesFile) -> Self {
        Self {
            templates: file
                .templates
                .into_iter()
                .map(|(name, def)| (name, def.template))
                .collect(),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        TemplatesFile::from_yaml(yaml).map(Self::from_file)
    }

    /// Read every `*.hbs` and `*.html` file directly under `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            ReportError::config(format!(
                "failed to read template directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut library = Self::new();
        for entry in entries {
            let path = entry
                .map_err(|e| ReportError::config(format!("template directory entry: {}", e)))?
                .path();
            let is_template = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("hbs") | Some("html")
            );
            let stem = path.file_stem().and_then(|s| s.to_str());
            if let (true, Some(name)) = (is_template && path.is_file(), stem) {
                let body = std::fs::read_to_string(&path).map_err(|e| {
                    ReportError::config(format!("failed to read {}: {}", path.display(), e))
                })?;
                library.insert(name, body);
            }
        }
        Ok(library)
    }

    pub fn insert(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(name.into(), body.into());
    }

    /// Add `other`'s templates; names in `other` win.
    pub fn merge(&mut self, other: TemplateLibrary) {
        self.templates.extend(other.templates);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.templates.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
