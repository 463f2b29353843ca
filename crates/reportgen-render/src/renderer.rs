//! Sandboxed Handlebars renderer.
//!
//! Templates see only the JSON context they are given. The registry runs in
//! strict mode with HTML escaping, registers no directory source and no
//! partials beyond the library itself, and only pure helpers are installed.
use handlebars::Handlebars;
use reportgen_core::{ReportError, Result, TemplateRef};
use serde_json::Value;
use tracing::debug;

use crate::helpers;
use crate::templates::TemplateLibrary;

pub struct TemplateRenderer {
    registry: Handlebars<'static>,
}

impl TemplateRenderer {
    /// Compile every library template. A syntax error fails construction.
    pub fn new(library: &TemplateLibrary) -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.set_dev_mode(false);
        helpers::register(&mut registry);

        for (name, body) in library.iter() {
            registry
                .register_template_string(name, body)
                .map_err(|e| ReportError::template(format!("template '{}': {}", name, e)))?;
        }

        Ok(Self { registry })
    }

    pub fn render(&self, template: &TemplateRef, data: &Value) -> Result<String> {
        let rendered = match template {
            TemplateRef::Name(name) => {
                if !self.registry.has_template(name) {
                    return Err(ReportError::template(format!("unknown template '{}'", name)));
                }
                self.registry.render(name, data)
            }
            TemplateRef::Inline(body) => self.registry.render_template(body, data),
        };
        let out = rendered.map_err(|e| {
            ReportError::template(format!("{}: {}", template.describe(), e))
        })?;
        debug!(template = %template.describe(), bytes = out.len(), "template rendered");
        Ok(out)
    }

    /// Resolve a named template or compile an inline one without rendering.
    pub fn check(&self, template: &TemplateRef) -> Result<()> {
        match template {
            TemplateRef::Name(name) if self.registry.has_template(name) => Ok(()),
            TemplateRef::Name(name) => Err(ReportError::template(format!(
                "unknown template '{}'",
                name
            ))),
            TemplateRef::Inline(body) => handlebars::Template::compile(body)
                .map(|_| ())
                .map_err(|e| ReportError::template(format!("inline template: {}", e))),
        }
    }

    pub fn list_templates(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .registry
            .get_templates()
            .keys()
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }
}
