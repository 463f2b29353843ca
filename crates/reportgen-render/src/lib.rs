//! Report Generator Renderer
//!
//! ```text
//! RenderContext ──▶ Handlebars (sandboxed) ──▶ HTML
//!                                  └──▶ html_to_text ──▶ PdfBackend ──▶ PDF
//! TableSet ─────────────────────────▶ rust_xlsxwriter ──▶ XLSX
//! TableSet ─────────────────────────▶ serde_json ──────▶ JSON
//! ```
//!
//! Template problems (syntax, missing variables, unknown names, disallowed
//! partials) are `ReportError::Template`; backend failures are
//! `ReportError::Render`.

pub mod context;
pub mod excel;
pub mod helpers;
pub mod json;
pub mod pdf;
pub mod renderer;
pub mod templates;

pub use context::RenderContext;
pub use pdf::{html_to_text, PdfBackend, PdfDocument, TextPdf};
pub use renderer::TemplateRenderer;
pub use templates::{TemplateDef, TemplateLibrary, TemplatesFile};

use reportgen_core::{EngineConfig, OutputFormat, Result, TemplateRef};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Renderer {
    templates: TemplateRenderer,
    pdf: Arc<dyn PdfBackend>,
}

impl Renderer {
    pub fn new(library: &TemplateLibrary) -> Result<Self> {
        Self::with_pdf_backend(library, Arc::new(TextPdf::default()))
    }

    pub fn with_pdf_backend(library: &TemplateLibrary, pdf: Arc<dyn PdfBackend>) -> Result<Self> {
        Ok(Self {
            templates: TemplateRenderer::new(library)?,
            pdf,
        })
    }

    /// Load the configured templates file, then the template directory.
    /// Directory templates replace file templates of the same name.
    pub fn load_library(config: &EngineConfig) -> Result<TemplateLibrary> {
        let mut library = TemplateLibrary::new();
        if let Some(path) = &config.templates_file {
            library.merge(TemplateLibrary::from_file(TemplatesFile::load(path)?));
        }
        if let Some(dir) = &config.template_dir {
            library.merge(TemplateLibrary::load_dir(dir)?);
        }
        info!(templates = library.len(), "template library loaded");
        Ok(library)
    }

    pub fn render(&self, template: &TemplateRef, ctx: &RenderContext) -> Result<String> {
        self.templates.render(template, &ctx.to_value())
    }

    pub fn render_to_pdf(&self, template: &TemplateRef, ctx: &RenderContext) -> Result<Vec<u8>> {
        let html = self.render(template, ctx)?;
        let title = ctx
            .parameters
            .get("title")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| ctx.report_id.to_string());
        let doc = PdfDocument {
            title,
            text: html_to_text(&html),
            html,
            created: ctx.generated_at,
        };
        let bytes = self.pdf.render(&doc)?;
        debug!(backend = self.pdf.name(), bytes = bytes.len(), "pdf rendered");
        Ok(bytes)
    }

    pub fn render_to_excel(&self, ctx: &RenderContext) -> Result<Vec<u8>> {
        excel::write_workbook(&ctx.tables, &ctx.parameters)
    }

    pub fn render_to_json(&self, ctx: &RenderContext) -> Result<Vec<u8>> {
        json::write_json(&ctx.tables)
    }

    /// Render in `format`. Excel and JSON are built from the tables directly.
    pub fn render_format(
        &self,
        format: OutputFormat,
        template: &TemplateRef,
        ctx: &RenderContext,
    ) -> Result<Vec<u8>> {
        match format {
            OutputFormat::Html => self.render(template, ctx).map(String::into_bytes),
            OutputFormat::Pdf => self.render_to_pdf(template, ctx),
            OutputFormat::Excel => self.render_to_excel(ctx),
            OutputFormat::Json => self.render_to_json(ctx),
        }
    }

    pub fn check_template(&self, template: &TemplateRef) -> Result<()> {
        self.templates.check(template)
    }

    pub fn list_templates(&self) -> Vec<&str> {
        self.templates.list_templates()
    }
}
