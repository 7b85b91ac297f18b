//! Annotation rendering
//!
//! Template rendering belongs to the engine under test. The oracle only needs
//! the literal string each template is expected to render to, so rendering is
//! a seam: a pure `template -> output` function supplied by the caller.

use crate::error::DefinitionError;
use std::collections::HashMap;

/// Renders an annotation template to the string the engine should produce
#[cfg_attr(test, mockall::automock)]
pub trait AnnotationRenderer: Send + Sync {
    fn render(&self, template: &str) -> Result<String, DefinitionError>;
}

/// Renderer backed by a table of known template outputs
///
/// Text without template actions renders to itself. A template that is not
/// in the table is a definition error rather than a guess.
#[derive(Debug, Clone, Default)]
pub struct FixtureRenderer {
    outputs: HashMap<String, String>,
}

impl FixtureRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the expected output of `template`
    pub fn with_output(mut self, template: &str, output: &str) -> Self {
        self.outputs.insert(template.to_string(), output.to_string());
        self
    }
}

impl AnnotationRenderer for FixtureRenderer {
    fn render(&self, template: &str) -> Result<String, DefinitionError> {
        if let Some(output) = self.outputs.get(template) {
            return Ok(output.clone());
        }
        if template.contains("{{") {
            return Err(DefinitionError::UnrenderedTemplate(template.to_string()));
        }
        Ok(template.to_string())
    }
}
