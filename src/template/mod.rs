//! Templating service for chart rendering
//!
//! A [`TemplateSet`] is a named, ordered list of template documents. A
//! [`TemplateService`] renders every document of a set against one context
//! and returns the results keyed by template name; the caller decides how to
//! assemble them. [`TemplateEngine`] is the minijinja implementation.
//!
//! Templates see a context of the shape
//! `{ Values: <tree>, Release: { Namespace, Service } }`.

mod engine;
mod filters;

use std::collections::BTreeMap;

#[cfg(test)]
use mockall::automock;
use serde_json::Value;

use crate::Result;

pub use engine::TemplateEngine;

/// A named template set, in declared render order
#[derive(Debug, Clone, Copy)]
pub struct TemplateSet {
    /// Chart name, used in error messages
    pub name: &'static str,
    /// `(template name, source)` pairs
    pub templates: &'static [(&'static str, &'static str)],
}

impl TemplateSet {
    /// Template names in declared order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.templates.iter().map(|(name, _)| *name)
    }
}

/// Renders a template set against a value context
#[cfg_attr(test, automock)]
pub trait TemplateService: Send + Sync {
    /// Render every template in `set`, keyed by template name
    fn render(&self, set: &TemplateSet, context: &Value) -> Result<BTreeMap<String, String>>;
}
