//! minijinja-backed [`TemplateService`]
//!
//! Templates use the standard Jinja delimiters (`{{ }}`, `{% %}`, `{# #}`)
//! with block trimming on, so control tags on their own lines leave no blank
//! lines behind. Undefined values are strict: a typo in a values path is a
//! render error, and optional keys are tested with `is defined`.

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

use super::{filters, TemplateService, TemplateSet};
use crate::{Error, Result};

/// Template engine for chart template sets
#[derive(Clone)]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

impl TemplateEngine {
    /// Create an engine with the chart filters registered
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);

        env.add_filter("b64enc", filters::b64enc);
        env.add_filter("to_yaml", filters::to_yaml);
        env.add_filter("indent", filters::indent);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("quote", filters::quote);

        Self { env }
    }
}

impl TemplateService for TemplateEngine {
    fn render(&self, set: &TemplateSet, context: &Value) -> Result<BTreeMap<String, String>> {
        let mut env = self.env.clone();
        for &(name, source) in set.templates {
            env.add_template(name, source)
                .map_err(|e| Error::template(format!("{}/{}: {:#}", set.name, name, e)))?;
        }

        let mut rendered = BTreeMap::new();
        for &(name, _) in set.templates {
            let text = env
                .get_template(name)
                .and_then(|t| t.render(context))
                .map_err(|e| Error::template(format!("{}/{}: {:#}", set.name, name, e)))?;
            rendered.insert(name.to_string(), text);
        }
        Ok(rendered)
    }
}
