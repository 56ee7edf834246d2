//! Values-overrides: `--values`, `--set`, `--set-string`
//!
//! These sit between the compiled defaults and the typed flags. All three are
//! merged into one sparse document, in that order, later sources winning.

use std::path::PathBuf;

use clap::Args;
use serde_json::{Number, Value};
use tracing::debug;

use crate::{tree, yaml, Error, Result};

/// Raw values-override inputs as given on the command line
#[derive(Debug, Clone, Default, Args)]
pub struct ValueOptions {
    /// Specify values in a YAML file (can specify multiple)
    #[arg(short = 'f', long = "values", value_name = "FILE")]
    pub values_files: Vec<PathBuf>,

    /// Set values on the command line (can specify multiple or separate values with commas: key1=val1,key2=val2)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Set STRING values on the command line (can specify multiple or separate values with commas: key1=val1,key2=val2)
    #[arg(long = "set-string", value_name = "KEY=VALUE")]
    pub set_string: Vec<String>,
}

impl ValueOptions {
    /// Whether any override was given
    pub fn is_empty(&self) -> bool {
        self.values_files.is_empty() && self.set.is_empty() && self.set_string.is_empty()
    }

    /// Merge every source into one nested document.
    pub fn merge_values(&self) -> Result<Value> {
        let mut merged = Value::Object(Default::default());

        for path in &self.values_files {
            let text = std::fs::read_to_string(path).map_err(|e| {
                Error::input(format!("failed to read values file {}: {}", path.display(), e))
            })?;
            let doc = yaml::parse_yaml(&text).map_err(|e| {
                Error::input(format!("failed to parse values file {}: {}", path.display(), e))
            })?;
            match doc {
                Value::Null => {}
                Value::Object(_) => tree::merge_into(&mut merged, &doc),
                _ => {
                    return Err(Error::input(format!(
                        "values file {} must contain a mapping",
                        path.display()
                    )))
                }
            }
            debug!(file = %path.display(), "merged values file");
        }

        for expr in &self.set {
            apply_set(&mut merged, expr, parse_typed)?;
        }
        for expr in &self.set_string {
            apply_set(&mut merged, expr, |raw| Value::String(raw.to_string()))?;
        }

        Ok(merged)
    }
}

fn apply_set(root: &mut Value, expr: &str, convert: impl Fn(&str) -> Value) -> Result<()> {
    for pair in expr.split(',').filter(|p| !p.is_empty()) {
        let (path, raw) = pair.split_once('=').ok_or_else(|| {
            Error::input(format!("failed parsing --set data: key \"{}\" has no value", pair))
        })?;
        let path = path.trim();
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(Error::input(format!(
                "failed parsing --set data: invalid key \"{}\"",
                path
            )));
        }
        tree::set_path(root, path, convert(raw));
    }
    Ok(())
}

/// Typed scalar for `--set`: booleans, `null`, integers, else text
fn parse_typed(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => raw
            .parse::<i64>()
            .map(|n| Value::Number(Number::from(n)))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn set_parses_scalars_and_nests_paths() {
        let opts = ValueOptions {
            set: vec![
                "proxy.logLevel=debug,controllerReplicas=3".to_string(),
                "proxyInit.runAsRoot=true".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(
            opts.merge_values().unwrap(),
            json!({
                "proxy": {"logLevel": "debug"},
                "controllerReplicas": 3,
                "proxyInit": {"runAsRoot": true}
            })
        );
    }

    #[test]
    fn set_string_keeps_text() {
        let opts = ValueOptions {
            set: vec!["proxy.image.version=1".to_string()],
            set_string: vec!["proxyInit.image.version=2".to_string()],
            ..Default::default()
        };
        let merged = opts.merge_values().unwrap();
        assert_eq!(merged["proxy"]["image"]["version"], json!(1));
        assert_eq!(merged["proxyInit"]["image"]["version"], json!("2"));
    }

    #[test]
    fn later_sources_win() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "clusterDomain: file.local\nproxy:\n  logLevel: info").unwrap();

        let opts = ValueOptions {
            values_files: vec![file.path().to_path_buf()],
            set: vec!["clusterDomain=set.local".to_string()],
            ..Default::default()
        };
        let merged = opts.merge_values().unwrap();
        assert_eq!(merged["clusterDomain"], "set.local");
        assert_eq!(merged["proxy"]["logLevel"], "info");
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let opts = ValueOptions {
            values_files: vec![PathBuf::from("/nonexistent/values.yaml")],
            ..Default::default()
        };
        assert!(matches!(opts.merge_values(), Err(Error::Input(_))));
    }

    #[test]
    fn malformed_set_is_an_input_error() {
        for bad in ["novalue", "=x", "a..b=1"] {
            let opts = ValueOptions {
                set: vec![bad.to_string()],
                ..Default::default()
            };
            assert!(matches!(opts.merge_values(), Err(Error::Input(_))), "{bad}");
        }
    }

    #[test]
    fn empty_options_merge_to_empty_document() {
        let opts = ValueOptions::default();
        assert!(opts.is_empty());
        assert_eq!(opts.merge_values().unwrap(), json!({}));
    }
}
