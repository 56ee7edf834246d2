//! YAML parsing into `serde_json::Value`
//!
//! Chart defaults, values files, and rendered manifests are all parsed with
//! yaml-rust2 and converted to `serde_json::Value`, which is the one in-memory
//! representation the tree, differ, and renderer work with.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::Error;

/// Error type for YAML parsing
#[derive(Debug, Clone)]
pub struct YamlError(String);

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for YamlError {}

impl From<YamlError> for Error {
    fn from(err: YamlError) -> Self {
        Error::serialization(format!("invalid YAML: {}", err))
    }
}

/// Parse a YAML string into a serde_json::Value.
///
/// For multi-document YAML, returns only the first document.
/// Returns `Value::Null` for empty input.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Parse a multi-document YAML stream, dropping empty documents.
///
/// Rendered charts routinely contain empty documents (a template whose body
/// is switched off still emits its `---` separator); those carry nothing and
/// are skipped.
pub fn parse_yaml_documents(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    docs.into_iter()
        .map(yaml_to_json)
        .filter(|doc| !matches!(doc, Ok(Value::Null)))
        .collect()
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    let value = match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::from(i),
        Yaml::String(s) => Value::String(s),
        real @ Yaml::Real(_) => {
            let f = real
                .as_f64()
                .ok_or_else(|| YamlError(format!("invalid float: {:?}", real)))?;
            // NaN and infinities have no JSON form
            Number::from_f64(f).map_or(Value::Null, Value::Number)
        }
        Yaml::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(yaml_to_json(item)?);
            }
            Value::Array(out)
        }
        Yaml::Hash(entries) => {
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(mapping_key(k)?, yaml_to_json(v)?);
            }
            Value::Object(out)
        }
        Yaml::Alias(_) => return Err(YamlError("YAML aliases are not supported".to_string())),
        Yaml::BadValue => return Err(YamlError("malformed YAML value".to_string())),
    };
    Ok(value)
}

/// Scalar mapping keys as JSON object keys
fn mapping_key(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        other => Err(YamlError(format!("unsupported mapping key: {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_nested() {
        let yaml = r#"
proxy:
  ports:
    admin: 4191
  logLevel: warn,meshplane=info
"#;
        let result = parse_yaml(yaml).unwrap();
        assert_eq!(result["proxy"]["ports"]["admin"], 4191);
        assert_eq!(result["proxy"]["logLevel"], "warn,meshplane=info");
    }

    #[test]
    fn test_parse_yaml_empty() {
        assert_eq!(parse_yaml("").unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_yaml_invalid() {
        assert!(parse_yaml("not: valid: yaml: {{").is_err());
    }

    #[test]
    fn test_parse_yaml_scalars() {
        let result = parse_yaml("enabled: true\nratio: 1.5\nnothing: null").unwrap();
        assert_eq!(result["enabled"], true);
        assert!((result["ratio"].as_f64().unwrap() - 1.5).abs() < 0.0001);
        assert!(result["nothing"].is_null());
    }

    #[test]
    fn test_documents_skip_empty() {
        let yaml = r#"
---
# only a comment
---
kind: Namespace
---
---
kind: ConfigMap
"#;
        let docs = parse_yaml_documents(yaml).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["kind"], "Namespace");
        assert_eq!(docs[1]["kind"], "ConfigMap");
    }

    #[test]
    fn test_yaml_error_converts_to_serialization_error() {
        let err: Error = parse_yaml("a: [").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().contains("invalid YAML"));
    }
}
