//! Filters available to chart templates
//!
//! - `b64enc`: Encode a string to base64
//! - `to_yaml`: Serialize any value as a YAML block
//! - `indent` / `nindent`: Indent every line, optionally after a newline
//! - `quote`: Wrap a scalar in double quotes

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{Error, ErrorKind, Value};

/// Base64 encode filter
///
/// Usage: `{{ value | b64enc }}`
pub fn b64enc(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// YAML filter; the trailing newline is dropped so it composes with `nindent`
///
/// Usage: `{{ Values.proxy.resources | to_yaml | nindent(8) }}`
pub fn to_yaml(value: Value) -> Result<String, Error> {
    let text = serde_yaml::to_string(&value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("to_yaml failed: {}", e),
        )
    })?;
    Ok(text.trim_end_matches('\n').to_string())
}

/// Indent every non-empty line by `width` spaces
///
/// Usage: `{{ text | indent(4) }}`
pub fn indent(value: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Newline followed by [`indent`]
///
/// Usage: `key:{{ text | nindent(2) }}`
pub fn nindent(value: &str, width: usize) -> String {
    format!("\n{}", indent(value, width))
}

/// Double-quote filter with JSON string escaping
///
/// Usage: `{{ value | quote }}`
pub fn quote(value: Value) -> String {
    let text = if value.is_undefined() || value.is_none() {
        String::new()
    } else {
        value.to_string()
    };
    serde_json::Value::String(text).to_string()
}
