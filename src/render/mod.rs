//! Chart rendering, the override record, and output formats
//!
//! Both charts are compiled into the binary. A chart renders to one YAML
//! stream: each template's output, in declared order, behind a `---`
//! separator. The control plane stream is followed by the override record,
//! a Secret holding `diff(defaults, final values)` that upgrades re-apply.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde_json::{json, Value};
use tracing::debug;

use crate::template::{TemplateService, TemplateSet};
use crate::values::Values;
use crate::{
    created_by_annotation_value, tree, yaml, Error, Result, CONFIG_OVERRIDES_NAME,
    CONTROL_PLANE_NS_LABEL,
};

/// Separator written before every document
pub const YAML_SEPARATOR: &str = "---\n";

/// `Release.Service` seen by templates
pub const RELEASE_SERVICE: &str = "CLI";

/// Default values of the CRD chart
pub const CRD_VALUES_YAML: &str = include_str!("../../charts/crds/values.yaml");

/// The CRD chart
pub const CRD_CHART: TemplateSet = TemplateSet {
    name: "meshplane-crds",
    templates: &[
        (
            "templates/policy/authorization-policy.yaml",
            include_str!("../../charts/crds/templates/policy/authorization-policy.yaml"),
        ),
        (
            "templates/policy/server.yaml",
            include_str!("../../charts/crds/templates/policy/server.yaml"),
        ),
        (
            "templates/serviceprofile.yaml",
            include_str!("../../charts/crds/templates/serviceprofile.yaml"),
        ),
        (
            "templates/gateway.networking.k8s.io_httproutes.yaml",
            include_str!("../../charts/crds/templates/gateway.networking.k8s.io_httproutes.yaml"),
        ),
        (
            "templates/gateway.networking.k8s.io_grpcroutes.yaml",
            include_str!("../../charts/crds/templates/gateway.networking.k8s.io_grpcroutes.yaml"),
        ),
    ],
};

/// The control plane chart
pub const CONTROL_PLANE_CHART: TemplateSet = TemplateSet {
    name: "meshplane-control-plane",
    templates: &[
        (
            "templates/namespace.yaml",
            include_str!("../../charts/control-plane/templates/namespace.yaml"),
        ),
        (
            "templates/identity-rbac.yaml",
            include_str!("../../charts/control-plane/templates/identity-rbac.yaml"),
        ),
        (
            "templates/config.yaml",
            include_str!("../../charts/control-plane/templates/config.yaml"),
        ),
        (
            "templates/identity.yaml",
            include_str!("../../charts/control-plane/templates/identity.yaml"),
        ),
        (
            "templates/destination.yaml",
            include_str!("../../charts/control-plane/templates/destination.yaml"),
        ),
        (
            "templates/proxy-injector.yaml",
            include_str!("../../charts/control-plane/templates/proxy-injector.yaml"),
        ),
    ],
};

/// Manifest output format, selected with `-o/--output`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// The rendered YAML stream, unchanged
    #[default]
    Yaml,
    /// A JSON array with one element per YAML document
    Json,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "yaml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => Err(Error::input(format!(
                "unsupported output format '{}': must be one of: yaml, json",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yaml => write!(f, "yaml"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// `{ Values, Release: { Namespace, Service } }`
pub fn render_context(values: &Value, namespace: &str) -> Value {
    json!({
        "Values": values,
        "Release": {
            "Namespace": namespace,
            "Service": RELEASE_SERVICE,
        },
    })
}

/// Render `set` against `values` into one YAML stream.
///
/// Templates that render to whitespace only are left out.
pub fn render_chart(
    templates: &dyn TemplateService,
    set: &TemplateSet,
    values: &Value,
    namespace: &str,
) -> Result<String> {
    let rendered = templates.render(set, &render_context(values, namespace))?;

    let mut buf = String::new();
    for name in set.names() {
        let text = rendered.get(name).ok_or_else(|| {
            Error::template(format!("{}/{}: template produced no output", set.name, name))
        })?;
        if text.trim().is_empty() {
            debug!(chart = set.name, template = name, "template rendered empty");
            continue;
        }
        buf.push_str(YAML_SEPARATOR);
        buf.push_str(text);
        if !text.ends_with('\n') {
            buf.push('\n');
        }
    }
    Ok(buf)
}

/// Defaults of the CRD chart, with `cliVersion` set to this CLI.
pub fn crd_default_values() -> Result<Value> {
    let mut defaults = match yaml::parse_yaml(CRD_VALUES_YAML)? {
        Value::Object(map) => Value::Object(map),
        Value::Null => Value::Object(Default::default()),
        _ => return Err(Error::serialization("CRD chart values must be a mapping")),
    };
    defaults["cliVersion"] = Value::String(created_by_annotation_value());
    Ok(defaults)
}

/// The override record: a Secret holding the values that differ from the
/// compiled defaults.
///
/// With `string_data` the record goes under `stringData` in plain text;
/// otherwise under `data`, base64-encoded.
pub fn render_overrides(values: &Value, namespace: &str, string_data: bool) -> Result<String> {
    let defaults = Values::new()?.to_map()?;
    let overrides = tree::diff(&defaults, values);
    let overrides_yaml = serde_yaml::to_string(&overrides)?;
    debug!(bytes = overrides_yaml.len(), "computed override record");

    let mut secret = Secret {
        metadata: ObjectMeta {
            name: Some(CONFIG_OVERRIDES_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                CONTROL_PLANE_NS_LABEL.to_string(),
                namespace.to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    };
    if string_data {
        secret.string_data = Some(BTreeMap::from([(
            CONFIG_OVERRIDES_NAME.to_string(),
            overrides_yaml,
        )]));
    } else {
        secret.data = Some(BTreeMap::from([(
            CONFIG_OVERRIDES_NAME.to_string(),
            ByteString(overrides_yaml.into_bytes()),
        )]));
    }

    Ok(serde_yaml::to_string(&secret)?)
}

/// Reformat a rendered YAML stream.
pub fn render_yaml_as(buf: &str, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => Ok(buf.to_string()),
        OutputFormat::Json => {
            let docs = yaml::parse_yaml_documents(buf)?;
            let mut out = serde_json::to_string_pretty(&Value::Array(docs))?;
            out.push('\n');
            Ok(out)
        }
    }
}
