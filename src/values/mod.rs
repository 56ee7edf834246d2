//! The configuration tree
//!
//! [`Values`] is the typed view of the control plane chart's values. It is
//! built once per invocation from the embedded `values.yaml`, mutated in a
//! fixed order (values-overrides, then flags, then cluster facts and issuer
//! credentials), validated, and finally handed to the renderer as a nested map
//! via [`Values::to_map`].
//!
//! The serialized field names are the chart's camelCase keys; templates and
//! the persisted override record both see exactly that shape.

pub mod duration;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pki::IssuerCertData;
use crate::{tree, yaml, Error, Result, ISSUER_SCHEME_EXTERNAL};

/// Compiled-in defaults for the control plane chart
pub const DEFAULT_VALUES_YAML: &str = include_str!("../../charts/control-plane/values.yaml");

/// High-availability profile merged over the tree by `--ha`
pub const HA_VALUES_YAML: &str = include_str!("../../charts/control-plane/values-ha.yaml");

/// Top-level configuration tree for the control plane chart
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Values {
    /// Control plane version; also the default proxy image tag
    pub control_plane_version: String,
    /// Kubernetes DNS domain name suffix
    pub cluster_domain: String,
    /// Comma-separated CIDRs considered in-cluster
    pub cluster_networks: String,
    /// Pull policy for all control plane images
    pub image_pull_policy: String,
    /// Controller image, without tag
    pub controller_image: String,
    /// Replicas for each controller deployment
    pub controller_replicas: u32,
    /// User ID the controllers run as
    #[serde(rename = "controllerUID")]
    pub controller_uid: i64,
    /// Group ID the controllers run as (-1 leaves it unset)
    #[serde(rename = "controllerGID")]
    pub controller_gid: i64,
    /// Controller log level
    pub controller_log_level: String,
    /// Enable control plane tracing
    pub control_plane_tracing: bool,
    /// Namespace of the tracing collector
    pub control_plane_tracing_namespace: String,
    /// Let proxies transparently upgrade HTTP/1 to HTTP/2
    pub enable_h2_upgrade: bool,
    /// Disable the heartbeat cronjob
    pub disable_heart_beat: bool,
    /// Use EndpointSlices in the destination service
    pub enable_endpoint_slices: bool,
    /// Spread controller replicas across nodes
    pub enable_pod_anti_affinity: bool,
    /// Failure policy for admission webhooks
    pub webhook_failure_policy: String,
    /// Whether the HA profile was applied
    pub high_availability: bool,
    /// Rely on the CNI plugin instead of proxy-init's NET_ADMIN
    pub cni_enabled: bool,
    /// Trust domain used for workload identities
    pub identity_trust_domain: String,
    /// PEM-encoded trust anchors
    #[serde(rename = "identityTrustAnchorsPEM")]
    pub identity_trust_anchors_pem: String,
    /// Identity service settings
    pub identity: Identity,
    /// Policy controller settings
    pub policy_controller: PolicyController,
    /// Debug sidecar settings
    pub debug_container: DebugContainer,
    /// Proxy settings
    pub proxy: Proxy,
    /// Proxy init container settings
    pub proxy_init: ProxyInit,
    /// Keys not modelled above, carried through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Container image reference
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Repository, without tag
    pub name: String,
    /// Tag; empty means the control plane version
    pub version: String,
    /// Pull policy; empty means the global policy
    pub pull_policy: String,
}

/// Identity service settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Use an external CA for the trust root
    #[serde(rename = "externalCA")]
    pub external_ca: bool,
    /// Issuer settings
    pub issuer: Issuer,
}

/// Identity issuer settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issuer {
    /// Who manages the issuer credentials
    pub scheme: String,
    /// Clock skew tolerated when validating certificates
    pub clock_skew_allowance: String,
    /// Lifetime of issued workload certificates
    pub issuance_lifetime: String,
    /// Issuer certificate and key
    pub tls: IssuerTls,
}

/// Issuer certificate and private key
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IssuerTls {
    /// PEM-encoded issuer certificate
    #[serde(rename = "crtPEM")]
    pub crt_pem: String,
    /// PEM-encoded issuer private key
    #[serde(rename = "keyPEM")]
    pub key_pem: String,
}

/// Policy controller settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyController {
    /// Log level
    pub log_level: String,
    /// Image
    pub image: Image,
}

/// Debug sidecar settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebugContainer {
    /// Image
    pub image: Image,
}

/// Proxy settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proxy {
    /// Image
    pub image: Image,
    /// Log filter directive
    pub log_level: String,
    /// plain or json
    pub log_format: String,
    /// Proxy listener ports
    pub ports: Ports,
    /// User ID the proxy runs as
    pub uid: i64,
    /// Group ID the proxy runs as (-1 leaves it unset)
    pub gid: i64,
    /// Enable service profiles for non-Kubernetes services
    pub enable_external_profiles: bool,
    /// Inbound policy applied when nothing more specific matches
    pub default_inbound_policy: String,
    /// Ports proxied as opaque TCP
    pub opaque_ports: String,
    /// Inbound ports that require meshed identity
    pub require_identity_on_inbound_ports: String,
    /// Resource requests and limits
    pub resources: Resources,
    /// Proxy runtime tuning
    pub runtime: Runtime,
}

/// Proxy listener ports
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ports {
    /// Admin (metrics) port
    pub admin: u16,
    /// Control port
    pub control: u16,
    /// Inbound traffic port
    pub inbound: u16,
    /// Outbound traffic port
    pub outbound: u16,
}

/// Resource requests and limits for the proxy
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// CPU request/limit
    pub cpu: Constraints,
    /// Memory request/limit
    pub memory: Constraints,
}

/// A request/limit pair in Kubernetes quantity notation; empty means unset
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Requested amount
    pub request: String,
    /// Upper bound
    pub limit: String,
}

/// Proxy runtime tuning
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    /// Worker thread bounds derived from the CPU request/limit
    pub workers: Workers,
}

/// Proxy worker thread bounds
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Workers {
    /// Minimum worker threads
    pub minimum: i64,
    /// Maximum worker threads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
}

/// Proxy init container settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInit {
    /// Image
    pub image: Image,
    /// Inbound ports and ranges that skip the proxy
    pub ignore_inbound_ports: String,
    /// Outbound ports and ranges that skip the proxy
    pub ignore_outbound_ports: String,
    /// Ports the Kubernetes API server listens on
    #[serde(rename = "kubeAPIServerPorts")]
    pub kube_api_server_ports: String,
    /// Run proxy-init as root
    pub run_as_root: bool,
}

impl Values {
    /// Build the default tree from the compiled-in chart values.
    ///
    /// Only fails if the embedded document is malformed, which is a build
    /// defect rather than a user error.
    pub fn new() -> Result<Self> {
        let defaults = yaml::parse_yaml(DEFAULT_VALUES_YAML)?;
        let mut values: Values = serde_json::from_value(defaults).map_err(|e| {
            Error::serialization(format!("compiled-in chart values are malformed: {}", e))
        })?;
        if values.control_plane_version.is_empty() {
            values.control_plane_version = env!("CARGO_PKG_VERSION").to_string();
        }
        Ok(values)
    }

    /// Rebuild a tree from its nested map form.
    pub fn from_map(map: Value) -> Result<Self> {
        serde_json::from_value(map)
            .map_err(|e| Error::input(format!("invalid configuration values: {}", e)))
    }

    /// The nested map consumed by the renderer and the override differ.
    pub fn to_map(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deep-merge a values document over this tree.
    ///
    /// Leaves in `overrides` win; unknown keys are retained. A number or
    /// boolean given for a text setting (`--set proxy.image.version=2`) is
    /// taken as its text form.
    pub fn merge_overrides(&mut self, overrides: &Value) -> Result<()> {
        if overrides.as_object().is_some_and(|o| o.is_empty()) || overrides.is_null() {
            return Ok(());
        }
        let current = self.to_map()?;
        let mut overrides = overrides.clone();
        coerce_text_scalars(&current, &mut overrides);
        let merged = tree::merge(&current, &overrides);
        *self = Self::from_map(merged)?;
        Ok(())
    }

    /// Merge the high-availability profile over this tree.
    pub fn merge_ha_values(&mut self) -> Result<()> {
        let ha = yaml::parse_yaml(HA_VALUES_YAML)?;
        self.merge_overrides(&ha)
    }

    /// Whether issuer credentials are managed outside meshplane.
    pub fn uses_external_issuer(&self) -> bool {
        self.identity.issuer.scheme == ISSUER_SCHEME_EXTERNAL
    }

    /// The issuer credential triple currently held by the tree.
    pub fn issuer_data(&self) -> IssuerCertData {
        IssuerCertData {
            issuer_crt: self.identity.issuer.tls.crt_pem.clone(),
            issuer_key: self.identity.issuer.tls.key_pem.clone(),
            trust_anchors: self.identity_trust_anchors_pem.clone(),
        }
    }
}

/// Turn number and boolean leaves of `overlay` into strings wherever `base`
/// holds a string at the same path.
fn coerce_text_scalars(base: &Value, overlay: &mut Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay.iter_mut() {
                if let Some(base_value) = base.get(key) {
                    coerce_text_scalars(base_value, value);
                }
            }
        }
        (Value::String(_), leaf) if leaf.is_number() || leaf.is_boolean() => {
            *leaf = Value::String(leaf.to_string());
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_parse_and_fill_version() {
        let values = Values::new().unwrap();
        assert_eq!(values.control_plane_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(values.cluster_domain, "cluster.local");
        assert_eq!(values.proxy.ports.inbound, 4143);
        assert_eq!(values.controller_gid, -1);
        assert_eq!(values.identity.issuer.issuance_lifetime, "24h0m0s");
        assert_eq!(values.proxy.runtime.workers.maximum, None);
        assert!(values.extra.is_empty());
    }

    #[test]
    fn map_uses_chart_key_names() {
        let map = Values::new().unwrap().to_map().unwrap();
        assert!(map.get("controllerUID").is_some());
        assert!(map.get("identityTrustAnchorsPEM").is_some());
        assert!(map["identity"]["issuer"]["tls"].get("crtPEM").is_some());
        assert!(map["identity"].get("externalCA").is_some());
        assert!(map["proxyInit"].get("kubeAPIServerPorts").is_some());
        assert!(map.get("enableH2Upgrade").is_some());
        assert!(map["proxy"]["runtime"]["workers"].get("maximum").is_none());
    }

    #[test]
    fn map_round_trips_through_from_map() {
        let values = Values::new().unwrap();
        let back = Values::from_map(values.to_map().unwrap()).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn overrides_merge_and_unknown_keys_survive() {
        let mut values = Values::new().unwrap();
        values
            .merge_overrides(&json!({
                "proxy": {"logLevel": "debug"},
                "podLabels": {"team": "mesh"}
            }))
            .unwrap();

        assert_eq!(values.proxy.log_level, "debug");
        assert_eq!(values.proxy.ports.admin, 4191);
        assert_eq!(values.extra.get("podLabels"), Some(&json!({"team": "mesh"})));
        assert_eq!(values.to_map().unwrap()["podLabels"]["team"], "mesh");
    }

    #[test]
    fn overrides_with_wrong_types_are_input_errors() {
        let mut values = Values::new().unwrap();
        let err = values
            .merge_overrides(&json!({"controllerReplicas": "three"}))
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn numeric_overrides_for_text_settings_become_text() {
        let mut values = Values::new().unwrap();
        values
            .merge_overrides(&json!({
                "proxy": {"image": {"version": 2}},
                "clusterNetworks": 10,
                "controllerReplicas": 2
            }))
            .unwrap();

        assert_eq!(values.proxy.image.version, "2");
        assert_eq!(values.cluster_networks, "10");
        assert_eq!(values.controller_replicas, 2);
    }

    #[test]
    fn ha_profile_raises_replicas_and_resources() {
        let mut values = Values::new().unwrap();
        values.merge_ha_values().unwrap();
        assert_eq!(values.controller_replicas, 3);
        assert!(values.enable_pod_anti_affinity);
        assert_eq!(values.webhook_failure_policy, "Fail");
        assert_eq!(values.proxy.resources.cpu.request, "100m");
        assert_eq!(values.proxy.resources.memory.limit, "250Mi");
        assert_eq!(values.cluster_domain, "cluster.local");
    }

    #[test]
    fn issuer_scheme_selects_external_issuer() {
        let mut values = Values::new().unwrap();
        assert!(!values.uses_external_issuer());
        values.identity.issuer.scheme = ISSUER_SCHEME_EXTERNAL.to_string();
        assert!(values.uses_external_issuer());
    }
}
