//! Cluster facts gathered before rendering
//!
//! Probes either refine defaults (Gateway API ownership, API server ports) or
//! refuse the install outright (an existing installation, missing CRDs,
//! Docker nodes without a root proxy-init). All of them honour the
//! invocation's [`InstallContext`].

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::Value;
use tracing::{debug, info};

use super::{ClusterApi, InstallContext};
use crate::{yaml, Error, Result, CONFIG_CONFIG_MAP_NAME, CREATED_BY_ANNOTATION};

/// The Gateway API CRDs whose ownership decides [`GatewayApiState`]
pub const GATEWAY_API_CRDS: [&str; 2] = [
    "httproutes.gateway.networking.k8s.io",
    "grpcroutes.gateway.networking.k8s.io",
];

/// Schema version every externally managed Gateway API CRD must serve
pub const GATEWAY_API_REQUIRED_VERSION: &str = "v1";

/// Ceiling on the pre-flight reachability check
pub const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Who manages the Gateway API CRDs in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayApiState {
    /// Neither CRD exists
    Absent,
    /// At least one CRD carries meshplane's ownership annotation
    SelfManaged,
    /// The CRDs exist and were installed by someone else
    ExternallyManaged,
}

impl std::fmt::Display for GatewayApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::SelfManaged => write!(f, "self-managed"),
            Self::ExternallyManaged => write!(f, "externally-managed"),
        }
    }
}

/// Classify the Gateway API CRDs.
///
/// A missing CRD is skipped; any other lookup failure is returned. An
/// ownership annotation on either CRD wins over everything else. Otherwise
/// every CRD that exists must serve `v1`, and the first one that does not is
/// a hard error.
pub async fn probe_gateway_api<C: ClusterApi + ?Sized>(
    ctx: &InstallContext,
    cluster: &C,
) -> Result<GatewayApiState> {
    let mut found = Vec::new();
    for name in GATEWAY_API_CRDS {
        if let Some(crd) = ctx.run(cluster.get_crd(name)).await? {
            found.push((name, crd));
        }
    }

    let self_managed = found.iter().any(|(_, crd)| {
        crd.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(CREATED_BY_ANNOTATION))
            .is_some_and(|v| !v.is_empty())
    });
    if self_managed {
        return Ok(GatewayApiState::SelfManaged);
    }

    for (name, crd) in &found {
        let serves_v1 = crd
            .spec
            .versions
            .iter()
            .any(|v| v.name == GATEWAY_API_REQUIRED_VERSION);
        if !serves_v1 {
            return Err(Error::validation(
                *name,
                format!(
                    "the {} CRD is missing the v1 version, please upgrade to Gateway API v1.1.1 or later",
                    name
                ),
            ));
        }
    }

    Ok(if found.is_empty() {
        GatewayApiState::Absent
    } else {
        GatewayApiState::ExternallyManaged
    })
}

/// Set the CRD chart's `installGatewayAPI` default from the cluster state.
pub fn update_default_values(state: GatewayApiState, defaults: &mut Value) {
    let install = match state {
        GatewayApiState::Absent => false,
        GatewayApiState::SelfManaged => true,
        GatewayApiState::ExternallyManaged => false,
    };
    if let Value::Object(map) = defaults {
        map.insert("installGatewayAPI".to_string(), Value::Bool(install));
    }
}

/// Reject CRD chart values that contradict the cluster's Gateway API state.
///
/// `enableHttpRoutes`, when present, takes precedence over
/// `installGatewayAPI`.
pub fn validate_final_values(state: GatewayApiState, values: &Value) -> Result<()> {
    let installing = values
        .get("enableHttpRoutes")
        .or_else(|| values.get("installGatewayAPI"))
        .is_some_and(|v| v == &Value::Bool(true));

    match (state, installing) {
        (GatewayApiState::Absent, false) => Err(Error::validation(
            "installGatewayAPI",
            "The Gateway API CRDs must be installed prior to installing meshplane. Run:\n\n\
             kubectl apply -f https://github.com/kubernetes-sigs/gateway-api/releases/download/v1.2.1/standard-install.yaml\n\n\
             or see https://gateway-api.sigs.k8s.io/guides/#installing-gateway-api for more options.",
        )),
        (GatewayApiState::SelfManaged, false) => Err(Error::validation(
            "installGatewayAPI",
            "meshplane is providing GW API, but your current install configuration will remove it",
        )),
        (GatewayApiState::ExternallyManaged, true) => Err(Error::validation(
            "installGatewayAPI",
            "meshplane cannot install the Gateway API CRDs because they are already installed by an external source. Please set `installGatewayAPI` to `false`.",
        )),
        _ => Ok(()),
    }
}

/// Refuse to install over an existing control plane.
pub async fn probe_existing_installation<C: ClusterApi + ?Sized>(
    ctx: &InstallContext,
    cluster: &C,
    namespace: &str,
) -> Result<()> {
    let existing = ctx
        .run(cluster.get_config_map(namespace, CONFIG_CONFIG_MAP_NAME))
        .await?;
    match existing {
        Some(_) => Err(Error::conflict(
            namespace,
            format!("ConfigMap/{} already exists", CONFIG_CONFIG_MAP_NAME),
        )),
        None => Ok(()),
    }
}

/// Ports the API server is reached on, read from `default/kubernetes`.
///
/// Each service port is listed, followed by its target port when that is a
/// number. Best effort: any failure yields an empty string and the chart
/// default stays in place.
pub async fn probe_api_server_ports<C: ClusterApi + ?Sized>(
    ctx: &InstallContext,
    cluster: &C,
) -> String {
    let service = match ctx.run(cluster.get_service("default", "kubernetes")).await {
        Ok(Some(service)) => service,
        Ok(None) => {
            debug!("default/kubernetes service not found, keeping default API server ports");
            return String::new();
        }
        Err(e) => {
            debug!(error = %e, "failed to read default/kubernetes service, keeping default API server ports");
            return String::new();
        }
    };

    let mut ports = Vec::new();
    for port in service.spec.and_then(|s| s.ports).unwrap_or_default() {
        ports.push(port.port.to_string());
        if let Some(IntOrString::Int(target)) = port.target_port {
            ports.push(target.to_string());
        }
    }
    ports.join(",")
}

/// Pre-flight: can the cluster be reached at all?
pub async fn check_reachable<C: ClusterApi + ?Sized>(
    ctx: &InstallContext,
    cluster: &C,
) -> Result<()> {
    match tokio::time::timeout(REACHABILITY_TIMEOUT, ctx.run(cluster.list_namespaces())).await {
        Ok(Ok(namespaces)) => {
            debug!(namespaces = namespaces.len(), "cluster is reachable");
            Ok(())
        }
        Ok(Err(Error::Cancelled)) => Err(Error::Cancelled),
        Ok(Err(e)) => Err(Error::cluster_unreachable(e.to_string())),
        Err(_) => Err(Error::cluster_unreachable(format!(
            "timed out after {}s waiting for the Kubernetes API",
            REACHABILITY_TIMEOUT.as_secs()
        ))),
    }
}

/// Every CRD in `crd_manifest` must already exist in the cluster, serving
/// every version the manifest declares.
pub async fn check_crds_installed<C: ClusterApi + ?Sized>(
    ctx: &InstallContext,
    cluster: &C,
    crd_manifest: &str,
) -> Result<()> {
    let missing = || {
        Error::validation(
            "--crds",
            "meshplane CRDs must be installed first. Run meshplane install with the --crds flag.",
        )
    };

    let docs = yaml::parse_yaml_documents(crd_manifest)?;
    for doc in docs
        .iter()
        .filter(|d| d.get("kind").and_then(Value::as_str) == Some("CustomResourceDefinition"))
    {
        let Some(name) = doc.pointer("/metadata/name").and_then(Value::as_str) else {
            continue;
        };
        let Some(installed) = ctx.run(cluster.get_crd(name)).await? else {
            info!(crd = name, "required CRD is not installed");
            return Err(missing());
        };

        let wanted = doc
            .pointer("/spec/versions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|v| v.get("name").and_then(Value::as_str));
        for version in wanted {
            if !installed.spec.versions.iter().any(|v| v.name == version) {
                info!(crd = name, version, "installed CRD is missing a version");
                return Err(missing());
            }
        }
    }
    Ok(())
}

/// Nodes running Docker need a root proxy-init.
pub async fn check_node_runtimes<C: ClusterApi + ?Sized>(
    ctx: &InstallContext,
    cluster: &C,
) -> Result<()> {
    let nodes = ctx.run(cluster.list_node_runtimes()).await?;
    if let Some(node) = nodes.iter().find(|n| n.runtime.starts_with("docker:")) {
        debug!(node = %node.node, runtime = %node.runtime, "node uses the docker runtime");
        return Err(Error::validation(
            "proxyInit.runAsRoot",
            "there are nodes using the docker container runtime and proxy-init container must run as root user.\n\
             try installing meshplane via --set proxyInit.runAsRoot=true",
        ));
    }
    Ok(())
}

/// The destination service needs to list and watch EndpointSlices.
pub async fn check_endpoint_slice_access<C: ClusterApi + ?Sized>(
    ctx: &InstallContext,
    cluster: &C,
) -> Result<()> {
    if ctx.run(cluster.can_list_endpoint_slices()).await? {
        Ok(())
    } else {
        Err(Error::validation(
            "--enable-endpoint-slices",
            "not authorized to list and watch endpointslices; grant access or set --enable-endpoint-slices=false",
        ))
    }
}
