//! Cross-field validation of the resolved tree
//!
//! [`validate_values`] runs once, after every mutation, and reports the first
//! violated rule. The order of the checks is part of the contract: callers
//! and tests rely on which message wins when several rules are broken.

pub mod quantity;

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::cluster::{probe, ClusterApi, InstallContext};
use crate::identity::fetch_external_issuer_data;
use crate::pki::CredentialService;
use crate::values::Values;
use crate::{Error, Result, ISSUER_SCHEME_SELF_MANAGED};

use quantity::Quantity;

/// Accepted `--image-pull-policy` values
pub const PULL_POLICIES: [&str; 3] = ["Always", "IfNotPresent", "Never"];

/// Accepted `--default-inbound-policy` values
pub const INBOUND_POLICIES: [&str; 6] = [
    "all-authenticated",
    "all-unauthenticated",
    "cluster-authenticated",
    "cluster-unauthenticated",
    "deny",
    "audit",
];

/// Accepted `--controller-log-level` values (case-insensitive)
pub const CONTROLLER_LOG_LEVELS: [&str; 8] = [
    "panic", "fatal", "error", "warn", "warning", "info", "debug", "trace",
];

const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;
const DNS1123_SUBDOMAIN_FMT: &str =
    r"[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*";

#[allow(clippy::expect_used)]
static DNS1123_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{}$", DNS1123_SUBDOMAIN_FMT)).expect("DNS-1123 pattern compiles")
});

/// `env_logger`-style directives: `level` or `target=level`, comma separated
#[allow(clippy::expect_used)]
static PROXY_LOG_LEVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(([a-z_][a-z0-9_]*(::[a-z_][a-z0-9_]*)*=)?(trace|debug|info|warn|error|off)(,|$))+$")
        .expect("proxy log level pattern compiles")
});

/// Check every cross-field rule, returning the first violation.
///
/// With `cluster` present, endpoint-slice access and an external issuer are
/// checked against the live cluster; without it those checks are skipped.
pub async fn validate_values(
    ctx: &InstallContext,
    cluster: Option<&dyn ClusterApi>,
    namespace: &str,
    values: &Values,
    creds: &dyn CredentialService,
) -> Result<()> {
    if !is_version(&values.control_plane_version) {
        return Err(Error::validation(
            "controlPlaneVersion",
            format!("{} is not a valid version", values.control_plane_version),
        ));
    }

    let controller_level = values.controller_log_level.to_ascii_lowercase();
    if !CONTROLLER_LOG_LEVELS.contains(&controller_level.as_str()) {
        return Err(Error::validation(
            "--controller-log-level",
            "--controller-log-level must be one of: panic, fatal, error, warn, info, debug, trace",
        ));
    }

    if values.proxy.log_level.is_empty() {
        return Err(Error::validation(
            "--proxy-log-level",
            "--proxy-log-level must not be empty",
        ));
    }

    if values.enable_endpoint_slices {
        if let Some(cluster) = cluster {
            probe::check_endpoint_slice_access(ctx, cluster).await?;
        }
    }

    if !values.identity_trust_domain.is_empty() {
        if let Some(problem) = dns1123_subdomain_error(&values.identity_trust_domain) {
            return Err(Error::validation(
                "--identity-trust-domain",
                format!(
                    "invalid trust domain '{}': {}",
                    values.identity_trust_domain, problem
                ),
            ));
        }
    }

    validate_proxy_values(values)?;

    if values.uses_external_issuer() {
        if !values.identity.issuer.tls.crt_pem.is_empty() {
            return Err(Error::validation(
                "--identity-issuer-certificate-file",
                "--identity-issuer-certificate-file must not be specified if --identity-external-issuer=true",
            ));
        }
        if !values.identity.issuer.tls.key_pem.is_empty() {
            return Err(Error::validation(
                "--identity-issuer-key-file",
                "--identity-issuer-key-file must not be specified if --identity-external-issuer=true",
            ));
        }
        if let Some(cluster) = cluster {
            let external = fetch_external_issuer_data(ctx, cluster, namespace).await?;
            verify_issuer(creds, &external)?;
        }
    } else if values.identity.issuer.scheme == ISSUER_SCHEME_SELF_MANAGED {
        verify_issuer(creds, &values.issuer_data())?;
    }

    debug!("configuration passed validation");
    Ok(())
}

fn verify_issuer(
    creds: &dyn CredentialService,
    data: &crate::pki::IssuerCertData,
) -> Result<()> {
    creds.verify_issuer(data).map_err(|e| {
        Error::credential(format!("failed to validate issuer credentials: {}", e))
    })
}

/// The proxy-related rules, in their fixed order.
fn validate_proxy_values(values: &Values) -> Result<()> {
    for network in values.cluster_networks.split(',') {
        if !is_cidr(network) {
            return Err(Error::validation(
                "clusterNetworks",
                format!(
                    "cannot parse destination get networks: invalid CIDR address: {}",
                    network
                ),
            ));
        }
    }

    let proxy_version = &values.proxy.image.version;
    if !proxy_version.is_empty() && !is_version(proxy_version) {
        return Err(Error::validation(
            "proxy.image.version",
            format!("{} is not a valid version", proxy_version),
        ));
    }

    let init_version = &values.proxy_init.image.version;
    if !is_version(init_version) {
        return Err(Error::validation(
            "proxyInit.image.version",
            format!("{} is not a valid version", init_version),
        ));
    }

    if !PULL_POLICIES.contains(&values.image_pull_policy.as_str()) {
        return Err(Error::validation(
            "--image-pull-policy",
            "--image-pull-policy must be one of: Always, IfNotPresent, Never",
        ));
    }

    let cpu = &values.proxy.resources.cpu;
    let memory = &values.proxy.resources.memory;

    if !cpu.request.is_empty() && Quantity::parse(&cpu.request).is_err() {
        return Err(Error::validation(
            "--proxy-cpu-request",
            format!("Invalid cpu request '{}' for --proxy-cpu-request flag", cpu.request),
        ));
    }

    if !memory.request.is_empty() && Quantity::parse(&memory.request).is_err() {
        return Err(Error::validation(
            "--proxy-memory-request",
            format!(
                "Invalid memory request '{}' for --proxy-memory-request flag",
                memory.request
            ),
        ));
    }

    if !cpu.limit.is_empty() {
        let limit = Quantity::parse(&cpu.limit).map_err(|_| {
            Error::validation(
                "--proxy-cpu-limit",
                format!("Invalid cpu limit '{}' for --proxy-cpu-limit flag", cpu.limit),
            )
        })?;
        if request_exceeds(&cpu.request, &limit, Quantity::milli_value) {
            return Err(Error::validation(
                "--proxy-cpu-limit",
                format!(
                    "The cpu limit '{}' cannot be lower than the cpu request '{}'",
                    cpu.limit, cpu.request
                ),
            ));
        }
    }

    if !memory.limit.is_empty() {
        let limit = Quantity::parse(&memory.limit).map_err(|_| {
            Error::validation(
                "--proxy-memory-limit",
                format!(
                    "Invalid memory limit '{}' for --proxy-memory-limit flag",
                    memory.limit
                ),
            )
        })?;
        if request_exceeds(&memory.request, &limit, Quantity::value) {
            return Err(Error::validation(
                "--proxy-memory-limit",
                format!(
                    "The memory limit '{}' cannot be lower than the memory request '{}'",
                    memory.limit, memory.request
                ),
            ));
        }
    }

    if !PROXY_LOG_LEVEL.is_match(&values.proxy.log_level) {
        return Err(Error::validation(
            "--proxy-log-level",
            format!(
                "\"{}\" is not a valid proxy log level - for allowed syntax check https://docs.rs/env_logger/0.6.0/env_logger/#enabling-logging",
                values.proxy.log_level
            ),
        ));
    }

    for (field, ports) in [
        ("--skip-inbound-ports", &values.proxy_init.ignore_inbound_ports),
        ("--skip-outbound-ports", &values.proxy_init.ignore_outbound_ports),
    ] {
        if ports.is_empty() {
            continue;
        }
        for range in ports.split(',') {
            parse_port_range(range).map_err(|msg| Error::validation(field, msg))?;
        }
    }

    let policy = &values.proxy.default_inbound_policy;
    if !INBOUND_POLICIES.contains(&policy.as_str()) {
        return Err(Error::validation(
            "--default-inbound-policy",
            format!(
                "--default-inbound-policy must be one of: {} (got {})",
                INBOUND_POLICIES.join(", "),
                policy
            ),
        ));
    }

    Ok(())
}

/// An empty or unparsable request counts as zero; requests are checked first.
fn request_exceeds(
    request: &str,
    limit: &Quantity,
    scale: fn(&Quantity) -> Option<i128>,
) -> bool {
    let request = Quantity::parse(request)
        .ok()
        .and_then(|q| scale(&q))
        .unwrap_or(0);
    match scale(limit) {
        Some(limit) => request > limit,
        None => false,
    }
}

/// Letters, digits, dots, and dashes only
fn is_version(version: &str) -> bool {
    !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

fn dns1123_subdomain_error(value: &str) -> Option<String> {
    if value.len() > DNS1123_SUBDOMAIN_MAX_LEN {
        return Some(format!(
            "must be no more than {} characters",
            DNS1123_SUBDOMAIN_MAX_LEN
        ));
    }
    if !DNS1123_SUBDOMAIN.is_match(value) {
        return Some(format!(
            "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', \
             and must start and end with an alphanumeric character (e.g. 'example.com', regex used for validation is '{}')",
            DNS1123_SUBDOMAIN_FMT
        ));
    }
    None
}

/// `address/prefix` with a prefix no longer than the address family allows
fn is_cidr(value: &str) -> bool {
    let Some((addr, prefix)) = value.split_once('/') else {
        return false;
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let max = if addr.is_ipv4() { 32 } else { 128 };
    prefix.parse::<u32>().is_ok_and(|p| p <= max)
}

/// A single port or an inclusive `lower-upper` range, each in 0..=65535
fn parse_port_range(range: &str) -> std::result::Result<(u16, u16), String> {
    let bounds: Vec<&str> = range.split('-').collect();
    match bounds.as_slice() {
        [port] => {
            let port = parse_port(port)?;
            Ok((port, port))
        }
        [lower, upper] => {
            let lower = parse_port(lower)?;
            let upper = parse_port(upper)?;
            if upper < lower {
                return Err(format!(
                    "\"{}\": upper-bound must be greater than or equal to lower-bound",
                    range
                ));
            }
            Ok((lower, upper))
        }
        _ => Err(format!("\"{}\": ranges expected as <lower>-<upper>", range)),
    }
}

fn parse_port(port: &str) -> std::result::Result<u16, String> {
    port.parse::<u16>()
        .map_err(|_| format!("\"{}\" is not a valid port, must be between 0 and 65535", port))
}
