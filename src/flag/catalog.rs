//! The `install` settings catalog
//!
//! Every flag takes its default from the tree it is registered against, so
//! the help text and the compiled defaults cannot drift apart.

use std::path::Path;

use tracing::debug;

use super::{Flag, FlagSet};
use crate::pki::{CredentialService, RcgenCredentials};
use crate::validate::quantity::Quantity;
use crate::values::duration::{format_duration, parse_duration};
use crate::values::Values;
use crate::{
    Error, Result, DEFAULT_REGISTRY, ENV_REGISTRY_OVERRIDE, ISSUER_SCHEME_EXTERNAL,
    ISSUER_SCHEME_SELF_MANAGED,
};

/// Fixed failure for `--disable-identity`
pub const DISABLE_IDENTITY_UNSUPPORTED: &str =
    "--disable-identity is no longer supported; identity is always required";

/// Every flag accepted by `install`, in application order
pub fn install_flags(defaults: &Values) -> Result<FlagSet> {
    let mut flags = FlagSet::new();
    flags
        .extend(install_only_flags(defaults))
        .extend(install_upgrade_flags(defaults)?)
        .extend(proxy_flags(defaults))
        .register(Flag::unsupported(
            "disable-identity",
            "Disables resources from participating in TLS identity",
            DISABLE_IDENTITY_UNSUPPORTED,
        ));
    Ok(flags)
}

/// Settings fixed at install time
pub fn install_only_flags(defaults: &Values) -> FlagSet {
    let mut flags = FlagSet::new();
    flags
        .register(Flag::string(
            "cluster-domain",
            &defaults.cluster_domain,
            "Set custom cluster domain",
            |v, s| {
                v.cluster_domain = s;
                Ok(())
            },
        ))
        .register(Flag::string(
            "identity-trust-domain",
            &defaults.identity_trust_domain,
            "Configures the name suffix used for identities.",
            |v, s| {
                v.identity_trust_domain = s;
                Ok(())
            },
        ))
        .register(Flag::bool(
            "identity-external-issuer",
            defaults.identity.issuer.scheme == ISSUER_SCHEME_EXTERNAL,
            "Whether to use an external identity issuer",
            |v, external| {
                v.identity.issuer.scheme = if external {
                    ISSUER_SCHEME_EXTERNAL
                } else {
                    ISSUER_SCHEME_SELF_MANAGED
                }
                .to_string();
                Ok(())
            },
        ))
        .register(Flag::bool(
            "identity-external-ca",
            defaults.identity.external_ca,
            "Whether to use an external CA provider",
            |v, b| {
                v.identity.external_ca = b;
                Ok(())
            },
        ));
    flags
}

/// Settings accepted by both install and upgrade
pub fn install_upgrade_flags(defaults: &Values) -> Result<FlagSet> {
    let issuance_lifetime = parse_duration(&defaults.identity.issuer.issuance_lifetime)?;
    let clock_skew_allowance = parse_duration(&defaults.identity.issuer.clock_skew_allowance)?;

    let mut flags = FlagSet::new();
    flags
        .register(Flag::bool(
            "cni-enabled",
            defaults.cni_enabled,
            "Omit the NET_ADMIN capability in the proxy-init container when injecting the proxy; requires the CNI plugin to already be installed",
            |v, b| {
                v.cni_enabled = b;
                Ok(())
            },
        ))
        .register(Flag::string(
            "controller-log-level",
            &defaults.controller_log_level,
            "Log level for the controller components",
            |v, s| {
                v.controller_log_level = s;
                Ok(())
            },
        ))
        .register(
            Flag::bool(
                "ha",
                defaults.high_availability,
                "Enable HA deployment config for the control plane",
                |v, ha| {
                    v.high_availability = ha;
                    if ha {
                        v.merge_ha_values()?;
                    }
                    Ok(())
                },
            )
            .profile(),
        )
        .register(Flag::uint(
            "controller-replicas",
            u64::from(defaults.controller_replicas),
            "Replicas of the controller to deploy",
            |v, n| {
                v.controller_replicas = u32::try_from(n).map_err(|_| {
                    Error::input(format!("--controller-replicas {} is out of range", n))
                })?;
                Ok(())
            },
        ))
        .register(Flag::int(
            "controller-uid",
            defaults.controller_uid,
            "Run the control plane components under this user ID",
            |v, n| {
                v.controller_uid = n;
                Ok(())
            },
        ))
        .register(Flag::int(
            "controller-gid",
            defaults.controller_gid,
            "Run the control plane components under this group ID",
            |v, n| {
                v.controller_gid = n;
                Ok(())
            },
        ))
        .register(Flag::bool(
            "disable-h2-upgrade",
            !defaults.enable_h2_upgrade,
            "Prevents the controller from instructing proxies to perform transparent HTTP/2 upgrading",
            |v, b| {
                v.enable_h2_upgrade = !b;
                Ok(())
            },
        ))
        .register(Flag::bool(
            "disable-heartbeat",
            defaults.disable_heart_beat,
            "Disables the heartbeat cronjob",
            |v, b| {
                v.disable_heart_beat = b;
                Ok(())
            },
        ))
        .register(Flag::duration(
            "identity-issuance-lifetime",
            issuance_lifetime,
            "The amount of time for which the Identity issuer should certify identity",
            |v, d| {
                v.identity.issuer.issuance_lifetime = format_duration(d);
                Ok(())
            },
        ))
        .register(Flag::duration(
            "identity-clock-skew-allowance",
            clock_skew_allowance,
            "The amount of time to allow for clock skew within a cluster",
            |v, d| {
                v.identity.issuer.clock_skew_allowance = format_duration(d);
                Ok(())
            },
        ))
        .register(
            Flag::bool(
                "control-plane-tracing",
                defaults.control_plane_tracing,
                "Enables Control Plane Tracing with the defaults",
                |v, b| {
                    v.control_plane_tracing = b;
                    Ok(())
                },
            )
            .hidden(),
        )
        .register(
            Flag::string(
                "control-plane-tracing-namespace",
                &defaults.control_plane_tracing_namespace,
                "Send control plane traces to the tracing collector in this namespace",
                |v, s| {
                    v.control_plane_tracing_namespace = s;
                    Ok(())
                },
            )
            .hidden(),
        )
        .register(Flag::string(
            "identity-issuer-certificate-file",
            "",
            "A path to a PEM-encoded file containing the identity issuer certificate (generated by default)",
            |v, path| {
                if !path.is_empty() {
                    let text = read_file(&path)?;
                    v.identity.issuer.tls.crt_pem = RcgenCredentials.parse_certificate_pem(&text)?;
                }
                Ok(())
            },
        ))
        .register(Flag::string(
            "identity-issuer-key-file",
            "",
            "A path to a PEM-encoded file containing the identity issuer private key (generated by default)",
            |v, path| {
                if !path.is_empty() {
                    let text = read_file(&path)?;
                    v.identity.issuer.tls.key_pem = RcgenCredentials.parse_private_key_pem(&text)?;
                }
                Ok(())
            },
        ))
        .register(Flag::string(
            "identity-trust-anchors-file",
            "",
            "A path to a PEM-encoded file containing the identity trust anchors (generated by default)",
            |v, path| {
                if !path.is_empty() {
                    v.identity_trust_anchors_pem = read_file(&path)?;
                }
                Ok(())
            },
        ))
        .register(Flag::bool(
            "enable-endpoint-slices",
            defaults.enable_endpoint_slices,
            "Enables the usage of EndpointSlice informers and resources for the destination service",
            |v, b| {
                v.enable_endpoint_slices = b;
                Ok(())
            },
        ));
    Ok(flags)
}

/// Settings that shape the injected proxy
pub fn proxy_flags(defaults: &Values) -> FlagSet {
    let mut flags = FlagSet::new();
    flags
        .register(
            Flag::string(
                "proxy-image",
                &defaults.proxy.image.name,
                "Proxy container image name",
                |v, s| {
                    v.proxy.image.name = s;
                    Ok(())
                },
            )
            .hidden(),
        )
        .register(
            Flag::string(
                "init-image",
                &defaults.proxy_init.image.name,
                "Proxy init container image name",
                |v, s| {
                    v.proxy_init.image.name = s;
                    Ok(())
                },
            )
            .hidden(),
        )
        .register(
            Flag::string(
                "init-image-version",
                &defaults.proxy_init.image.version,
                "Proxy init container image version",
                |v, s| {
                    v.proxy_init.image.version = s;
                    Ok(())
                },
            )
            .hidden(),
        )
        .register(
            Flag::string(
                "image-pull-policy",
                &defaults.image_pull_policy,
                "Docker image pull policy",
                |v, s| {
                    v.proxy.image.pull_policy = s.clone();
                    v.proxy_init.image.pull_policy = s.clone();
                    v.debug_container.image.pull_policy = s.clone();
                    v.image_pull_policy = s;
                    Ok(())
                },
            )
            .hidden(),
        )
        .register(Flag::uint(
            "inbound-port",
            u64::from(defaults.proxy.ports.inbound),
            "Proxy port to use for inbound traffic",
            |v, n| {
                v.proxy.ports.inbound = port("inbound-port", n)?;
                Ok(())
            },
        ))
        .register(Flag::uint(
            "outbound-port",
            u64::from(defaults.proxy.ports.outbound),
            "Proxy port to use for outbound traffic",
            |v, n| {
                v.proxy.ports.outbound = port("outbound-port", n)?;
                Ok(())
            },
        ))
        .register(Flag::string_list(
            "skip-inbound-ports",
            split_list(&defaults.proxy_init.ignore_inbound_ports),
            "Ports and/or port ranges (inclusive) that should skip the proxy and send directly to the application",
            |v, ports| {
                v.proxy_init.ignore_inbound_ports = ports.join(",");
                Ok(())
            },
        ))
        .register(Flag::string_list(
            "skip-outbound-ports",
            split_list(&defaults.proxy_init.ignore_outbound_ports),
            "Outbound ports and/or port ranges (inclusive) that should skip the proxy",
            |v, ports| {
                v.proxy_init.ignore_outbound_ports = ports.join(",");
                Ok(())
            },
        ))
        .register(Flag::int(
            "proxy-uid",
            defaults.proxy.uid,
            "Run the proxy under this user ID",
            |v, n| {
                v.proxy.uid = n;
                Ok(())
            },
        ))
        .register(Flag::int(
            "proxy-gid",
            defaults.proxy.gid,
            "Run the proxy under this group ID",
            |v, n| {
                v.proxy.gid = n;
                Ok(())
            },
        ))
        .register(Flag::string(
            "proxy-log-level",
            &defaults.proxy.log_level,
            "Log level for the proxy",
            |v, s| {
                v.proxy.log_level = s;
                Ok(())
            },
        ))
        .register(Flag::uint(
            "control-port",
            u64::from(defaults.proxy.ports.control),
            "Proxy port to use for control",
            |v, n| {
                v.proxy.ports.control = port("control-port", n)?;
                Ok(())
            },
        ))
        .register(Flag::uint(
            "admin-port",
            u64::from(defaults.proxy.ports.admin),
            "Proxy port to serve metrics on",
            |v, n| {
                v.proxy.ports.admin = port("admin-port", n)?;
                Ok(())
            },
        ))
        .register(Flag::string(
            "proxy-cpu-request",
            &defaults.proxy.resources.cpu.request,
            "Amount of CPU units that the proxy sidecar requests",
            |v, s| {
                if !s.is_empty() {
                    v.proxy.runtime.workers.minimum = whole_cores("proxy-cpu-request", &s)?;
                }
                v.proxy.resources.cpu.request = s;
                Ok(())
            },
        ))
        .register(Flag::string(
            "proxy-cpu-limit",
            &defaults.proxy.resources.cpu.limit,
            "Maximum amount of CPU units that the proxy sidecar can use",
            |v, s| {
                v.proxy.runtime.workers.maximum = if s.is_empty() {
                    None
                } else {
                    Some(whole_cores("proxy-cpu-limit", &s)?)
                };
                v.proxy.resources.cpu.limit = s;
                Ok(())
            },
        ))
        .register(Flag::string(
            "proxy-memory-request",
            &defaults.proxy.resources.memory.request,
            "Amount of Memory that the proxy sidecar requests",
            |v, s| {
                v.proxy.resources.memory.request = s;
                Ok(())
            },
        ))
        .register(Flag::string(
            "proxy-memory-limit",
            &defaults.proxy.resources.memory.limit,
            "Maximum amount of Memory that the proxy sidecar can use",
            |v, s| {
                v.proxy.resources.memory.limit = s;
                Ok(())
            },
        ))
        .register(Flag::bool(
            "enable-external-profiles",
            defaults.proxy.enable_external_profiles,
            "Enable service profiles for non-Kubernetes services",
            |v, b| {
                v.proxy.enable_external_profiles = b;
                Ok(())
            },
        ))
        .register(Flag::string(
            "default-inbound-policy",
            &defaults.proxy.default_inbound_policy,
            "Inbound policy to use to control inbound access to the proxy",
            |v, s| {
                v.proxy.default_inbound_policy = s;
                Ok(())
            },
        ))
        .register(
            Flag::string(
                "proxy-memory",
                &defaults.proxy.resources.memory.request,
                "Amount of Memory that the proxy sidecar requests",
                |v, s| {
                    v.proxy.resources.memory.request = s;
                    Ok(())
                },
            )
            .deprecated("use --proxy-memory-request instead")
            .hidden(),
        )
        .register(
            Flag::string(
                "proxy-cpu",
                &defaults.proxy.resources.cpu.request,
                "Amount of CPU units that the proxy sidecar requests",
                |v, s| {
                    v.proxy.resources.cpu.request = s;
                    Ok(())
                },
            )
            .deprecated("use --proxy-cpu-request instead")
            .hidden(),
        )
        .register(
            Flag::string(
                "proxy-version",
                &defaults.proxy.image.version,
                "Tag to be used for the proxy images",
                |v, s| {
                    v.proxy.image.version = s;
                    Ok(())
                },
            )
            .short('v')
            .deprecated("use --set proxy.image.version=<version>")
            .hidden(),
        )
        .register(
            Flag::string(
                "registry",
                DEFAULT_REGISTRY,
                "Docker registry to pull images from",
                |v, registry| {
                    v.controller_image = registry_override(&v.controller_image, &registry);
                    v.policy_controller.image.name =
                        registry_override(&v.policy_controller.image.name, &registry);
                    v.debug_container.image.name =
                        registry_override(&v.debug_container.image.name, &registry);
                    v.proxy.image.name = registry_override(&v.proxy.image.name, &registry);
                    v.proxy_init.image.name =
                        registry_override(&v.proxy_init.image.name, &registry);
                    Ok(())
                },
            )
            .env(ENV_REGISTRY_OVERRIDE),
        );
    flags
}

/// Replace the registry portion of `image` with `registry`.
///
/// Everything up to the last `/` is the registry; an empty `registry` leaves
/// the bare image name.
pub fn registry_override(image: &str, registry: &str) -> String {
    if image.is_empty() {
        return String::new();
    }
    let name = image.rsplit_once('/').map_or(image, |(_, name)| name);
    match registry.trim_end_matches('/') {
        "" => name.to_string(),
        registry => format!("{}/{}", registry, name),
    }
}

fn read_file(path: &str) -> Result<String> {
    debug!(path, "reading credential file");
    std::fs::read_to_string(Path::new(path))
        .map_err(|e| Error::input(format!("failed to read {}: {}", path, e)))
}

fn port(flag: &str, n: u64) -> Result<u16> {
    u16::try_from(n).map_err(|_| Error::input(format!("--{} {} is not a valid port", flag, n)))
}

fn whole_cores(flag: &str, quantity: &str) -> Result<i64> {
    Quantity::parse(quantity)
        .ok()
        .and_then(|q| q.whole_cores())
        .ok_or_else(|| Error::input(format!("invalid quantity '{}' for --{} flag", quantity, flag)))
}

fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
