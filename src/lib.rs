//! meshplane - configuration resolution and manifest rendering for the
//! meshplane service-mesh control plane
//!
//! The `install` pipeline turns layered configuration (compiled-in chart
//! defaults, cluster-observed facts, values files and flags) into a single
//! validated [`values::Values`] tree, renders the installation manifests from
//! it, and appends an override record that the upgrade path re-applies later.
//!
//! # Pipeline
//!
//! ```text
//! defaults ──► --values/--set ──► flags ──► cluster facts ──► issuer creds
//!                                                                  │
//!        manifests + override record ◄── render ◄── diff ◄── validate
//! ```
//!
//! # Modules
//!
//! - [`values`] - The typed configuration tree and its embedded defaults
//! - [`tree`] - Generic diff/merge over nested value maps
//! - [`flag`] - Flag registry, catalog, and values-override options
//! - [`cluster`] - Narrow cluster query interface and fact probes
//! - [`pki`] - Credential parsing, root CA generation, and issuer verification
//! - [`identity`] - Issuer credential policy resolution
//! - [`validate`] - Cross-field validation of the final tree
//! - [`template`] - Templating service backed by minijinja
//! - [`render`] - Chart rendering, override record, output formats
//! - [`install`] - The ordered install pipeline
//! - [`cli`] - Command-line surface
//! - [`error`] - Error types

#![warn(missing_docs)]

pub mod cli;
pub mod cluster;
pub mod error;
pub mod flag;
pub mod identity;
pub mod install;
pub mod pki;
pub mod render;
pub mod template;
pub mod tree;
pub mod validate;
pub mod values;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-known names
// =============================================================================
// These names form the contract between install, upgrade, and the rendered
// charts. Changing any of them breaks upgrades of existing installations.

/// Default namespace the control plane is installed into
pub const DEFAULT_NAMESPACE: &str = "meshplane";

/// ConfigMap whose presence marks an existing installation
pub const CONFIG_CONFIG_MAP_NAME: &str = "meshplane-config";

/// Secret (and key within it) holding the persisted override record
pub const CONFIG_OVERRIDES_NAME: &str = "meshplane-config-overrides";

/// Secret holding externally managed issuer credentials
pub const IDENTITY_ISSUER_SECRET_NAME: &str = "meshplane-identity-issuer";

/// Annotation marking resources created by meshplane
pub const CREATED_BY_ANNOTATION: &str = "meshplane.io/created-by";

/// Label recording the control plane namespace on owned resources
pub const CONTROL_PLANE_NS_LABEL: &str = "meshplane.io/control-plane-ns";

/// Issuer scheme for credentials managed by meshplane itself
pub const ISSUER_SCHEME_SELF_MANAGED: &str = "meshplane.io/tls";

/// Issuer scheme for credentials managed outside meshplane (a TLS secret)
pub const ISSUER_SCHEME_EXTERNAL: &str = "kubernetes.io/tls";

/// Environment variable that pre-seeds the `--registry` flag
pub const ENV_REGISTRY_OVERRIDE: &str = "MESHPLANE_DOCKER_REGISTRY";

/// Default container registry for control plane images
pub const DEFAULT_REGISTRY: &str = "ghcr.io/meshplane";

/// Value written into the created-by annotation
pub fn created_by_annotation_value() -> String {
    format!("meshplane/cli {}", env!("CARGO_PKG_VERSION"))
}
