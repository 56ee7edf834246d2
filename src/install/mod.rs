//! The install pipeline
//!
//! One invocation renders either the CRD chart (`--crds`) or the control plane
//! chart. The control plane path runs these stages in order, stopping at the
//! first error:
//!
//! 1. CRD presence check (cluster present)
//! 2. Values-overrides merged into the compiled defaults, then flags applied
//! 3. Existing-installation check (cluster present)
//! 4. Node runtime check unless `proxyInit.runAsRoot` (cluster present)
//! 5. API server ports probed into `proxyInit.kubeAPIServerPorts` (cluster present)
//! 6. Issuer credentials resolved
//! 7. Cross-field validation
//! 8. Chart rendered, override record appended, output formatted
//!
//! Everything an invocation needs travels in an [`InstallRequest`] and the
//! [`Installer`] that runs it; nothing is process-wide.
//!
//! # Example
//!
//! ```no_run
//! use meshplane::cluster::InstallContext;
//! use meshplane::flag::FlagSet;
//! use meshplane::install::{InstallRequest, Installer};
//!
//! # async fn run() -> meshplane::Result<()> {
//! let request = InstallRequest {
//!     ignore_cluster: true,
//!     ..Default::default()
//! };
//! let manifest = Installer::new(InstallContext::default())
//!     .run(&request, &FlagSet::new())
//!     .await?;
//! print!("{}", manifest);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cluster::{probe, ClusterApi, InstallContext};
use crate::flag::options::ValueOptions;
use crate::flag::{self, FlagSet};
use crate::pki::{CredentialService, RcgenCredentials};
use crate::render::{self, OutputFormat, CONTROL_PLANE_CHART, CRD_CHART, YAML_SEPARATOR};
use crate::template::{TemplateEngine, TemplateService};
use crate::values::Values;
use crate::{identity, tree, validate, Error, Result, DEFAULT_NAMESPACE};

/// Everything one install invocation was asked to do
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Namespace the control plane is installed into
    pub namespace: String,
    /// Render the CRD chart instead of the control plane
    pub crds: bool,
    /// Skip every cluster lookup
    pub ignore_cluster: bool,
    /// Output format of the rendered stream
    pub output: OutputFormat,
    /// `--values`, `--set`, `--set-string`
    pub value_options: ValueOptions,
}

impl Default for InstallRequest {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            crds: false,
            ignore_cluster: false,
            output: OutputFormat::default(),
            value_options: ValueOptions::default(),
        }
    }
}

/// Runs install requests against an optional cluster
pub struct Installer {
    ctx: InstallContext,
    cluster: Option<Arc<dyn ClusterApi>>,
    templates: Arc<dyn TemplateService>,
    credentials: Arc<dyn CredentialService>,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("ctx", &self.ctx)
            .field("cluster", &self.cluster.is_some())
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// An installer with no cluster, the minijinja engine and rcgen credentials
    pub fn new(ctx: InstallContext) -> Self {
        Self {
            ctx,
            cluster: None,
            templates: Arc::new(TemplateEngine::new()),
            credentials: Arc::new(RcgenCredentials),
        }
    }

    /// Use `cluster` for every lookup
    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterApi>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Replace the templating service
    pub fn with_templates(mut self, templates: Arc<dyn TemplateService>) -> Self {
        self.templates = templates;
        self
    }

    /// Replace the credential service
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialService>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Run `request` and return the formatted manifest stream.
    ///
    /// `flags` carries the typed flags as parsed from the command line; only
    /// the ones that were set are applied. Flags are ignored for `--crds`.
    pub async fn run(&self, request: &InstallRequest, flags: &FlagSet) -> Result<String> {
        let cluster = self.cluster_for(request)?;

        // Malformed overrides fail before the cluster is touched
        let overrides = request.value_options.merge_values()?;

        if let Some(cluster) = cluster {
            info!(namespace = %request.namespace, "checking cluster");
            probe::check_reachable(&self.ctx, cluster).await?;

            if !request.crds {
                let required = self.render_crds(
                    None,
                    &request.namespace,
                    &json!({ "installGatewayAPI": false }),
                )
                .await?;
                probe::check_crds_installed(&self.ctx, cluster, &required).await?;
            }
        }

        let manifest = if request.crds {
            info!(namespace = %request.namespace, "rendering CRDs");
            self.render_crds(cluster, &request.namespace, &overrides)
                .await?
        } else {
            info!(namespace = %request.namespace, "rendering control plane");
            self.render_control_plane(cluster, &request.namespace, &overrides, flags)
                .await?
        };

        render::render_yaml_as(&manifest, request.output)
    }

    fn cluster_for(&self, request: &InstallRequest) -> Result<Option<&dyn ClusterApi>> {
        if request.ignore_cluster {
            debug!("cluster checks skipped");
            return Ok(None);
        }
        match &self.cluster {
            Some(cluster) => Ok(Some(cluster.as_ref())),
            None => Err(Error::cluster_unreachable("no cluster client configured")),
        }
    }

    fn checkpoint(&self) -> Result<()> {
        if self.ctx.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn render_crds(
        &self,
        cluster: Option<&dyn ClusterApi>,
        namespace: &str,
        overrides: &Value,
    ) -> Result<String> {
        let mut defaults = render::crd_default_values()?;

        let values = match cluster {
            Some(cluster) => {
                probe::probe_existing_installation(&self.ctx, cluster, namespace).await?;

                let state = probe::probe_gateway_api(&self.ctx, cluster).await?;
                info!(gateway_api = %state, "probed Gateway API CRDs");
                probe::update_default_values(state, &mut defaults);

                let values = tree::merge(&defaults, overrides);
                probe::validate_final_values(state, &values)?;
                values
            }
            None => tree::merge(&defaults, overrides),
        };

        self.checkpoint()?;
        render::render_chart(self.templates.as_ref(), &CRD_CHART, &values, namespace)
    }

    async fn render_control_plane(
        &self,
        cluster: Option<&dyn ClusterApi>,
        namespace: &str,
        overrides: &Value,
        flags: &FlagSet,
    ) -> Result<String> {
        let mut values = Values::new()?;
        values.merge_overrides(overrides)?;
        flag::apply_all(&mut values, flags)?;

        if let Some(cluster) = cluster {
            probe::probe_existing_installation(&self.ctx, cluster, namespace).await?;

            if values.proxy_init.run_as_root {
                debug!("proxy-init runs as root, skipping node runtime check");
            } else {
                probe::check_node_runtimes(&self.ctx, cluster).await?;
            }

            let ports = probe::probe_api_server_ports(&self.ctx, cluster).await;
            self.checkpoint()?;
            if !ports.is_empty() {
                debug!(ports = %ports, "using probed API server ports");
                values.proxy_init.kube_api_server_ports = ports;
            }
        }

        let policy = identity::initialize_issuer_credentials(
            &self.ctx,
            cluster,
            namespace,
            &mut values,
            self.credentials.as_ref(),
        )
        .await?;
        info!(?policy, "issuer credentials resolved");

        validate::validate_values(
            &self.ctx,
            cluster,
            namespace,
            &values,
            self.credentials.as_ref(),
        )
        .await?;
        self.checkpoint()?;

        let map = values.to_map()?;
        let mut buf = render::render_chart(
            self.templates.as_ref(),
            &CONTROL_PLANE_CHART,
            &map,
            namespace,
        )?;
        buf.push_str(YAML_SEPARATOR);
        buf.push_str(&render::render_overrides(&map, namespace, false)?);
        Ok(buf)
    }
}
