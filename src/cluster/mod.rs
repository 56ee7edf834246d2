//! Cluster access
//!
//! The install pipeline only ever reads from the cluster. [`ClusterApi`] is the
//! narrow set of lookups it needs, each returning `Ok(None)` for a missing
//! object so callers can tell "not found" apart from a failed request.
//! [`KubeCluster`] implements it on top of a kube [`Client`].

pub mod probe;

use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Secret, Service};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

/// Container runtime reported by a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRuntime {
    /// Node name
    pub node: String,
    /// `containerRuntimeVersion`, e.g. `containerd://1.7.2`
    pub runtime: String,
}

/// Read-only cluster lookups used during install
///
/// This trait abstracts the Kubernetes API for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Get a ConfigMap; `None` if it does not exist
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Get a CustomResourceDefinition; `None` if it does not exist
    async fn get_crd(&self, name: &str) -> Result<Option<CustomResourceDefinition>>;

    /// Get a Service; `None` if it does not exist
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Get a Secret; `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Names of all namespaces; used as the reachability check
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Container runtime of every node
    async fn list_node_runtimes(&self) -> Result<Vec<NodeRuntime>>;

    /// Whether the caller may list EndpointSlices cluster-wide
    async fn can_list_endpoint_slices(&self) -> Result<bool>;
}

/// Per-invocation context threaded through every cluster call
#[derive(Debug, Clone, Default)]
pub struct InstallContext {
    cancel: CancellationToken,
}

impl InstallContext {
    /// Create a context that is cancelled through `token`
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// The token that cancels this context
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the context has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut`, returning [`Error::Cancelled`] as soon as the context is
    /// cancelled.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }
}

/// [`ClusterApi`] backed by a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using a kubeconfig path and context name.
    ///
    /// With neither given, the usual resolution applies (`KUBECONFIG`,
    /// `~/.kube/config`, then in-cluster configuration).
    pub async fn connect(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Self> {
        let config = match (kubeconfig, context) {
            (None, None) => Config::infer()
                .await
                .map_err(|e| Error::cluster_unreachable(e.to_string()))?,
            (path, context) => {
                let kubeconfig = match path {
                    Some(path) => Kubeconfig::read_from(path).map_err(|e| {
                        Error::cluster_unreachable(format!(
                            "failed to read kubeconfig {}: {}",
                            path.display(),
                            e
                        ))
                    })?,
                    None => Kubeconfig::read().map_err(|e| {
                        Error::cluster_unreachable(format!("failed to read kubeconfig: {}", e))
                    })?,
                };
                let options = KubeConfigOptions {
                    context: context.map(String::from),
                    ..Default::default()
                };
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| Error::cluster_unreachable(e.to_string()))?
            }
        };
        debug!(cluster_url = %config.cluster_url, "connecting to cluster");
        let client = Client::try_from(config).map_err(|e| Error::cluster_unreachable(e.to_string()))?;
        Ok(Self { client })
    }
}

/// Fold a kube 404 into `Ok(None)`
fn optional<T>(result: std::result::Result<T, kube::Error>) -> Result<Option<T>> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn get_crd(&self, name: &str) -> Result<Option<CustomResourceDefinition>> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        optional(api.get(name).await)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_node_runtimes(&self) -> Result<Vec<NodeRuntime>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|node| NodeRuntime {
                node: node.metadata.name.unwrap_or_default(),
                runtime: node
                    .status
                    .and_then(|s| s.node_info)
                    .map(|info| info.container_runtime_version)
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn can_list_endpoint_slices(&self) -> Result<bool> {
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        for verb in ["list", "watch"] {
            let review = SelfSubjectAccessReview {
                spec: SelfSubjectAccessReviewSpec {
                    resource_attributes: Some(ResourceAttributes {
                        group: Some("discovery.k8s.io".to_string()),
                        resource: Some("endpointslices".to_string()),
                        verb: Some(verb.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            };
            let response = api.create(&PostParams::default(), &review).await?;
            let allowed = response.status.map(|s| s.allowed).unwrap_or(false);
            if !allowed {
                debug!(verb, "endpointslices access denied");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn run_passes_results_through() {
        let ctx = InstallContext::default();
        assert_eq!(ctx.run(async { Ok(7) }).await.unwrap(), 7);
        let err = ctx
            .run(async { Err::<(), _>(Error::input("boom")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let ctx = InstallContext::default();
        ctx.cancellation_token().cancel();
        let result: Result<()> = ctx.run(std::future::pending()).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_hanging_call() {
        let token = CancellationToken::new();
        let ctx = InstallContext::new(token.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let result: Result<()> = ctx
            .run(async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn optional_maps_not_found_to_none() {
        let not_found = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(optional::<()>(Err(not_found)).unwrap().is_none());

        let forbidden = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });
        assert!(matches!(optional::<()>(Err(forbidden)), Err(Error::Kube(_))));
        assert_eq!(optional(Ok(1)).unwrap(), Some(1));
    }
}
