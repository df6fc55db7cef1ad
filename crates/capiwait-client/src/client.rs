//! Entry point of the wait engine

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use capiwait_common::kube_utils::{create_client, create_client_from_yaml};
use capiwait_common::Error;

use crate::backend::{KubeApiBackend, KubeBackend};
use crate::clock::{tokio_clock, Clock};
use crate::config::ClusterClientConfig;
use crate::poll::Poller;

/// Client for waiting on Cluster API managed clusters
///
/// Owns the management cluster backend, the poller and the configuration.
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct ClusterClient {
    pub(crate) backend: Arc<dyn KubeBackend>,
    pub(crate) poller: Poller,
    pub(crate) config: ClusterClientConfig,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ClusterClient {
    /// Create a client sleeping on the tokio timer
    pub fn new(backend: Arc<dyn KubeBackend>, config: ClusterClientConfig) -> Result<Self, Error> {
        Self::with_clock(backend, config, tokio_clock())
    }

    /// Create a client with an injected clock
    pub fn with_clock(
        backend: Arc<dyn KubeBackend>,
        config: ClusterClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            backend,
            poller: Poller::new(clock),
            config,
        })
    }

    /// Connect to the management cluster from a kubeconfig path or the environment
    pub async fn connect(
        kubeconfig: Option<&Path>,
        config: ClusterClientConfig,
    ) -> Result<Self, Error> {
        let client = create_client(kubeconfig).await?;
        Self::new(Arc::new(KubeApiBackend::new(client)), config)
    }

    /// Configuration in use
    pub fn config(&self) -> &ClusterClientConfig {
        &self.config
    }

    /// Backend of the management cluster
    pub fn backend(&self) -> &Arc<dyn KubeBackend> {
        &self.backend
    }

    /// Poller used by every wait
    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub(crate) fn resolve_namespace(&self, namespace: &str) -> String {
        if namespace.is_empty() {
            self.backend.default_namespace()
        } else {
            namespace.to_string()
        }
    }

    /// Backend for a workload cluster, built from its kubeconfig secret
    pub async fn workload_backend(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<Arc<dyn KubeBackend>, Error> {
        let kubeconfig = self.get_kubeconfig_for_cluster(cluster, namespace, None).await?;
        debug!(cluster = %cluster, "building workload cluster client");
        let client = create_client_from_yaml(&kubeconfig).await?;
        Ok(Arc::new(KubeApiBackend::new(client)))
    }
}
