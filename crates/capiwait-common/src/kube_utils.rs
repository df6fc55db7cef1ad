//! kube-rs helpers shared by the client and the CLI
//!
//! Covers API resource construction for dynamic objects and client creation
//! from a kubeconfig path or the ambient environment.

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ApiResource;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Condition type reported once a resource is fully reconciled
pub const CONDITION_READY: &str = "Ready";
/// Condition type reported once a control plane serves requests
pub const CONDITION_AVAILABLE: &str = "Available";
/// Cluster condition tracking control plane initialization
pub const CONDITION_CONTROL_PLANE_READY: &str = "ControlPlaneReady";
/// Cluster condition tracking infrastructure provisioning
pub const CONDITION_INFRASTRUCTURE_READY: &str = "InfrastructureReady";

/// Trait for types that map onto a fixed Kubernetes API resource
///
/// ```ignore
/// impl HasApiResource for Machine {
///     const API_VERSION: &'static str = "cluster.x-k8s.io/v1beta1";
///     const KIND: &'static str = "Machine";
/// }
///
/// let ar = Machine::api_resource();
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "cluster.x-k8s.io/v1beta1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "Machine")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

impl HasApiResource for Deployment {
    const API_VERSION: &'static str = "apps/v1";
    const KIND: &'static str = "Deployment";
}

impl HasApiResource for Secret {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Secret";
}

/// Build an ApiResource from an apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into group and version
///
/// ```
/// use capiwait_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("cluster.x-k8s.io/v1beta1");
/// assert_eq!(group, "cluster.x-k8s.io");
/// assert_eq!(version, "v1beta1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

const KIND_PLURALS: &[(&str, &str)] = &[
    ("cluster", "clusters"),
    ("machine", "machines"),
    ("machinedeployment", "machinedeployments"),
    ("machineset", "machinesets"),
    ("machinepool", "machinepools"),
    ("kubeadmcontrolplane", "kubeadmcontrolplanes"),
    ("kubeadmconfig", "kubeadmconfigs"),
    ("kubeadmconfigtemplate", "kubeadmconfigtemplates"),
    ("clusterclass", "clusterclasses"),
    ("ipaddress", "ipaddresses"),
];

/// Pluralize a Kubernetes resource kind
///
/// Known CAPI kinds come from a lookup table, anything else falls back to
/// simple English rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            config_from_kubeconfig(kubeconfig).await?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Create a kube client from raw kubeconfig YAML
///
/// Used for workload clusters whose kubeconfig is stored in a Secret on the
/// management cluster.
pub async fn create_client_from_yaml(yaml: &str) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| {
        Error::internal_with_context(
            "create_client_from_yaml",
            format!("failed to parse kubeconfig: {}", e),
        )
    })?;
    let mut config = config_from_kubeconfig(kubeconfig).await?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context(
            "create_client_from_yaml",
            format!("failed to create client: {}", e),
        )
    })
}

async fn config_from_kubeconfig(kubeconfig: Kubeconfig) -> Result<Config, Error> {
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {}", e),
            )
        })
}
