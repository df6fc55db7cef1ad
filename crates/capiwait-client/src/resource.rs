//! Resource access layer
//!
//! Typed get/list/patch/create/update/delete on top of [`KubeBackend`], each
//! optionally wrapped in a bounded poll. A `verify` predicate turns "the read
//! succeeded" into "the object is in the state I want": a failing predicate
//! makes the tick transient instead of successful.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use capiwait_common::kube_utils::HasApiResource;
use capiwait_common::{Error, CLUSTER_NAME_LABEL};

use crate::backend::{KubeBackend, PatchBody};
use crate::capi::{from_dynamic, to_dynamic, Cluster};
use crate::poll::{PollError, PollOptions};
use crate::ClusterClient;

/// A typed object the resource layer can read and write
pub trait TypedResource:
    HasApiResource + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> TypedResource for T where
    T: HasApiResource + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Label selector matching every object of a cluster
pub fn cluster_selector(cluster: &str) -> String {
    format!("{}={}", CLUSTER_NAME_LABEL, cluster)
}

/// Verify predicate accepting anything
pub fn no_verify<K: ?Sized>(_: &K) -> Result<(), Error> {
    Ok(())
}

impl ClusterClient {
    /// Get one object, optionally waiting for it to exist
    pub async fn get_resource<K: TypedResource>(
        &self,
        name: &str,
        namespace: &str,
        poll: Option<PollOptions>,
    ) -> Result<K, Error> {
        self.get_resource_with(name, namespace, no_verify::<K>, poll)
            .await
    }

    /// Get one object that satisfies `verify`
    pub async fn get_resource_with<K, V>(
        &self,
        name: &str,
        namespace: &str,
        verify: V,
        poll: Option<PollOptions>,
    ) -> Result<K, Error>
    where
        K: TypedResource,
        V: Fn(&K) -> Result<(), Error> + Send + Sync,
    {
        let namespace = self.resolve_namespace(namespace);
        let ar = K::api_resource();
        let (backend, ar, ns, verify) = (&self.backend, &ar, namespace.as_str(), &verify);

        self.poller
            .poll_with(poll, move || async move {
                let obj = backend.get(ar, name, ns).await?;
                let typed: K = from_dynamic(obj)?;
                verify(&typed)?;
                Ok::<_, PollError>(typed)
            })
            .await
    }

    /// List objects matching a label selector
    pub async fn list_resources<K: TypedResource>(
        &self,
        namespace: &str,
        label_selector: &str,
        poll: Option<PollOptions>,
    ) -> Result<Vec<K>, Error> {
        self.list_resources_with(namespace, label_selector, no_verify::<[K]>, poll)
            .await
    }

    /// List objects matching a label selector, until `verify` accepts the list
    pub async fn list_resources_with<K, V>(
        &self,
        namespace: &str,
        label_selector: &str,
        verify: V,
        poll: Option<PollOptions>,
    ) -> Result<Vec<K>, Error>
    where
        K: TypedResource,
        V: Fn(&[K]) -> Result<(), Error> + Send + Sync,
    {
        let namespace = self.resolve_namespace(namespace);
        let ar = K::api_resource();
        let (backend, ar, ns, verify) = (&self.backend, &ar, namespace.as_str(), &verify);

        self.poller
            .poll_with(poll, move || async move {
                let items = backend
                    .list(ar, ns, label_selector)
                    .await?
                    .into_iter()
                    .map(from_dynamic::<K>)
                    .collect::<Result<Vec<_>, _>>()?;
                verify(items.as_slice())?;
                Ok::<_, PollError>(items)
            })
            .await
    }

    /// List the objects of one cluster, selected by the cluster-name label
    pub async fn list_cluster_resources<K, V>(
        &self,
        cluster: &str,
        namespace: &str,
        verify: V,
        poll: Option<PollOptions>,
    ) -> Result<Vec<K>, Error>
    where
        K: TypedResource,
        V: Fn(&[K]) -> Result<(), Error> + Send + Sync,
    {
        let selector = cluster_selector(cluster);
        self.list_resources_with(namespace, &selector, verify, poll)
            .await
    }

    /// Patch one object
    pub async fn patch_resource<K: HasApiResource>(
        &self,
        name: &str,
        namespace: &str,
        body: PatchBody,
        poll: Option<PollOptions>,
    ) -> Result<(), Error> {
        let namespace = self.resolve_namespace(namespace);
        let ar = K::api_resource();
        let (backend, ar, ns, body) = (&self.backend, &ar, namespace.as_str(), &body);

        debug!(kind = %ar.kind, name = %name, namespace = %ns, patch = body.kind(), "patching resource");
        self.poller
            .poll_with(poll, move || async move {
                backend.patch(ar, name, ns, body).await?;
                Ok::<_, PollError>(())
            })
            .await
    }

    /// Create an object, returning what the server stored
    pub async fn create_resource<K: TypedResource>(
        &self,
        resource: &K,
        poll: Option<PollOptions>,
    ) -> Result<K, Error> {
        let obj = to_dynamic(resource)?;
        let namespace = self.resolve_namespace(obj.metadata.namespace.as_deref().unwrap_or_default());
        let ar = K::api_resource();
        let (backend, ar, ns, obj) = (&self.backend, &ar, namespace.as_str(), &obj);

        self.poller
            .poll_with(poll, move || async move {
                let created = backend.create(ar, ns, obj).await?;
                Ok::<_, PollError>(from_dynamic::<K>(created)?)
            })
            .await
    }

    /// Replace an existing object, returning what the server stored
    pub async fn update_resource<K: TypedResource>(
        &self,
        resource: &K,
        poll: Option<PollOptions>,
    ) -> Result<K, Error> {
        let obj = to_dynamic(resource)?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::validation(format!("{} to update has no name", K::KIND)))?;
        let namespace = self.resolve_namespace(obj.metadata.namespace.as_deref().unwrap_or_default());
        let ar = K::api_resource();
        let (backend, ar, name, ns, obj) = (&self.backend, &ar, name.as_str(), namespace.as_str(), &obj);

        self.poller
            .poll_with(poll, move || async move {
                let updated = backend.replace(ar, name, ns, obj).await?;
                Ok::<_, PollError>(from_dynamic::<K>(updated)?)
            })
            .await
    }

    /// Delete one object
    pub async fn delete_resource<K: HasApiResource>(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<(), Error> {
        let namespace = self.resolve_namespace(namespace);
        info!(kind = K::KIND, name = %name, namespace = %namespace, "deleting resource");
        self.backend
            .delete(&K::api_resource(), name, &namespace)
            .await
    }

    /// Wait until a get of the object returns not-found
    pub async fn wait_for_resource_deletion<K: HasApiResource>(
        &self,
        name: &str,
        namespace: &str,
        poll: PollOptions,
    ) -> Result<(), Error> {
        let namespace = self.resolve_namespace(namespace);
        let ar = K::api_resource();
        let (backend, ar, ns) = (&self.backend, &ar, namespace.as_str());

        debug!(kind = K::KIND, name = %name, namespace = %ns, "waiting for resource deletion");
        self.poller
            .poll_bounded(poll.interval, poll.timeout, move || async move {
                match backend.get(ar, name, ns).await {
                    Err(err) if err.is_not_found() => Ok(()),
                    Err(err) => Err(PollError::Transient(err)),
                    Ok(_) => Err(PollError::Transient(Error::not_ready(
                        "resource is still present",
                    ))),
                }
            })
            .await
    }

    /// Wait until the cluster object is gone
    pub async fn wait_for_cluster_deletion(&self, cluster: &str, namespace: &str) -> Result<(), Error> {
        self.wait_for_resource_deletion::<Cluster>(
            cluster,
            namespace,
            PollOptions::new(self.config.check_cluster_interval, self.config.operation_timeout),
        )
        .await
    }

    /// Wait until a Deployment has at least one available replica
    pub async fn wait_for_deployment(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.get_resource_with(
            name,
            namespace,
            verify_deployment_available,
            Some(PollOptions::new(
                self.config.check_resource_interval,
                self.config.operation_timeout,
            )),
        )
        .await
        .map(|_: Deployment| ())
    }

    /// Read a cluster's admin kubeconfig from its `<cluster>-kubeconfig` secret
    pub async fn get_kubeconfig_for_cluster(
        &self,
        cluster: &str,
        namespace: &str,
        poll: Option<PollOptions>,
    ) -> Result<String, Error> {
        let secret_name = format!("{}-{}", cluster, self.config.kubeconfig_secret_suffix);
        let key = self.config.kubeconfig_secret_key.as_str();
        debug!(cluster = %cluster, secret = %secret_name, "reading kubeconfig secret");

        let secret: Secret = self
            .get_resource_with(
                &secret_name,
                namespace,
                |s: &Secret| secret_value(s, key).map(|_| ()),
                poll,
            )
            .await?;
        let bytes = secret_value(&secret, key)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            Error::serialization_for_kind("Secret", format!("kubeconfig is not valid UTF-8: {}", e))
        })
    }

    /// Merge-patch the cluster object
    pub async fn patch_cluster_object(
        &self,
        cluster: &str,
        namespace: &str,
        patch: serde_json::Value,
        poll: Option<PollOptions>,
    ) -> Result<(), Error> {
        self.patch_resource::<Cluster>(cluster, namespace, PatchBody::Merge(patch), poll)
            .await
            .map_err(|e| e.context("unable to patch the cluster object"))
    }

    /// Set annotations on the cluster object
    pub async fn patch_cluster_object_annotations(
        &self,
        cluster: &str,
        namespace: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        if annotations.is_empty() {
            return Ok(());
        }
        let patch = json!({ "metadata": { "annotations": annotations } });
        self.patch_cluster_object(cluster, namespace, patch, None)
            .await
    }

    /// Set `spec.replicas` of a control plane or MachineDeployment
    pub async fn update_replicas<K: HasApiResource>(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
    ) -> Result<(), Error> {
        info!(kind = K::KIND, name = %name, replicas, "updating replicas");
        let patch = PatchBody::Merge(json!({ "spec": { "replicas": replicas } }));
        self.patch_resource::<K>(name, namespace, patch, None)
            .await
            .map_err(|e| e.context("unable to patch the replica count"))
    }

    /// Set the replicas of one worker pool of a ClusterClass topology
    ///
    /// The pool is addressed by its index in `spec.topology.workers.machineDeployments`,
    /// which needs a json patch.
    pub async fn update_topology_worker_replicas(
        &self,
        cluster: &str,
        namespace: &str,
        pool: &str,
        replicas: i32,
    ) -> Result<(), Error> {
        let obj: Cluster = self.get_resource(cluster, namespace, None).await?;
        let index = obj
            .spec
            .topology
            .as_ref()
            .and_then(|t| t.workers.as_ref())
            .and_then(|w| w.machine_deployments.iter().position(|md| md.name == pool))
            .ok_or_else(|| {
                Error::validation(format!(
                    "worker pool '{}' not found in topology of cluster {}",
                    pool, cluster
                ))
            })?;

        let ops = json!([{
            "op": "replace",
            "path": format!("/spec/topology/workers/machineDeployments/{}/replicas", index),
            "value": replicas,
        }]);
        let patch: json_patch::Patch = serde_json::from_value(ops)
            .map_err(|e| Error::serialization_for_kind("Cluster", e.to_string()))?;

        info!(cluster = %cluster, pool = %pool, replicas, "updating topology worker replicas");
        self.patch_resource::<Cluster>(cluster, namespace, PatchBody::Json(patch), None)
            .await
            .map_err(|e| e.context("unable to patch the worker replica count"))
    }
}

fn secret_value<'a>(secret: &'a Secret, key: &str) -> Result<&'a [u8], Error> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| b.0.as_slice())
        .ok_or_else(|| {
            Error::not_ready(format!(
                "secret {} has no '{}' entry",
                secret.metadata.name.as_deref().unwrap_or_default(),
                key
            ))
        })
}

/// A Deployment is available once one replica is
pub fn verify_deployment_available(deployment: &Deployment) -> Result<(), Error> {
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    if available < 1 {
        return Err(Error::not_ready(format!(
            "pods are not yet running for deployment '{}' in namespace '{}'",
            deployment.metadata.name.as_deref().unwrap_or_default(),
            deployment.metadata.namespace.as_deref().unwrap_or_default()
        )));
    }
    Ok(())
}
