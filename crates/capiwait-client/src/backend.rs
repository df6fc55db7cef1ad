//! Kubernetes API access used by the wait engine
//!
//! Everything above this module speaks to the API server through
//! [`KubeBackend`], so tests can swap in a mock or an in-memory fake while
//! production code goes through kube-rs.

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use capiwait_common::Error;

/// Body of a patch request
#[derive(Debug, Clone, PartialEq)]
pub enum PatchBody {
    /// JSON merge patch (RFC 7386)
    Merge(serde_json::Value),
    /// JSON patch (RFC 6902), for addressing one array element by index
    Json(json_patch::Patch),
}

impl PatchBody {
    /// Short name of the patch type, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Merge(_) => "merge",
            Self::Json(_) => "json-patch",
        }
    }
}

/// Generic typed API access against one cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeBackend: Send + Sync {
    /// Fetch one object
    async fn get(&self, ar: &ApiResource, name: &str, namespace: &str)
        -> Result<DynamicObject, Error>;

    /// List objects, filtered by a label selector (empty selects everything)
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Patch one object
    async fn patch(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: &str,
        body: &PatchBody,
    ) -> Result<DynamicObject, Error>;

    /// Create an object
    async fn create(
        &self,
        ar: &ApiResource,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Replace an object
    async fn replace(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Delete an object
    async fn delete(&self, ar: &ApiResource, name: &str, namespace: &str) -> Result<(), Error>;

    /// Kubernetes version reported by the API server (e.g. "v1.30.2")
    async fn server_version(&self) -> Result<String, Error>;

    /// Namespace of the current kubeconfig context
    fn default_namespace(&self) -> String;
}

/// [`KubeBackend`] over a kube-rs client
#[derive(Clone)]
pub struct KubeApiBackend {
    client: Client,
}

impl KubeApiBackend {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, ar)
    }
}

fn map_not_found(err: kube::Error, ar: &ApiResource, name: &str, namespace: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(&ar.kind, name, namespace),
        other => Error::from(other),
    }
}

#[async_trait]
impl KubeBackend for KubeApiBackend {
    async fn get(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: &str,
    ) -> Result<DynamicObject, Error> {
        self.api(ar, namespace)
            .get(name)
            .await
            .map_err(|e| map_not_found(e, ar, name, namespace))
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        let list = self.api(ar, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn patch(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: &str,
        body: &PatchBody,
    ) -> Result<DynamicObject, Error> {
        debug!(kind = %ar.kind, name = %name, namespace = %namespace, patch = body.kind(), "patching resource");
        let api = self.api(ar, namespace);
        let params = PatchParams::default();
        let result = match body {
            PatchBody::Merge(value) => api.patch(name, &params, &Patch::Merge(value)).await,
            PatchBody::Json(ops) => {
                api.patch(name, &params, &Patch::<serde_json::Value>::Json(ops.clone()))
                    .await
            }
        };
        result.map_err(|e| map_not_found(e, ar, name, namespace))
    }

    async fn create(
        &self,
        ar: &ApiResource,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        Ok(self
            .api(ar, namespace)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn replace(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        self.api(ar, namespace)
            .replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_not_found(e, ar, name, namespace))
    }

    async fn delete(&self, ar: &ApiResource, name: &str, namespace: &str) -> Result<(), Error> {
        self.api(ar, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_not_found(e, ar, name, namespace))
    }

    async fn server_version(&self) -> Result<String, Error> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }

    fn default_namespace(&self) -> String {
        self.client.default_namespace().to_string()
    }
}
