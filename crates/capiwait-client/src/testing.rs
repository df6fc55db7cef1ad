//! In-memory backend and object builders for multi-tick wait tests

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{ApiResource, DynamicObject};
use serde_json::{json, Value};

use capiwait_common::kube_utils::{
    HasApiResource, CONDITION_AVAILABLE, CONDITION_CONTROL_PLANE_READY,
    CONDITION_INFRASTRUCTURE_READY, CONDITION_READY,
};
use capiwait_common::{Error, CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL};

use crate::backend::{KubeBackend, PatchBody};
use crate::capi::{
    from_dynamic, to_dynamic, Cluster, ClusterStatus, Condition, ConditionSeverity,
    ConditionStatus, KubeadmControlPlane, KubeadmControlPlaneStatus, Machine,
    MachineDeployment, MachineDeploymentStatus, MachineDeploymentTopology, MachineStatus,
    Topology, WorkersTopology,
};
use crate::resource::TypedResource;

const NAMESPACE: &str = "default";

type ReadHook = Box<dyn FnMut(&mut FakeState, usize) + Send>;
type Key = (String, String, String);

/// A patch the fake received, successful or not
#[derive(Debug, Clone)]
pub(crate) struct RecordedPatch {
    pub kind: String,
    pub name: String,
    pub body: PatchBody,
}

/// Objects stored by the fake, keyed by (kind, namespace, name)
pub(crate) struct FakeState {
    objects: BTreeMap<Key, Value>,
    reads: HashMap<String, usize>,
    lists: HashMap<String, usize>,
    patches: Vec<RecordedPatch>,
    server_version: Result<String, String>,
}

impl FakeState {
    fn key(kind: &str, namespace: &str, name: &str) -> Key {
        (kind.to_string(), namespace.to_string(), name.to_string())
    }

    pub fn insert<K: TypedResource>(&mut self, obj: K) {
        let mut value = match to_dynamic(&obj).and_then(|d| {
            serde_json::to_value(d).map_err(|e| Error::serialization(e.to_string()))
        }) {
            Ok(v) => v,
            Err(e) => panic!("fake cannot store {}: {}", K::KIND, e),
        };
        let name = value["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let namespace = value["metadata"]["namespace"]
            .as_str()
            .unwrap_or(NAMESPACE)
            .to_string();
        value["metadata"]["namespace"] = json!(namespace);
        self.objects
            .insert(Self::key(K::KIND, &namespace, &name), value);
    }

    pub fn get<K: TypedResource>(&self, name: &str) -> Option<K> {
        let value = self.objects.get(&Self::key(K::KIND, NAMESPACE, name))?;
        let obj: DynamicObject = serde_json::from_value(value.clone()).ok()?;
        from_dynamic(obj).ok()
    }

    pub fn remove<K: HasApiResource>(&mut self, name: &str) {
        self.objects.remove(&Self::key(K::KIND, NAMESPACE, name));
    }

    pub fn update<K: TypedResource>(&mut self, name: &str, f: impl FnOnce(&mut K)) {
        let Some(mut obj) = self.get::<K>(name) else {
            panic!("fake has no {} {}", K::KIND, name);
        };
        f(&mut obj);
        self.insert(obj);
    }
}

struct Inner {
    state: FakeState,
    hooks: HashMap<String, ReadHook>,
}

/// Stateful in-memory [`KubeBackend`]
///
/// Clones share state, so a test keeps one handle while the client owns another.
#[derive(Clone)]
pub(crate) struct FakeBackend {
    inner: Arc<Mutex<Inner>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: FakeState {
                    objects: BTreeMap::new(),
                    reads: HashMap::new(),
                    lists: HashMap::new(),
                    patches: Vec::new(),
                    server_version: Ok("v1.30.2".to_string()),
                },
                hooks: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Store an object, replacing any object of the same kind and name
    pub fn insert<K: TypedResource>(&self, obj: K) {
        self.lock().state.insert(obj);
    }

    pub fn get_typed<K: TypedResource>(&self, name: &str) -> Option<K> {
        self.lock().state.get(name)
    }

    /// Run `hook` before every get or list of `K`, with the 1-based read count
    pub fn on_read<K: HasApiResource>(&self, hook: impl FnMut(&mut FakeState, usize) + Send + 'static) {
        self.lock().hooks.insert(K::KIND.to_string(), Box::new(hook));
    }

    pub fn patches(&self) -> Vec<RecordedPatch> {
        self.lock().state.patches.clone()
    }

    pub fn list_count<K: HasApiResource>(&self) -> usize {
        self.lock().state.lists.get(K::KIND).copied().unwrap_or(0)
    }

    pub fn set_server_version(&self, version: Result<String, String>) {
        self.lock().state.server_version = version;
    }

    /// Store `<cluster>-kubeconfig` the way CAPI writes it
    pub fn insert_kubeconfig_secret(&self, cluster: &str, namespace: &str, kubeconfig: &str) {
        let value = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": format!("{}-kubeconfig", cluster), "namespace": namespace},
            "type": "cluster.x-k8s.io/secret",
            "data": {"value": base64::engine::general_purpose::STANDARD.encode(kubeconfig)}
        });
        self.lock().state.objects.insert(
            FakeState::key("Secret", namespace, &format!("{}-kubeconfig", cluster)),
            value,
        );
    }

    /// Count a read of `kind` and run its hook
    fn record_read(&self, kind: &str, list: bool) -> MutexGuard<'_, Inner> {
        let mut guard = self.lock();
        let Inner { state, hooks } = &mut *guard;
        let reads = state.reads.entry(kind.to_string()).or_default();
        *reads += 1;
        let n = *reads;
        if list {
            *state.lists.entry(kind.to_string()).or_default() += 1;
        }
        if let Some(hook) = hooks.get_mut(kind) {
            hook(state, n);
        }
        guard
    }
}

fn to_object(value: &Value) -> Result<DynamicObject, Error> {
    serde_json::from_value(value.clone()).map_err(|e| Error::serialization(e.to_string()))
}

fn matches_selector(value: &Value, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| {
            let (k, v) = term.split_once('=').unwrap_or((term, ""));
            value["metadata"]["labels"][k].as_str() == Some(v)
        })
}

#[async_trait]
impl KubeBackend for FakeBackend {
    async fn get(&self, ar: &ApiResource, name: &str, namespace: &str) -> Result<DynamicObject, Error> {
        let guard = self.record_read(&ar.kind, false);
        match guard.state.objects.get(&FakeState::key(&ar.kind, namespace, name)) {
            Some(value) => to_object(value),
            None => Err(Error::not_found(&ar.kind, name, namespace)),
        }
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        let guard = self.record_read(&ar.kind, true);
        guard
            .state
            .objects
            .iter()
            .filter(|((kind, ns, _), v)| {
                *kind == ar.kind && ns == namespace && matches_selector(v, label_selector)
            })
            .map(|(_, v)| to_object(v))
            .collect()
    }

    async fn patch(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: &str,
        body: &PatchBody,
    ) -> Result<DynamicObject, Error> {
        let mut guard = self.lock();
        guard.state.patches.push(RecordedPatch {
            kind: ar.kind.clone(),
            name: name.to_string(),
            body: body.clone(),
        });
        let Some(value) = guard
            .state
            .objects
            .get_mut(&FakeState::key(&ar.kind, namespace, name))
        else {
            return Err(Error::not_found(&ar.kind, name, namespace));
        };
        match body {
            PatchBody::Merge(patch) => json_patch::merge(value, patch),
            PatchBody::Json(ops) => json_patch::patch(value, &ops.0)
                .map_err(|e| Error::validation(e.to_string()))?,
        }
        to_object(value)
    }

    async fn create(
        &self,
        ar: &ApiResource,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        let key = FakeState::key(&ar.kind, namespace, &name);
        let mut guard = self.lock();
        if guard.state.objects.contains_key(&key) {
            return Err(Error::validation(format!("{} {} already exists", ar.kind, name)));
        }
        let value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
        guard.state.objects.insert(key, value.clone());
        to_object(&value)
    }

    async fn replace(
        &self,
        ar: &ApiResource,
        name: &str,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let key = FakeState::key(&ar.kind, namespace, name);
        let mut guard = self.lock();
        if !guard.state.objects.contains_key(&key) {
            return Err(Error::not_found(&ar.kind, name, namespace));
        }
        let value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
        guard.state.objects.insert(key, value.clone());
        to_object(&value)
    }

    async fn delete(&self, ar: &ApiResource, name: &str, namespace: &str) -> Result<(), Error> {
        self.lock()
            .state
            .objects
            .remove(&FakeState::key(&ar.kind, namespace, name))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(&ar.kind, name, namespace))
    }

    async fn server_version(&self) -> Result<String, Error> {
        self.lock().state.server_version.clone().map_err(Error::internal)
    }

    fn default_namespace(&self) -> String {
        NAMESPACE.to_string()
    }
}

fn cluster_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.to_string())])
}

fn status_of(ok: bool) -> ConditionStatus {
    if ok {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    }
}

fn upsert(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Move the transition time of a cluster condition, creating it if missing
pub(crate) fn set_condition_transition(cluster: &mut Cluster, type_: &str, at: DateTime<Utc>) {
    let conditions = &mut cluster.status.get_or_insert_with(Default::default).conditions;
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(c) => c.last_transition_time = Some(at),
        None => conditions.push(Condition::new(type_, ConditionStatus::Unknown).with_transition(at)),
    }
}

pub(crate) struct ClusterBuilder {
    cluster: Cluster,
}

/// A cluster with no conditions and the cluster-name label
pub(crate) fn cluster_builder(name: &str) -> ClusterBuilder {
    let mut cluster = Cluster::default();
    cluster.metadata.name = Some(name.to_string());
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.labels = Some(cluster_labels(name));
    cluster.status = Some(ClusterStatus::default());
    ClusterBuilder { cluster }
}

impl ClusterBuilder {
    fn status(&mut self) -> &mut ClusterStatus {
        self.cluster.status.get_or_insert_with(Default::default)
    }

    fn with(mut self, condition: Condition) -> Self {
        upsert(&mut self.status().conditions, condition);
        self
    }

    pub fn condition(self, type_: &str, ok: bool) -> Self {
        self.with(Condition::new(type_, status_of(ok)))
    }

    pub fn condition_with_reason(self, type_: &str, ok: bool, reason: &str, message: &str) -> Self {
        self.with(Condition::new(type_, status_of(ok)).with_reason(reason, message))
    }

    /// Ready is False with the given reason
    pub fn ready_reason(self, reason: &str) -> Self {
        self.condition_with_reason(CONDITION_READY, false, reason, "")
    }

    /// Ready, ControlPlaneReady and InfrastructureReady all True
    pub fn initialized(mut self) -> Self {
        let status = self.status();
        status.infrastructure_ready = true;
        status.control_plane_ready = true;
        status.phase = Some("Provisioned".to_string());
        self.condition(CONDITION_READY, true)
            .condition(CONDITION_CONTROL_PLANE_READY, true)
            .condition(CONDITION_INFRASTRUCTURE_READY, true)
    }

    pub fn failed(self, reason: &str, message: &str) -> Self {
        self.with(
            Condition::new(CONDITION_READY, ConditionStatus::False)
                .with_severity(ConditionSeverity::Error)
                .with_reason(reason, message),
        )
    }

    pub fn ready_transition(self, ok: bool, at: DateTime<Utc>) -> Self {
        self.with(Condition::new(CONDITION_READY, status_of(ok)).with_transition(at))
    }

    pub fn control_plane_transition(self, ok: bool, at: DateTime<Utc>) -> Self {
        self.with(Condition::new(CONDITION_CONTROL_PLANE_READY, status_of(ok)).with_transition(at))
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.cluster
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
        self
    }

    /// ClusterClass topology with one pool per name, one replica each
    pub fn topology_pools(mut self, pools: &[&str]) -> Self {
        self.cluster.spec.topology = Some(Topology {
            class: "tkg-vsphere-default".to_string(),
            version: "v1.30.2".to_string(),
            workers: Some(WorkersTopology {
                machine_deployments: pools
                    .iter()
                    .map(|name| MachineDeploymentTopology {
                        class: "tkg-worker".to_string(),
                        name: name.to_string(),
                        replicas: Some(1),
                    })
                    .collect(),
            }),
        });
        self
    }

    pub fn build(self) -> Cluster {
        self.cluster
    }
}

pub(crate) struct ControlPlaneBuilder {
    kcp: KubeadmControlPlane,
}

/// `<cluster>-control-plane`, one replica, Available
pub(crate) fn control_plane_builder(cluster: &str) -> ControlPlaneBuilder {
    let mut kcp = KubeadmControlPlane::default();
    kcp.metadata.name = Some(format!("{}-control-plane", cluster));
    kcp.metadata.namespace = Some(NAMESPACE.to_string());
    kcp.metadata.labels = Some(cluster_labels(cluster));
    kcp.spec.replicas = Some(1);
    kcp.spec.version = "v1.30.2".to_string();
    kcp.status = Some(KubeadmControlPlaneStatus {
        replicas: 1,
        ready_replicas: 1,
        updated_replicas: 1,
        version: Some("v1.30.2".to_string()),
        initialized: true,
        ready: true,
        conditions: vec![Condition::new(CONDITION_AVAILABLE, ConditionStatus::True)],
    });
    ControlPlaneBuilder { kcp }
}

impl ControlPlaneBuilder {
    fn status(&mut self) -> &mut KubeadmControlPlaneStatus {
        self.kcp.status.get_or_insert_with(Default::default)
    }

    pub fn named(mut self, name: &str) -> Self {
        self.kcp.metadata.name = Some(name.to_string());
        self
    }

    pub fn replicas(mut self, desired: i32, ready: i32, updated: i32) -> Self {
        self.kcp.spec.replicas = Some(desired);
        let status = self.status();
        status.replicas = desired;
        status.ready_replicas = ready;
        status.updated_replicas = updated;
        self
    }

    pub fn unavailable(mut self) -> Self {
        upsert(
            &mut self.status().conditions,
            Condition::new(CONDITION_AVAILABLE, ConditionStatus::False),
        );
        self
    }

    pub fn build(self) -> KubeadmControlPlane {
        self.kcp
    }
}

pub(crate) struct MachineDeploymentBuilder {
    md: MachineDeployment,
}

/// A pool with one replica, fully rolled out
pub(crate) fn machine_deployment_builder(cluster: &str, name: &str) -> MachineDeploymentBuilder {
    let mut md = MachineDeployment::default();
    md.metadata.name = Some(name.to_string());
    md.metadata.namespace = Some(NAMESPACE.to_string());
    md.metadata.labels = Some(cluster_labels(cluster));
    md.spec.cluster_name = cluster.to_string();
    md.spec.replicas = Some(1);
    md.status = Some(MachineDeploymentStatus {
        replicas: 1,
        ready_replicas: 1,
        updated_replicas: 1,
        phase: Some("Running".to_string()),
        conditions: vec![],
    });
    MachineDeploymentBuilder { md }
}

impl MachineDeploymentBuilder {
    pub fn replicas(mut self, desired: i32, current: i32, ready: i32, updated: i32) -> Self {
        self.md.spec.replicas = Some(desired);
        let status = self.md.status.get_or_insert_with(Default::default);
        status.replicas = current;
        status.ready_replicas = ready;
        status.updated_replicas = updated;
        self
    }

    pub fn build(self) -> MachineDeployment {
        self.md
    }
}

pub(crate) struct MachineBuilder {
    machine: Machine,
}

/// A worker machine with no status
pub(crate) fn machine_builder(cluster: &str, name: &str) -> MachineBuilder {
    let mut machine = Machine::default();
    machine.metadata.name = Some(name.to_string());
    machine.metadata.namespace = Some(NAMESPACE.to_string());
    machine.metadata.labels = Some(cluster_labels(cluster));
    machine.spec.cluster_name = cluster.to_string();
    MachineBuilder { machine }
}

impl MachineBuilder {
    fn status(&mut self) -> &mut MachineStatus {
        self.machine.status.get_or_insert_with(Default::default)
    }

    pub fn control_plane(mut self) -> Self {
        self.machine
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(CONTROL_PLANE_LABEL.to_string(), String::new());
        self
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.status().phase = Some(phase.to_string());
        self
    }

    pub fn running(self) -> Self {
        self.phase("Running")
    }

    pub fn node_ref(mut self) -> Self {
        let node = self.machine.metadata.name.clone();
        self.status().node_ref = Some(ObjectReference {
            kind: Some("Node".to_string()),
            name: node,
            ..Default::default()
        });
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.machine.spec.version = Some(version.to_string());
        self
    }

    pub fn build(self) -> Machine {
        self.machine
    }
}

/// A provisioned cluster with one control plane machine and one worker
pub(crate) fn healthy_cluster(name: &str) -> FakeBackend {
    let fake = FakeBackend::new();
    fake.insert(cluster_builder(name).initialized().build());
    fake.insert(control_plane_builder(name).build());
    fake.insert(machine_deployment_builder(name, &format!("{}-md-0", name)).build());
    fake.insert(
        machine_builder(name, &format!("{}-cp-0", name))
            .control_plane()
            .running()
            .node_ref()
            .build(),
    );
    fake.insert(
        machine_builder(name, &format!("{}-md-0-w0", name))
            .running()
            .node_ref()
            .build(),
    );
    fake
}
