//! Typed views of the Cluster API objects the wait engine reads
//!
//! Only the fields the engine looks at are modelled. Objects travel through
//! [`KubeBackend`](crate::backend::KubeBackend) as `DynamicObject` and are
//! converted here with serde, so unknown fields are ignored.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use capiwait_common::kube_utils::{
    HasApiResource, CONDITION_AVAILABLE, CONDITION_CONTROL_PLANE_READY,
    CONDITION_INFRASTRUCTURE_READY, CONDITION_READY,
};
use capiwait_common::{Error, CONTROL_PLANE_LABEL};

const CAPI_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";
const KCP_API_VERSION: &str = "controlplane.cluster.x-k8s.io/v1beta1";

/// Status of a condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Controller could not tell
    #[default]
    Unknown,
}

/// How bad a false condition is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionSeverity {
    /// Needs attention, more waiting will not fix it
    Error,
    /// Degraded
    Warning,
    /// Informational, typically a rollout in progress
    Info,
    /// Anything else the controller wrote
    #[serde(other)]
    Other,
}

/// A CAPI v1beta1 condition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. "Ready"
    #[serde(rename = "type")]
    pub type_: String,
    /// True, False or Unknown
    #[serde(default)]
    pub status: ConditionStatus,
    /// Severity, only meaningful when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the controller last re-evaluated this condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Create a condition with the given type and status
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            type_: type_.into(),
            status,
            ..Default::default()
        }
    }

    /// Set severity
    pub fn with_severity(mut self, severity: ConditionSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Set reason and message
    pub fn with_reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self.message = Some(message.into());
        self
    }

    /// Set last transition time
    pub fn with_transition(mut self, at: DateTime<Utc>) -> Self {
        self.last_transition_time = Some(at);
        self
    }
}

/// Read access to a resource's condition list
pub trait HasConditions {
    /// All conditions
    fn conditions(&self) -> &[Condition];

    /// The condition of the given type, if reported
    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    /// Whether the condition is reported as True
    fn is_true(&self, type_: &str) -> bool {
        self.condition(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Whether the condition is reported as False
    fn is_false(&self, type_: &str) -> bool {
        self.condition(type_)
            .is_some_and(|c| c.status == ConditionStatus::False)
    }

    /// Severity of the condition
    fn severity(&self, type_: &str) -> Option<ConditionSeverity> {
        self.condition(type_).and_then(|c| c.severity)
    }

    /// Reason of the condition, empty when absent
    fn reason(&self, type_: &str) -> &str {
        self.condition(type_)
            .and_then(|c| c.reason.as_deref())
            .unwrap_or_default()
    }

    /// Message of the condition, empty when absent
    fn message(&self, type_: &str) -> &str {
        self.condition(type_)
            .and_then(|c| c.message.as_deref())
            .unwrap_or_default()
    }

    /// Last transition time of the condition
    fn last_transition_time(&self, type_: &str) -> Option<DateTime<Utc>> {
        self.condition(type_).and_then(|c| c.last_transition_time)
    }
}

/// CAPI `Cluster`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Desired state
    #[serde(default)]
    pub spec: ClusterSpec,
    /// Observed state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ClusterStatus>,
}

/// Desired state of a `Cluster`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Managed topology, for ClusterClass based clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<Topology>,
}

/// ClusterClass topology of a `Cluster`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// ClusterClass name
    #[serde(default)]
    pub class: String,
    /// Kubernetes version of the whole topology
    #[serde(default)]
    pub version: String,
    /// Worker pools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<WorkersTopology>,
}

/// Worker part of a topology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkersTopology {
    /// MachineDeployment pools, addressed by index in json patches
    #[serde(default)]
    pub machine_deployments: Vec<MachineDeploymentTopology>,
}

/// One worker pool of a topology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentTopology {
    /// Worker class
    #[serde(default)]
    pub class: String,
    /// Pool name
    pub name: String,
    /// Desired replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Observed state of a `Cluster`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Lifecycle phase (Pending, Provisioning, Provisioned, Deleting, Failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Infrastructure provider reports ready
    #[serde(default)]
    pub infrastructure_ready: bool,
    /// Control plane provider reports ready
    #[serde(default)]
    pub control_plane_ready: bool,
    /// Conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// CAPI `KubeadmControlPlane`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubeadmControlPlane {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Desired state
    #[serde(default)]
    pub spec: KubeadmControlPlaneSpec,
    /// Observed state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<KubeadmControlPlaneStatus>,
}

/// Desired state of a `KubeadmControlPlane`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmControlPlaneSpec {
    /// Desired control plane machines, 1 when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Kubernetes version
    #[serde(default)]
    pub version: String,
}

/// Observed state of a `KubeadmControlPlane`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmControlPlaneStatus {
    /// Machines targeted by this control plane
    #[serde(default)]
    pub replicas: i32,
    /// Machines with a ready node
    #[serde(default)]
    pub ready_replicas: i32,
    /// Machines at the desired spec
    #[serde(default)]
    pub updated_replicas: i32,
    /// Lowest Kubernetes version among the machines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// First control plane machine is up
    #[serde(default)]
    pub initialized: bool,
    /// Control plane answers requests
    #[serde(default)]
    pub ready: bool,
    /// Conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// CAPI `MachineDeployment`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineDeployment {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Desired state
    #[serde(default)]
    pub spec: MachineDeploymentSpec,
    /// Observed state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MachineDeploymentStatus>,
}

/// Desired state of a `MachineDeployment`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    /// Owning cluster
    #[serde(default)]
    pub cluster_name: String,
    /// Desired machines, 1 when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Machine template
    #[serde(default)]
    pub template: MachineTemplateSpec,
}

/// Template for the machines of a pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateSpec {
    /// Spec stamped onto each machine
    #[serde(default)]
    pub spec: MachineSpec,
}

/// Observed state of a `MachineDeployment`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentStatus {
    /// Machines targeted by this deployment
    #[serde(default)]
    pub replicas: i32,
    /// Machines with a ready node
    #[serde(default)]
    pub ready_replicas: i32,
    /// Machines at the desired template
    #[serde(default)]
    pub updated_replicas: i32,
    /// Rollout phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// CAPI `Machine`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Desired state
    #[serde(default)]
    pub spec: MachineSpec,
    /// Observed state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MachineStatus>,
}

/// Desired state of a `Machine`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Owning cluster
    #[serde(default)]
    pub cluster_name: String,
    /// Kubernetes version of the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Observed state of a `Machine`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Lifecycle phase (Pending, Provisioning, Provisioned, Running, Deleting, Failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Node bound to this machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<ObjectReference>,
    /// Conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl HasApiResource for Cluster {
    const API_VERSION: &'static str = CAPI_API_VERSION;
    const KIND: &'static str = "Cluster";
}

impl HasApiResource for KubeadmControlPlane {
    const API_VERSION: &'static str = KCP_API_VERSION;
    const KIND: &'static str = "KubeadmControlPlane";
}

impl HasApiResource for MachineDeployment {
    const API_VERSION: &'static str = CAPI_API_VERSION;
    const KIND: &'static str = "MachineDeployment";
}

impl HasApiResource for Machine {
    const API_VERSION: &'static str = CAPI_API_VERSION;
    const KIND: &'static str = "Machine";
}

impl HasConditions for Cluster {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[][..], |s| s.conditions.as_slice())
    }
}

impl HasConditions for KubeadmControlPlane {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[][..], |s| s.conditions.as_slice())
    }
}

impl HasConditions for MachineDeployment {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[][..], |s| s.conditions.as_slice())
    }
}

impl HasConditions for Machine {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[][..], |s| s.conditions.as_slice())
    }
}

/// Desired/observed replica counts of a control plane or worker pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Replicas {
    /// Desired replicas, defaulting to 1
    pub desired: i32,
    /// Current replicas
    pub current: i32,
    /// Ready replicas
    pub ready: i32,
    /// Replicas at the desired spec
    pub updated: i32,
}

impl Replicas {
    /// Every replica is ready and up to date
    pub fn converged(&self) -> bool {
        self.desired == self.ready && self.desired == self.updated
    }

    /// Every replica exists, is ready and up to date
    pub fn fully_rolled_out(&self) -> bool {
        self.converged() && self.desired == self.current
    }
}

impl Cluster {
    /// Object name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Value of an annotation
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Whether infrastructure is ready, by condition or status flag
    pub fn infrastructure_ready(&self) -> bool {
        self.is_true(CONDITION_INFRASTRUCTURE_READY)
            || self.status.as_ref().is_some_and(|s| s.infrastructure_ready)
    }

    /// Whether the control plane is ready, by condition or status flag
    pub fn control_plane_ready(&self) -> bool {
        self.is_true(CONDITION_CONTROL_PLANE_READY)
            || self.status.as_ref().is_some_and(|s| s.control_plane_ready)
    }

    /// Whether the aggregate Ready condition holds
    pub fn ready(&self) -> bool {
        self.is_true(CONDITION_READY)
    }

    /// Ready is False with severity Error
    pub fn failed(&self) -> bool {
        self.is_false(CONDITION_READY)
            && self.severity(CONDITION_READY) == Some(ConditionSeverity::Error)
    }
}

impl KubeadmControlPlane {
    /// Object name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Whether the Available condition holds
    pub fn available(&self) -> bool {
        self.is_true(CONDITION_AVAILABLE)
    }

    /// Replica counts
    pub fn replicas(&self) -> Replicas {
        let status = self.status.clone().unwrap_or_default();
        Replicas {
            desired: self.spec.replicas.unwrap_or(1),
            current: status.replicas,
            ready: status.ready_replicas,
            updated: status.updated_replicas,
        }
    }
}

impl MachineDeployment {
    /// Object name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Replica counts
    pub fn replicas(&self) -> Replicas {
        let status = self.status.clone().unwrap_or_default();
        Replicas {
            desired: self.spec.replicas.unwrap_or(1),
            current: status.replicas,
            ready: status.ready_replicas,
            updated: status.updated_replicas,
        }
    }
}

impl Machine {
    /// Object name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Lifecycle phase, empty when not reported yet
    pub fn phase(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or_default()
    }

    /// Whether this machine belongs to the control plane
    pub fn is_control_plane(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .is_some_and(|l| l.contains_key(CONTROL_PLANE_LABEL))
    }

    /// Whether a node object is bound to this machine
    pub fn has_node_ref(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.node_ref.is_some())
    }

    /// Snapshot key, `name-phase`
    pub fn snapshot_key(&self) -> String {
        format!("{}-{}", self.name(), self.phase())
    }
}

/// Convert a dynamic object into a typed view
pub fn from_dynamic<K>(obj: DynamicObject) -> Result<K, Error>
where
    K: HasApiResource + DeserializeOwned,
{
    let value = serde_json::to_value(&obj)
        .map_err(|e| Error::serialization_for_kind(K::KIND, e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(K::KIND, e.to_string()))
}

/// Convert a typed view into a dynamic object carrying apiVersion and kind
pub fn to_dynamic<K>(obj: &K) -> Result<DynamicObject, Error>
where
    K: HasApiResource + Serialize,
{
    let mut value =
        serde_json::to_value(obj).map_err(|e| Error::serialization_for_kind(K::KIND, e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".into(), K::API_VERSION.into());
        map.insert("kind".into(), K::KIND.into());
    }
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(K::KIND, e.to_string()))
}
