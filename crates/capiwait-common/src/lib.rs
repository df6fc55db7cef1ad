//! Common types for capiwait: errors, kube-rs helpers and logging setup

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::{AggregateError, Error};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label carried by every CAPI object that belongs to a cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label present on control plane Machines only
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Annotation holding the JSON-encoded operation status record
pub const OPERATION_INFO_ANNOTATION: &str = "capiwait.io/operation-info";

/// Annotation holding the last time progress was observed for the running operation
pub const OPERATION_LAST_OBSERVED_ANNOTATION: &str = "capiwait.io/operation-last-observed";
