//! Wait engine for Cluster API managed clusters
//!
//! This crate provides:
//! - A bounded/unbounded poller driven by an injectable clock
//! - Typed resource access over a mockable Kubernetes backend
//! - Cluster status snapshots and progress detection between them
//! - Stall-detecting waits for cluster creation and Kubernetes upgrades
//!
//! Every wait returns `Result<(), Error>`; the error text is meant to be shown
//! to the operator as is.

pub mod backend;
pub mod capi;
pub mod client;
pub mod clock;
pub mod config;
pub mod operation;
pub mod poll;
pub mod readiness;
pub mod resource;
pub mod stall;
pub mod status;
pub mod upgrade;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{KubeApiBackend, KubeBackend, PatchBody};
pub use client::ClusterClient;
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::ClusterClientConfig;
pub use operation::{is_operation_stalled, Operation, OperationRecord, OperationStatus};
pub use poll::{PollError, PollOptions, Poller, Probe};
pub use readiness::{ClusterInitialized, ReadinessPhase};
pub use status::ClusterStatusInfo;
pub use upgrade::{ControlPlaneUpgrade, WorkerUpgrade};
pub use watch::{StallBudget, TransitionCheck};

#[cfg(test)]
pub use backend::MockKubeBackend;
