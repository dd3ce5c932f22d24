//! Relay workload lifecycle
//!
//! Builds the declarative description of the ephemeral relay pod, submits it to
//! the cluster, waits for it to become runnable and removes it again. All
//! control-plane access goes through the [`ClusterClient`] trait so the
//! lifecycle logic can be exercised without a cluster.

pub mod client;
pub mod descriptor;
pub mod error;
pub mod lifecycle;

pub use client::{ClusterClient, KubeClusterClient};
pub use descriptor::{describe, WorkloadDescriptor, DEFAULT_IMAGE};
pub use error::{ClusterError, WaitError};
pub use lifecycle::{PollConfig, WorkloadGuard, WorkloadManager};
