//! podrelay library - forward a local port through an ephemeral relay pod
//!
//! The [`Forwarder`] ties the other crates together: it schedules a `socat`
//! relay workload in the cluster, waits for it to run, opens port-forward
//! channels to it and copies bytes between those channels and a local
//! listener. The relay workload is deleted on every exit path.
//!
//! # Example
//!
//! ```ignore
//! use podrelay_lib::{ForwardSpec, Forwarder, ForwarderConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let forwarder = Forwarder::from_client(ForwarderConfig::default(), client);
//!
//! let cancel = CancellationToken::new();
//! let spec = ForwardSpec::new("10.0.0.5", 8080).with_local_port(18080);
//! forwarder.forward(cancel, spec).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod forwarder;
pub mod output;
mod session;
mod tunnel;

pub use config::ForwarderConfig;
pub use error::ForwardError;
pub use forwarder::Forwarder;
pub use output::OutputStreams;

// Re-export the building blocks so callers need only this crate
pub use podrelay_cluster::{
    describe, ClusterClient, ClusterError, KubeClusterClient, PollConfig, WaitError,
    WorkloadDescriptor, WorkloadManager, DEFAULT_IMAGE,
};
pub use podrelay_proto::{ForwardSpec, SessionPhase, SpecError, WorkloadHandle, WorkloadStatus};
pub use podrelay_transport::{
    Channel, ChannelOpener, DialError, KubePortForwardDialer, StreamDialer, StreamSession,
};
