//! Stream dialer
//!
//! Establishes upgraded byte channels to the relay workload's port through the
//! control plane's port-forward sub-resource, and owns the local listener that
//! feeds them.
//!
//! # Channels
//!
//! A [`ChannelOpener`] performs one protocol upgrade per call and yields a
//! bidirectional byte channel bound to the relay port. [`dial`] performs the
//! first upgrade eagerly so a refused upgrade surfaces before anything listens
//! locally; after that every accepted local connection gets its own channel.

pub mod error;
pub mod portforward;
pub mod session;

pub use error::DialError;
pub use portforward::KubePortForwardDialer;
pub use session::{dial, ChannelSource, StreamSession};

use async_trait::async_trait;
use podrelay_proto::WorkloadHandle;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Anything usable as a tunnelled byte channel
pub trait ChannelIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ChannelIo for T {}

/// A boxed byte channel to the relay port
pub type Channel = Box<dyn ChannelIo>;

/// Opens upgraded channels to one port of one workload
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    async fn open(&self) -> Result<Channel, DialError>;
}

/// Builds channel openers for relay workloads
pub trait StreamDialer: Send + Sync {
    fn connector(&self, workload: &WorkloadHandle, remote_port: u16) -> Arc<dyn ChannelOpener>;
}
