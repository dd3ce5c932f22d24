//! Forwarder configuration
//!
//! Everything the forwarder needs besides the per-session [`ForwardSpec`]
//! lives here and is passed to [`Forwarder::new`](crate::Forwarder::new).
//! The struct deserializes from YAML with every field optional:
//!
//! ```yaml
//! namespace: tools
//! image: alpine/socat:1.8.0.0
//! listen_address: 0.0.0.0
//! poll:
//!   interval: 2
//!   max_wait: 120
//! delete_on_exit: true
//! ```
//!
//! [`ForwardSpec`]: podrelay_proto::ForwardSpec

use std::net::{IpAddr, Ipv4Addr};

use podrelay_cluster::{PollConfig, DEFAULT_IMAGE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Namespace the relay workload is created in
    pub namespace: String,
    /// Container image providing `socat`
    pub image: String,
    /// Address the local listener binds to
    pub listen_address: IpAddr,
    /// Readiness and liveness polling
    pub poll: PollConfig,
    /// Delete the relay workload when the session ends. When disabled the
    /// relay's self-timeout is the only cleanup.
    pub delete_on_exit: bool,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            image: DEFAULT_IMAGE.to_string(),
            listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            poll: PollConfig::default(),
            delete_on_exit: true,
        }
    }
}

impl ForwarderConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }
}
