//! Session input: what to forward and where

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Reasons a [`ForwardSpec`] is rejected before anything is scheduled
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("remote host must not be empty")]
    EmptyHost,

    #[error("invalid remote port {0}: must be between 1 and 65535")]
    InvalidPort(u16),
}

/// Immutable description of one forwarding session.
///
/// `local_port == 0` asks the OS for an ephemeral port; the resolved port is
/// reported back once the listener is bound. When `timeout` is set the relay
/// workload exits on its own after that long, even if it is never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub timeout: Option<Duration>,
}

impl ForwardSpec {
    /// Forward an ephemeral local port to `remote_host:remote_port`
    pub fn new(remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            local_port: 0,
            remote_host: remote_host.into(),
            remote_port,
            timeout: None,
        }
    }

    pub fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = local_port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.remote_host.trim().is_empty() {
            return Err(SpecError::EmptyHost);
        }
        if self.remote_port == 0 {
            return Err(SpecError::InvalidPort(self.remote_port));
        }
        Ok(())
    }

    /// `host:port` of the destination, bracketing IPv6 literals
    pub fn remote_address(&self) -> String {
        if self.remote_host.contains(':') && !self.remote_host.starts_with('[') {
            format!("[{}]:{}", self.remote_host, self.remote_port)
        } else {
            format!("{}:{}", self.remote_host, self.remote_port)
        }
    }
}

impl fmt::Display for ForwardSpec {
    /// Port pair in `local:remote` form
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local_port, self.remote_port)
    }
}
