//! Create, wait for, watch and delete the relay workload

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ClusterClient;
use crate::descriptor::WorkloadDescriptor;
use crate::error::{ClusterError, WaitError};
use podrelay_proto::{WorkloadHandle, WorkloadStatus};

/// Upper bound on a single delete call
const DELETE_TIMEOUT: Duration = Duration::from_secs(10);

/// Status polling parameters, written as whole seconds in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(serialize_with = "seconds::write", deserialize_with = "seconds::read_nonzero")]
    pub interval: Duration,
    #[serde(serialize_with = "seconds::write", deserialize_with = "seconds::read")]
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(60),
        }
    }
}

mod seconds {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn write<S: Serializer>(value: &Duration, out: S) -> Result<S::Ok, S::Error> {
        out.serialize_u64(value.as_secs())
    }

    pub fn read<'de, D: Deserializer<'de>>(input: D) -> Result<Duration, D::Error> {
        u64::deserialize(input).map(Duration::from_secs)
    }

    /// A zero polling interval would spin on the control plane
    pub fn read_nonzero<'de, D: Deserializer<'de>>(input: D) -> Result<Duration, D::Error> {
        match u64::deserialize(input)? {
            0 => Err(D::Error::custom("polling interval must be at least 1 second")),
            secs => Ok(Duration::from_secs(secs)),
        }
    }
}

/// Drives one relay workload through the control plane.
///
/// Cheap to clone; clones share the underlying client.
#[derive(Clone)]
pub struct WorkloadManager {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    poll: PollConfig,
}

impl WorkloadManager {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        namespace: impl Into<String>,
        poll: PollConfig,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            poll,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn poll(&self) -> PollConfig {
        self.poll
    }

    /// Submit the relay workload. Readiness is not implied.
    pub async fn create(
        &self,
        descriptor: &WorkloadDescriptor,
    ) -> Result<WorkloadHandle, ClusterError> {
        let handle = self.client.create(descriptor, &self.namespace).await?;
        info!(
            workload = %handle,
            image = %descriptor.image,
            port = descriptor.container_port,
            "Relay workload created"
        );
        Ok(handle)
    }

    /// Poll until the workload is running.
    ///
    /// The first check happens immediately. A terminal status fails at once;
    /// read errors are retried on the next tick until `max_wait` runs out.
    pub async fn await_running(
        &self,
        handle: &WorkloadHandle,
        cancel: &CancellationToken,
    ) -> Result<(), WaitError> {
        let started = Instant::now();
        let deadline = started + self.poll.max_wait;
        let mut last_error: Option<String> = None;

        loop {
            let observed = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(WaitError::Cancelled { workload: handle.to_string() });
                }
                res = tokio::time::timeout_at(deadline, self.client.status(handle)) => res,
            };

            match observed {
                Ok(Ok(WorkloadStatus::Running)) => {
                    info!(
                        workload = %handle,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Relay workload running"
                    );
                    return Ok(());
                }
                Ok(Ok(status)) if status.is_terminal() => {
                    return Err(WaitError::Terminated {
                        workload: handle.to_string(),
                        reason: format!("status is {}", status),
                    });
                }
                Ok(Ok(status)) => {
                    debug!(workload = %handle, status = %status, "Waiting for relay workload");
                }
                Ok(Err(ClusterError::NotFound(message))) => {
                    return Err(WaitError::Terminated {
                        workload: handle.to_string(),
                        reason: format!("workload disappeared: {}", message),
                    });
                }
                Ok(Err(e)) => {
                    warn!(workload = %handle, error = %e, "Status check failed, retrying");
                    last_error = Some(e.to_string());
                }
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    workload: handle.to_string(),
                    waited: self.poll.max_wait,
                    last_error,
                });
            }

            let nap = self.poll.interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(WaitError::Cancelled { workload: handle.to_string() });
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Watch a running workload until it exits or disappears.
    ///
    /// Returns a description of why it stopped, or `None` when cancelled.
    /// Read errors are ignored; the next tick tries again. A status read in
    /// flight is abandoned on cancel.
    pub async fn await_exit(
        &self,
        handle: &WorkloadHandle,
        cancel: &CancellationToken,
    ) -> Option<String> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.poll.interval) => {}
            }

            let observed = tokio::select! {
                _ = cancel.cancelled() => return None,
                res = self.client.status(handle) => res,
            };

            match observed {
                Ok(status) if status.is_terminal() => {
                    return Some(format!("relay workload exited with status {}", status));
                }
                Ok(_) => {}
                Err(ClusterError::NotFound(_)) => {
                    return Some("relay workload was deleted".to_string());
                }
                Err(e) => {
                    debug!(workload = %handle, error = %e, "Liveness check failed");
                }
            }
        }
    }

    /// Best-effort delete. Never fails and never retries; a missing workload
    /// counts as deleted.
    pub async fn delete(&self, handle: &WorkloadHandle) {
        match tokio::time::timeout(DELETE_TIMEOUT, self.client.delete(handle)).await {
            Ok(Ok(())) => info!(workload = %handle, "Relay workload deleted"),
            Ok(Err(ClusterError::NotFound(_))) => {
                debug!(workload = %handle, "Relay workload already gone")
            }
            Ok(Err(e)) => warn!(
                workload = %handle,
                error = %e,
                "Failed to delete relay workload, relying on its self-timeout"
            ),
            Err(_) => warn!(
                workload = %handle,
                timeout_secs = DELETE_TIMEOUT.as_secs(),
                "Timed out deleting relay workload, relying on its self-timeout"
            ),
        }
    }
}

/// Scoped ownership of a created workload.
///
/// [`teardown`](WorkloadGuard::teardown) deletes it exactly once. A guard
/// dropped while still armed (its owning future was dropped) schedules the
/// delete on the current runtime instead.
pub struct WorkloadGuard {
    manager: WorkloadManager,
    handle: WorkloadHandle,
    armed: bool,
}

impl WorkloadGuard {
    pub fn new(manager: WorkloadManager, handle: WorkloadHandle) -> Self {
        Self {
            manager,
            handle,
            armed: true,
        }
    }

    pub fn handle(&self) -> &WorkloadHandle {
        &self.handle
    }

    /// Delete the workload and release the guard
    pub async fn teardown(mut self) {
        self.armed = false;
        self.manager.delete(&self.handle).await;
    }

    /// Release the guard without deleting the workload
    pub fn disarm(mut self) -> WorkloadHandle {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for WorkloadGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(workload = %self.handle, "Session dropped, scheduling relay workload delete");
                let manager = self.manager.clone();
                let handle = self.handle.clone();
                runtime.spawn(async move { manager.delete(&handle).await });
            }
            Err(_) => {
                error!(workload = %self.handle, "No runtime available, relay workload left behind");
            }
        }
    }
}
