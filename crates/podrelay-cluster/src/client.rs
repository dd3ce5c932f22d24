//! Control-plane client
//!
//! Trait-based so the lifecycle logic can run against a mock while production
//! code talks to the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::descriptor::WorkloadDescriptor;
use crate::error::ClusterError;
use podrelay_proto::{WorkloadHandle, WorkloadStatus};

/// Workload operations the lifecycle manager needs from the control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Submit a workload for scheduling. Returns once the control plane has
    /// accepted it, not once it is running.
    async fn create(
        &self,
        descriptor: &WorkloadDescriptor,
        namespace: &str,
    ) -> Result<WorkloadHandle, ClusterError>;

    /// Read the current status of a workload
    async fn status(&self, handle: &WorkloadHandle) -> Result<WorkloadStatus, ClusterError>;

    /// Delete a workload
    async fn delete(&self, handle: &WorkloadHandle) -> Result<(), ClusterError>;
}

/// [`ClusterClient`] backed by the Kubernetes pods API
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create(
        &self,
        descriptor: &WorkloadDescriptor,
        namespace: &str,
    ) -> Result<WorkloadHandle, ClusterError> {
        let pod = descriptor.to_pod();
        let created = self
            .pods(namespace)
            .create(&PostParams::default(), &pod)
            .await
            .map_err(ClusterError::from_create)?;

        let name = created.metadata.name.ok_or(ClusterError::MissingName)?;
        let namespace = created
            .metadata
            .namespace
            .unwrap_or_else(|| namespace.to_string());

        debug!(pod = %name, namespace = %namespace, "Pod created");
        Ok(WorkloadHandle::new(name, namespace))
    }

    async fn status(&self, handle: &WorkloadHandle) -> Result<WorkloadStatus, ClusterError> {
        let pod = self.pods(&handle.namespace).get(&handle.name).await?;
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        Ok(WorkloadStatus::from_phase(phase))
    }

    async fn delete(&self, handle: &WorkloadHandle) -> Result<(), ClusterError> {
        self.pods(&handle.namespace)
            .delete(&handle.name, &DeleteParams::background())
            .await?;
        Ok(())
    }
}
