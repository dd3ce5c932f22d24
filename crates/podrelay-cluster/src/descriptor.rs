//! Relay workload descriptor
//!
//! The relay is a single `socat` container listening on the remote port inside
//! its own pod network namespace. Every accepted connection is forked and
//! relayed to the destination host, so one pod serves any number of tunnelled
//! connections.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Container, ContainerPort, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use podrelay_proto::ForwardSpec;

/// Image used for the relay container unless configured otherwise
pub const DEFAULT_IMAGE: &str = "alpine/socat";

/// Prefix for the server-generated workload name
pub const NAME_PREFIX: &str = "port-forward-remote-";

/// Name of the relay container
pub const CONTAINER_NAME: &str = "socat";

/// Name of the single exposed container port
pub const PORT_NAME: &str = "forwarded";

const MANAGED_BY: &str = "podrelay";
const TARGET_ANNOTATION: &str = "podrelay.io/target";

/// Everything needed to ask the control plane for a relay workload.
///
/// Plain data; rendering into a Kubernetes object happens in [`to_pod`].
///
/// [`to_pod`]: WorkloadDescriptor::to_pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadDescriptor {
    pub generate_name: String,
    pub container_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub port_name: String,
    pub container_port: u16,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Derive the relay workload for a session
pub fn describe(spec: &ForwardSpec) -> WorkloadDescriptor {
    let relay = vec![
        "socat".to_string(),
        format!("tcp-listen:{},fork,reuseaddr", spec.remote_port),
        format!("tcp-connect:{}", spec.remote_address()),
    ];

    let labels = BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), MANAGED_BY.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        ),
    ]);
    let annotations = BTreeMap::from([(TARGET_ANNOTATION.to_string(), spec.remote_address())]);

    WorkloadDescriptor {
        generate_name: NAME_PREFIX.to_string(),
        container_name: CONTAINER_NAME.to_string(),
        image: DEFAULT_IMAGE.to_string(),
        command: with_timeout(spec.timeout, relay),
        port_name: PORT_NAME.to_string(),
        container_port: spec.remote_port,
        labels,
        annotations,
    }
}

/// Wrap the relay command so it exits on its own after `timeout`
fn with_timeout(timeout: Option<Duration>, command: Vec<String>) -> Vec<String> {
    match timeout {
        Some(limit) if !limit.is_zero() => {
            let mut wrapped = vec!["timeout".to_string(), format!("{}s", limit.as_secs_f64())];
            wrapped.extend(command);
            wrapped
        }
        _ => command,
    }
}

impl WorkloadDescriptor {
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Render as a Kubernetes pod.
    ///
    /// `restartPolicy: Never` lets a self-terminated relay settle in a
    /// terminal phase instead of being restarted by the kubelet.
    pub fn to_pod(&self) -> Pod {
        Pod {
            metadata: ObjectMeta {
                generate_name: Some(self.generate_name.clone()),
                labels: Some(self.labels.clone()),
                annotations: Some(self.annotations.clone()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![Container {
                    name: self.container_name.clone(),
                    image: Some(self.image.clone()),
                    command: Some(self.command.clone()),
                    ports: Some(vec![ContainerPort {
                        name: Some(self.port_name.clone()),
                        container_port: i32::from(self.container_port),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
