//! Kubernetes port-forward channels
//!
//! Each channel is its own websocket upgrade against
//! `pods/<name>/portforward`, carrying one data stream and one error stream
//! for the relay port.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Portforwarder};
use kube::Client;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

use crate::error::DialError;
use crate::{Channel, ChannelOpener, StreamDialer};
use podrelay_proto::WorkloadHandle;

/// [`StreamDialer`] using the pod port-forward sub-resource
#[derive(Clone)]
pub struct KubePortForwardDialer {
    client: Client,
}

impl KubePortForwardDialer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl StreamDialer for KubePortForwardDialer {
    fn connector(&self, workload: &WorkloadHandle, remote_port: u16) -> Arc<dyn ChannelOpener> {
        Arc::new(PodPortOpener {
            pods: Api::namespaced(self.client.clone(), &workload.namespace),
            pod: workload.name.clone(),
            port: remote_port,
        })
    }
}

struct PodPortOpener {
    pods: Api<Pod>,
    pod: String,
    port: u16,
}

#[async_trait]
impl ChannelOpener for PodPortOpener {
    async fn open(&self) -> Result<Channel, DialError> {
        let mut forwarder = self.pods.portforward(&self.pod, &[self.port]).await?;

        let stream = forwarder.take_stream(self.port).ok_or_else(|| {
            DialError::Transport(format!("no data stream for port {}", self.port))
        })?;

        // The relay reports failures (e.g. connection refused by the target)
        // on the error stream rather than through the data stream.
        if let Some(errors) = forwarder.take_error(self.port) {
            let pod = self.pod.clone();
            let port = self.port;
            tokio::spawn(async move {
                if let Some(message) = errors.await {
                    warn!(pod = %pod, port, error = %message, "Relay reported port-forward error");
                }
            });
        }

        debug!(pod = %self.pod, port = self.port, "Port-forward channel opened");

        Ok(Box::new(PortForwardChannel {
            stream: Box::new(stream),
            forwarder,
        }))
    }
}

/// Data stream of one port-forward upgrade, aborting the upgrade when dropped
struct PortForwardChannel {
    stream: Channel,
    forwarder: Portforwarder,
}

impl AsyncRead for PortForwardChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for PortForwardChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl Drop for PortForwardChannel {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
