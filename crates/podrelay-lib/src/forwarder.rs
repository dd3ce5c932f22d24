//! Session orchestration: create, wait, dial, forward, tear down

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use podrelay_cluster::{
    describe, ClusterClient, KubeClusterClient, WorkloadGuard, WorkloadManager,
};
use podrelay_proto::{ForwardSpec, SessionPhase, WorkloadHandle};
use podrelay_transport::{dial, KubePortForwardDialer, StreamDialer};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::ForwarderConfig;
use crate::error::ForwardError;
use crate::output::OutputStreams;
use crate::session::Session;
use crate::tunnel::{self, LoopExit};

/// Forwards a local port to a host reachable only from inside the cluster.
///
/// Each [`forward`](Forwarder::forward) call schedules its own relay
/// workload and deletes it again before returning, whatever the outcome.
pub struct Forwarder {
    config: ForwarderConfig,
    manager: WorkloadManager,
    dialer: Arc<dyn StreamDialer>,
    output: Arc<OutputStreams>,
}

impl Forwarder {
    pub fn new(
        config: ForwarderConfig,
        cluster: Arc<dyn ClusterClient>,
        dialer: Arc<dyn StreamDialer>,
    ) -> Self {
        let manager = WorkloadManager::new(cluster, config.namespace.clone(), config.poll);
        Self {
            config,
            manager,
            dialer,
            output: Arc::new(OutputStreams::stdio()),
        }
    }

    /// Forwarder talking to a real cluster through `client`
    pub fn from_client(config: ForwarderConfig, client: kube::Client) -> Self {
        Self::new(
            config,
            Arc::new(KubeClusterClient::new(client.clone())),
            Arc::new(KubePortForwardDialer::new(client)),
        )
    }

    /// Replace the default stdout/stderr progress streams
    pub fn with_output(mut self, output: OutputStreams) -> Self {
        self.output = Arc::new(output);
        self
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Run one forwarding session until `cancel` fires or it fails.
    ///
    /// Cancellation once forwarding has started is a clean exit and returns
    /// `Ok(())`; cancellation earlier returns [`ForwardError::Cancelled`].
    pub async fn forward(
        &self,
        cancel: CancellationToken,
        spec: ForwardSpec,
    ) -> Result<(), ForwardError> {
        self.run(cancel, spec, None).await
    }

    /// Like [`forward`](Forwarder::forward), additionally reporting the bound
    /// local address through `ready` once connections are accepted.
    pub async fn forward_with_ready(
        &self,
        cancel: CancellationToken,
        spec: ForwardSpec,
        ready: oneshot::Sender<SocketAddr>,
    ) -> Result<(), ForwardError> {
        self.run(cancel, spec, Some(ready)).await
    }

    async fn run(
        &self,
        cancel: CancellationToken,
        spec: ForwardSpec,
        ready: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<(), ForwardError> {
        let mut session = Session::new();
        let span = tracing::info_span!(
            "forward",
            session_id = %session.id(),
            target = %spec.remote_address(),
        );

        async move {
            let result = self.run_session(&mut session, &cancel, &spec, ready).await;
            debug!(
                phase = %session.phase(),
                workload = ?session.workload().map(ToString::to_string),
                "Session finished"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn run_session(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
        spec: &ForwardSpec,
        ready: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<(), ForwardError> {
        if let Err(e) = spec.validate() {
            session.fail();
            return Err(e.into());
        }
        if cancel.is_cancelled() {
            session.fail();
            return Err(ForwardError::Cancelled);
        }

        let descriptor = describe(spec).with_image(self.config.image.as_str());

        // Nothing exists yet, so a failed create needs no cleanup
        session.advance(SessionPhase::Provisioning);
        let handle = match self.manager.create(&descriptor).await {
            Ok(handle) => handle,
            Err(e) => {
                session.fail();
                return Err(e.into());
            }
        };
        session.bind_workload(handle.clone());
        let guard = WorkloadGuard::new(self.manager.clone(), handle.clone());

        let outcome = AssertUnwindSafe(self.drive(session, &handle, cancel, spec, ready))
            .catch_unwind()
            .await;

        if self.config.delete_on_exit {
            guard.teardown().await;
        } else {
            let kept = guard.disarm();
            warn!(workload = %kept, "Leaving relay workload in place");
        }

        match outcome {
            Ok(Ok(())) => {
                session.advance(SessionPhase::Closed);
                Ok(())
            }
            Ok(Err(e)) => {
                session.fail();
                Err(e)
            }
            Err(panic) => {
                session.fail();
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Everything between a successful create and teardown
    async fn drive(
        &self,
        session: &mut Session,
        handle: &WorkloadHandle,
        cancel: &CancellationToken,
        spec: &ForwardSpec,
        ready: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<(), ForwardError> {
        self.manager.await_running(handle, cancel).await?;
        session.advance(SessionPhase::Running);

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(ForwardError::Cancelled),
            res = dial(self.dialer.as_ref(), handle, spec, self.config.listen_address) => res?,
        };
        session.advance(SessionPhase::Forwarding);

        self.output.say(format_args!(
            "Forwarding from {} -> {}",
            stream.local_addr(),
            spec.remote_port
        ));
        if let Some(ready) = ready {
            let _ = ready.send(stream.local_addr());
        }

        // The liveness watch ends with the loop, whichever finishes first
        let watch_stop = cancel.child_token();
        let watch = async {
            if let Some(reason) = self.manager.await_exit(handle, &watch_stop).await {
                info!(workload = %handle, reason = %reason, "Relay stopped, closing session");
                stream.close();
            }
        };
        let forwarding = async {
            let exit = tunnel::run(&stream, cancel, &self.output).await;
            watch_stop.cancel();
            exit
        };

        let (exit, ()) = tokio::join!(forwarding, watch);
        match exit? {
            LoopExit::Cancelled => info!("Forwarding cancelled"),
            LoopExit::StreamClosed => info!("Stream session closed"),
        }
        Ok(())
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
