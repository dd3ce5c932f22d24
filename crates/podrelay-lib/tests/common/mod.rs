//! Fakes shared by the forwarder integration tests
//!
//! `FakeCluster` stands in for the control plane and counts creates and
//! deletes. `TcpDialer` plays the port-forward sub-resource: every channel is
//! a plain TCP connection to a local server simulating the remote host.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use podrelay_lib::{
    Channel, ChannelOpener, ClusterClient, ClusterError, DialError, ForwardError, ForwardSpec,
    Forwarder, ForwarderConfig, OutputStreams, PollConfig, StreamDialer, WorkloadDescriptor,
    WorkloadHandle, WorkloadStatus,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const RELAY_NAME: &str = "port-forward-remote-x7k2p";

// ============================================================================
// Fake control plane
// ============================================================================

pub struct FakeCluster {
    reject: Option<String>,
    stall_after: Option<usize>,
    reads: AtomicUsize,
    script: Mutex<VecDeque<WorkloadStatus>>,
    steady: Mutex<WorkloadStatus>,
    created: AtomicUsize,
    deleted: AtomicUsize,
    gone: AtomicBool,
    descriptors: Mutex<Vec<WorkloadDescriptor>>,
}

impl FakeCluster {
    /// Schedules instantly; every status read says Running
    pub fn running() -> Arc<Self> {
        Self::scripted(Vec::new(), WorkloadStatus::Running)
    }

    /// Reports `script` in order, then `steady` forever
    pub fn scripted(script: Vec<WorkloadStatus>, steady: WorkloadStatus) -> Arc<Self> {
        Arc::new(Self {
            reject: None,
            stall_after: None,
            reads: AtomicUsize::new(0),
            script: Mutex::new(script.into()),
            steady: Mutex::new(steady),
            created: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
            gone: AtomicBool::new(false),
            descriptors: Mutex::new(Vec::new()),
        })
    }

    /// Refuses every create
    pub fn rejecting(reason: &str) -> Arc<Self> {
        let mut cluster = Self::scripted(Vec::new(), WorkloadStatus::Running);
        if let Some(inner) = Arc::get_mut(&mut cluster) {
            inner.reject = Some(reason.to_string());
        }
        cluster
    }

    /// Reports Running once, then never answers another status read
    pub fn stalling() -> Arc<Self> {
        let mut cluster = Self::running();
        if let Some(inner) = Arc::get_mut(&mut cluster) {
            inner.stall_after = Some(1);
        }
        cluster
    }

    /// Change what subsequent status reads report
    pub fn set_status(&self, status: WorkloadStatus) {
        self.script.lock().unwrap().clear();
        *self.steady.lock().unwrap() = status;
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn last_descriptor(&self) -> Option<WorkloadDescriptor> {
        self.descriptors.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create(
        &self,
        descriptor: &WorkloadDescriptor,
        namespace: &str,
    ) -> Result<WorkloadHandle, ClusterError> {
        if let Some(reason) = &self.reject {
            return Err(ClusterError::Rejected(reason.clone()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.descriptors.lock().unwrap().push(descriptor.clone());
        Ok(WorkloadHandle::new(RELAY_NAME, namespace))
    }

    async fn status(&self, handle: &WorkloadHandle) -> Result<WorkloadStatus, ClusterError> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.stall_after.is_some_and(|limit| read >= limit) {
            return std::future::pending().await;
        }
        if self.gone.load(Ordering::SeqCst) {
            return Err(ClusterError::NotFound(format!(
                "pods \"{}\" not found",
                handle.name
            )));
        }
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or(*self.steady.lock().unwrap()))
    }

    async fn delete(&self, handle: &WorkloadHandle) -> Result<(), ClusterError> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        if self.gone.swap(true, Ordering::SeqCst) {
            return Err(ClusterError::NotFound(format!(
                "pods \"{}\" not found",
                handle.name
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Fake port-forward
// ============================================================================

/// Opens channels as TCP connections to `target`
pub struct TcpDialer {
    target: SocketAddr,
    refuse: bool,
    requests: Mutex<Vec<(WorkloadHandle, u16)>>,
    opened: Arc<AtomicUsize>,
}

impl TcpDialer {
    pub fn to(target: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            target,
            refuse: false,
            requests: Mutex::new(Vec::new()),
            opened: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Every upgrade is refused with 403
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            target: SocketAddr::from(([127, 0, 0, 1], 9)),
            refuse: true,
            requests: Mutex::new(Vec::new()),
            opened: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn requests(&self) -> Vec<(WorkloadHandle, u16)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl StreamDialer for TcpDialer {
    fn connector(&self, workload: &WorkloadHandle, remote_port: u16) -> Arc<dyn ChannelOpener> {
        self.requests
            .lock()
            .unwrap()
            .push((workload.clone(), remote_port));
        Arc::new(TcpOpener {
            target: self.target,
            refuse: self.refuse,
            opened: self.opened.clone(),
        })
    }
}

struct TcpOpener {
    target: SocketAddr,
    refuse: bool,
    opened: Arc<AtomicUsize>,
}

#[async_trait]
impl ChannelOpener for TcpOpener {
    async fn open(&self) -> Result<Channel, DialError> {
        if self.refuse {
            return Err(DialError::Upgrade {
                status: Some(403),
                message: "pods \"relay\" is forbidden: cannot create resource \"pods/portforward\""
                    .to_string(),
            });
        }
        let stream = TcpStream::connect(self.target)
            .await
            .map_err(|e| DialError::Transport(e.to_string()))?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(stream))
    }
}

/// A dialer whose upgrade handshake never completes
pub struct HangingDialer {
    attempts: Arc<AtomicUsize>,
}

impl HangingDialer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl StreamDialer for HangingDialer {
    fn connector(&self, _workload: &WorkloadHandle, _remote_port: u16) -> Arc<dyn ChannelOpener> {
        Arc::new(HangingOpener {
            attempts: self.attempts.clone(),
        })
    }
}

struct HangingOpener {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl ChannelOpener for HangingOpener {
    async fn open(&self) -> Result<Channel, DialError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// A dialer whose first use panics
pub struct PanickingDialer;

impl StreamDialer for PanickingDialer {
    fn connector(&self, _workload: &WorkloadHandle, _remote_port: u16) -> Arc<dyn ChannelOpener> {
        panic!("port-forward client blew up");
    }
}

// ============================================================================
// Simulated remote host
// ============================================================================

/// Answers each connection with a fixed response once the client has sent
/// its whole request (half-closed its side). With an idle limit, connections
/// that have not finished their request in time are dropped unanswered.
pub struct SimulatedRemote {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    task: JoinHandle<()>,
}

impl SimulatedRemote {
    pub async fn start(response: Vec<u8>) -> Self {
        Self::spawn(response, None).await
    }

    /// Like [`start`](Self::start), hanging up on connections idle for `limit`
    pub async fn with_idle_limit(response: Vec<u8>, limit: Duration) -> Self {
        Self::spawn(response, Some(limit)).await
    }

    async fn spawn(response: Vec<u8>, idle_limit: Option<Duration>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        let task = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let log = log.clone();
                let response = response.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let read = match idle_limit {
                        Some(limit) => {
                            match tokio::time::timeout(limit, socket.read_to_end(&mut request))
                                .await
                            {
                                Ok(read) => read,
                                Err(_) => return,
                            }
                        }
                        None => socket.read_to_end(&mut request).await,
                    };
                    if read.is_err() {
                        return;
                    }
                    // The handshake channel is closed without carrying data
                    if !request.is_empty() {
                        log.lock().unwrap().push(request);
                    }
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            addr,
            received,
            task,
        }
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for SimulatedRemote {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Output sink readable from the test
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Short polling so liveness checks do not slow the tests down
pub fn fast_config() -> ForwarderConfig {
    ForwarderConfig::default().with_poll(PollConfig {
        interval: Duration::from_millis(50),
        max_wait: Duration::from_secs(5),
    })
}

pub fn forwarder(
    config: ForwarderConfig,
    cluster: &Arc<FakeCluster>,
    dialer: Arc<dyn StreamDialer>,
) -> Arc<Forwarder> {
    Arc::new(Forwarder::new(config, cluster.clone(), dialer).with_output(OutputStreams::discard()))
}

/// A session running in the background
pub struct Running {
    pub addr: SocketAddr,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Result<(), ForwardError>>,
}

impl Running {
    /// Cancel and wait for the session to finish
    pub async fn stop(self) -> Result<(), ForwardError> {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("session did not stop after cancel")
            .expect("session task panicked")
    }
}

/// Start a session and wait until it accepts connections
pub async fn start(forwarder: Arc<Forwarder>, spec: ForwardSpec) -> Running {
    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();

    let token = cancel.clone();
    let task =
        tokio::spawn(async move { forwarder.forward_with_ready(token, spec, ready_tx).await });

    let addr = tokio::time::timeout(Duration::from_secs(5), ready_rx)
        .await
        .expect("session never became ready")
        .expect("session ended before becoming ready");

    Running { addr, cancel, task }
}

/// Send `request`, half-close, and read the full response
pub async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("no response through the tunnel")
        .unwrap();
    response
}

/// Wait for a counter-like condition set by a background task
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
