//! Local listener plus the channels feeding it

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DialError;
use crate::{Channel, ChannelOpener, StreamDialer};
use podrelay_proto::{ForwardSpec, WorkloadHandle};

/// Negotiate the stream to a relay workload and bind the local end.
///
/// One upgrade is made before the listener is bound, so a refused upgrade
/// never leaves a local port open. That channel only proves the upgrade works
/// and is closed straight away; each accepted connection opens its own.
pub async fn dial(
    dialer: &dyn StreamDialer,
    workload: &WorkloadHandle,
    spec: &ForwardSpec,
    listen_ip: IpAddr,
) -> Result<StreamSession, DialError> {
    let opener = dialer.connector(workload, spec.remote_port);
    drop(opener.open().await?);
    debug!(workload = %workload, remote_port = spec.remote_port, "Upgrade handshake complete");

    let bind_addr = SocketAddr::new(listen_ip, spec.local_port);
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|source| DialError::Bind {
            addr: bind_addr,
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| DialError::Bind {
        addr: bind_addr,
        source,
    })?;

    info!(
        workload = %workload,
        local_addr = %local_addr,
        remote_port = spec.remote_port,
        "Stream session established"
    );

    Ok(StreamSession {
        listener,
        local_addr,
        remote_port: spec.remote_port,
        channels: ChannelSource {
            opener,
            closed: CancellationToken::new(),
        },
    })
}

/// Hands out channels to the relay port.
///
/// Clones share the opener and the close token, so a clone can be moved into
/// each connection task.
#[derive(Clone)]
pub struct ChannelSource {
    opener: Arc<dyn ChannelOpener>,
    closed: CancellationToken,
}

impl ChannelSource {
    /// Get a channel for one local connection.
    ///
    /// A `Gone` answer from the control plane closes the session.
    pub async fn open(&self) -> Result<Channel, DialError> {
        if self.closed.is_cancelled() {
            return Err(DialError::Closed);
        }

        match self.opener.open().await {
            Err(DialError::Gone(reason)) => {
                debug!(reason = %reason, "Relay gone, closing stream session");
                self.closed.cancel();
                Err(DialError::Gone(reason))
            }
            other => other,
        }
    }

    /// Token cancelled when the session closes
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// An established stream session.
///
/// Closing it, explicitly or by dropping it, ends every channel handed out
/// through its [`ChannelSource`].
pub struct StreamSession {
    listener: TcpListener,
    local_addr: SocketAddr,
    remote_port: u16,
    channels: ChannelSource,
}

impl StreamSession {
    /// Address actually bound, with the OS-assigned port when 0 was requested
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    pub fn channels(&self) -> ChannelSource {
        self.channels.clone()
    }

    pub async fn open_channel(&self) -> Result<Channel, DialError> {
        self.channels.open().await
    }

    pub fn close(&self) {
        self.channels.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.channels.closed.is_cancelled()
    }

    /// Resolves once the session is closed
    pub async fn closed(&self) {
        self.channels.closed.cancelled().await
    }

    pub fn close_token(&self) -> CancellationToken {
        self.channels.close_token()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}
