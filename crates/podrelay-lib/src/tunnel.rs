//! The forwarding loop: local connections in, relay channels out

use std::net::SocketAddr;
use std::sync::Arc;

use podrelay_transport::{ChannelSource, DialError, StreamSession};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ForwardError;
use crate::output::OutputStreams;

/// Why the forwarding loop stopped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// The caller cancelled the session
    Cancelled,
    /// The stream session closed, usually because the relay exited
    StreamClosed,
}

/// Accept local connections and relay each over its own channel until the
/// caller cancels, the stream session closes, or the listener fails.
///
/// Connection tasks still running when the loop ends are aborted.
pub(crate) async fn run(
    stream: &StreamSession,
    cancel: &CancellationToken,
    output: &Arc<OutputStreams>,
) -> Result<LoopExit, ForwardError> {
    let mut connections = JoinSet::new();
    let local_port = stream.local_port();

    let exit = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break Ok(LoopExit::Cancelled),
            _ = stream.closed() => break Ok(LoopExit::StreamClosed),
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = stream.accept() => match accepted {
                Ok((socket, peer)) => {
                    output.say(format_args!("Handling connection for {}", local_port));
                    connections.spawn(relay_connection(
                        socket,
                        peer,
                        stream.channels(),
                        output.clone(),
                    ));
                }
                Err(e) => {
                    warn!(local_port, error = %e, "Local listener failed");
                    break Err(ForwardError::Forwarding(e));
                }
            },
        }
    };

    let active = connections.len();
    if active > 0 {
        debug!(active, "Aborting active connections");
    }
    connections.shutdown().await;

    exit
}

/// Copy bytes between one local connection and its relay channel
async fn relay_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    channels: ChannelSource,
    output: Arc<OutputStreams>,
) {
    let closed = channels.close_token();

    let opened = tokio::select! {
        _ = closed.cancelled() => return,
        res = channels.open() => res,
    };

    let mut channel = match opened {
        Ok(channel) => channel,
        Err(DialError::Gone(reason)) => {
            info!(peer = %peer, reason = %reason, "Relay gone, dropping connection");
            return;
        }
        Err(DialError::Closed) => return,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Failed to open relay channel");
            output.complain(format_args!(
                "error creating forwarding stream for {}: {}",
                peer, e
            ));
            return;
        }
    };

    debug!(peer = %peer, "Relaying connection");

    tokio::select! {
        _ = closed.cancelled() => {
            debug!(peer = %peer, "Stream session closed, dropping connection");
        }
        res = tokio::io::copy_bidirectional(&mut socket, &mut channel) => match res {
            Ok((to_relay, to_client)) => {
                debug!(
                    peer = %peer,
                    bytes_to_relay = to_relay,
                    bytes_to_client = to_client,
                    "Connection finished"
                );
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Connection failed");
                output.complain(format_args!("error copying data for {}: {}", peer, e));
            }
        },
    }
}
