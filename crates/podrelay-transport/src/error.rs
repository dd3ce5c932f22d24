use http::StatusCode;
use kube::client::UpgradeConnectionError;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors establishing or using the tunnelled stream
#[derive(Debug, Error)]
pub enum DialError {
    #[error(
        "control plane refused the upgrade ({}): {message}",
        .status.map(|s| s.to_string()).unwrap_or_else(|| "no status".to_string())
    )]
    Upgrade {
        status: Option<u16>,
        message: String,
    },

    #[error("transport error during upgrade: {0}")]
    Transport(String),

    #[error("failed to bind local address {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("relay workload is gone: {0}")]
    Gone(String),

    #[error("stream session closed")]
    Closed,
}

/// Refused upgrades arrive as a non-101 handshake status; a 404 means the
/// relay pod no longer exists.
impl From<kube::Error> for DialError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::UpgradeConnection(UpgradeConnectionError::ProtocolSwitch(code)) => {
                let message = format!("handshake answered {}", code);
                if code == StatusCode::NOT_FOUND {
                    DialError::Gone(message)
                } else {
                    DialError::Upgrade {
                        status: Some(code.as_u16()),
                        message,
                    }
                }
            }
            kube::Error::UpgradeConnection(e) => DialError::Upgrade {
                status: None,
                message: e.to_string(),
            },
            kube::Error::Api(resp) if resp.code == 404 => DialError::Gone(resp.message),
            kube::Error::Api(resp) => DialError::Upgrade {
                status: Some(resp.code),
                message: resp.message,
            },
            other => DialError::Transport(other.to_string()),
        }
    }
}
