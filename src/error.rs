use codap_channel::{ChannelError, ConnectionState};
use thiserror::Error;

/// Failures surfaced by the plugin core.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A dataset or record operation was attempted outside the Active state.
    /// No host I/O was performed.
    #[error("not connected to host (session is {state})")]
    NotConnected { state: ConnectionState },

    /// Terminal; the session is Failed and will not retry.
    #[error("handshake with host failed: {0}")]
    HandshakeFailed(String),

    #[error("transport failure: {0}")]
    Transport(#[from] ChannelError),

    /// The host answered `success: false` to a request that had to succeed.
    #[error("host rejected request on {resource}: {message}")]
    HostRejected { resource: String, message: String },

    /// The persisted sample number is at `u64::MAX`; handing out another
    /// index would reuse one.
    #[error("sample index exhausted")]
    SampleIndexExhausted,

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl PluginError {
    pub fn rejected(resource: impl ToString, message: Option<String>) -> Self {
        PluginError::HostRejected {
            resource: resource.to_string(),
            message: message.unwrap_or_else(|| "no reason given".to_string()),
        }
    }
}
