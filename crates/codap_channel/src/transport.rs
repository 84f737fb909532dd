use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{CodapRequest, CodapResponse};

/// Failures below the host protocol: the request never got a well-formed answer.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel to the host is gone; in-flight requests are failed with this.
    #[error("host channel closed")]
    Closed,

    #[error("I/O error on host channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed host message: {0}")]
    Json(#[from] serde_json::Error),

    /// The host answered the envelope itself with an error.
    #[error("host reported error {code}: {message}")]
    Remote { code: i64, message: String },
}

/// Receives requests the host initiates, such as asking the plugin for its
/// interactive state before saving the document.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn on_request(&self, request: CodapRequest) -> CodapResponse;

    /// The host tore the connection down.
    async fn on_disconnect(&self) {}
}

/// The raw cross-context messaging primitive.
///
/// `send` suspends until the host replies or the channel fails. Requests sent
/// one after another by the same caller reach the host in that order.
/// Implementations never retry.
#[async_trait]
pub trait HostTransport: Send + Sync {
    async fn send(&self, request: CodapRequest) -> Result<CodapResponse, ChannelError>;

    /// Replaces any previously registered handler.
    fn set_notification_handler(&self, handler: Arc<dyn NotificationHandler>);
}
