use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::message::{CodapRequest, CodapResponse, ConnectionState};
use crate::transport::{ChannelError, HostTransport, NotificationHandler};

/// Handle the rest of the plugin uses to talk to the host.
///
/// Clones share the same transport. The connection state is owned by the
/// session; the channel only observes it.
#[derive(Clone)]
pub struct HostChannel {
    transport: Arc<dyn HostTransport>,
    state: watch::Receiver<ConnectionState>,
}

impl std::fmt::Debug for HostChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostChannel")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl HostChannel {
    pub fn new(transport: Arc<dyn HostTransport>, state: watch::Receiver<ConnectionState>) -> Self {
        Self { transport, state }
    }

    pub async fn send_request(&self, request: CodapRequest) -> Result<CodapResponse, ChannelError> {
        debug!(action = %request.action, resource = %request.resource, "host request");
        match self.transport.send(request).await {
            Ok(rsp) => {
                if !rsp.success {
                    debug!(error = ?rsp.error_message(), "host rejected request");
                }
                Ok(rsp)
            }
            Err(err) => {
                warn!("host request failed: {err}");
                Err(err)
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Registration point for host-initiated requests.
    pub fn on_notification(&self, handler: Arc<dyn NotificationHandler>) {
        self.transport.set_notification_handler(handler);
    }
}
