use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use codap_channel::{
    Action, CodapRequest, CodapResponse, ConnectionState, HostChannel, HostTransport,
    InteractiveFrame, NotificationHandler, ResourcePath,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::PluginError;
use crate::state::InteractiveState;

/// Owns the connection lifecycle and the interactive state the host persists.
///
/// ```text
/// Uninitialized --init()--> Handshaking --host ack--> Active --teardown--> Closed
///                                |
///                                +--failure--> Failed
/// ```
///
/// Passed around as `Arc<SessionManager>`; nothing about a session is global,
/// so several can live side by side (one per host document, one per test).
pub struct SessionManager {
    channel: HostChannel,
    state_tx: watch::Sender<ConnectionState>,
    interactive: Mutex<InteractiveState>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.connection_state())
            .finish()
    }
}

impl SessionManager {
    /// Creates the session and registers it for host-initiated requests.
    pub fn new(transport: Arc<dyn HostTransport>) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Uninitialized);
        let session = Arc::new(Self {
            channel: HostChannel::new(transport, state_rx),
            state_tx,
            interactive: Mutex::new(InteractiveState::new()),
        });
        session.channel.on_notification(Arc::new(SessionNotifications {
            session: Arc::downgrade(&session),
        }));
        session
    }

    pub fn channel(&self) -> &HostChannel {
        &self.channel
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Fails fast with `NotConnected` unless the session is Active.
    pub fn require_active(&self) -> Result<(), PluginError> {
        match self.connection_state() {
            ConnectionState::Active => Ok(()),
            state => Err(PluginError::NotConnected { state }),
        }
    }

    fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        self.state_tx.send_if_modified(|current| {
            if from.contains(current) {
                debug!(from = %current, %to, "session transition");
                *current = to;
                true
            } else {
                false
            }
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, InteractiveState> {
        self.interactive.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -------------------------------------------------------------------------
    // Handshake
    // -------------------------------------------------------------------------

    /// Announces the plugin to the host and restores the saved interactive
    /// state. Resolves once Active; a failure leaves the session Failed.
    pub async fn init(&self, manifest: &InteractiveFrame) -> Result<(), PluginError> {
        if !self.transition(&[ConnectionState::Uninitialized], ConnectionState::Handshaking) {
            return Err(PluginError::InvalidState(format!(
                "init called while session is {}",
                self.connection_state()
            )));
        }
        info!(plugin = %manifest.name, version = %manifest.version, "connecting to host");

        match self.handshake(manifest).await {
            Ok(saved) => {
                self.restore(saved);
                if self.transition(&[ConnectionState::Handshaking], ConnectionState::Active) {
                    info!(sample_number = self.lock_state().sample_number(), "session active");
                    Ok(())
                } else {
                    Err(PluginError::HandshakeFailed(format!(
                        "host went away during handshake (session is {})",
                        self.connection_state()
                    )))
                }
            }
            Err(reason) => {
                self.transition(&[ConnectionState::Handshaking], ConnectionState::Failed);
                error!("handshake failed: {reason}");
                Err(PluginError::HandshakeFailed(reason))
            }
        }
    }

    async fn handshake(&self, manifest: &InteractiveFrame) -> Result<InteractiveState, String> {
        let values = serde_json::to_value(manifest).map_err(|e| e.to_string())?;
        let rsp = self
            .channel
            .send_request(CodapRequest::update(ResourcePath::InteractiveFrame, values))
            .await
            .map_err(|e| e.to_string())?;
        if !rsp.success {
            return Err(rsp
                .error_message()
                .unwrap_or_else(|| "host refused the plugin".to_string()));
        }

        let rsp = self
            .channel
            .send_request(CodapRequest::get(ResourcePath::InteractiveFrame))
            .await
            .map_err(|e| e.to_string())?;
        if !rsp.success {
            debug!("host returned no frame state, starting fresh");
            return Ok(InteractiveState::new());
        }
        let saved = rsp.values.and_then(|mut frame| frame.get_mut("savedState").map(Value::take));
        Ok(InteractiveState::from_saved(saved))
    }

    // -------------------------------------------------------------------------
    // Interactive state
    // -------------------------------------------------------------------------

    pub fn interactive_state(&self) -> Result<InteractiveState, PluginError> {
        self.require_active()?;
        Ok(self.lock_state().clone())
    }

    /// Returns the current sample index and stores its successor. The read and
    /// the write happen under one lock, so concurrent callers never see the
    /// same index. Fails rather than wrapping once the index space is used up.
    pub fn next_sample_index(&self) -> Result<u64, PluginError> {
        self.require_active()?;
        let index = self
            .lock_state()
            .advance_sample_number()
            .ok_or(PluginError::SampleIndexExhausted)?;
        debug!(index, "sample index advanced");
        Ok(index)
    }

    /// Replaces the interactive state. The sample number never moves
    /// backwards: restoring an older blob keeps the higher value.
    pub fn restore(&self, mut saved: InteractiveState) {
        let mut state = self.lock_state();
        let current = state.sample_number();
        if saved.sample_number() < current {
            warn!(
                restored = saved.sample_number(),
                current, "restored state is behind the live sample number, keeping live value"
            );
            saved.set_sample_number(current);
        }
        *state = saved;
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    pub fn close(&self) {
        let open = [
            ConnectionState::Uninitialized,
            ConnectionState::Handshaking,
            ConnectionState::Active,
        ];
        if self.transition(&open, ConnectionState::Closed) {
            info!("session closed");
        }
    }

    /// Resolves once the session is Closed or Failed.
    pub async fn wait_closed(&self) -> ConnectionState {
        let mut rx = self.state_tx.subscribe();
        match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.connection_state(),
        }
    }

    fn handle_host_request(&self, request: CodapRequest) -> CodapResponse {
        match (request.action, request.resource_path()) {
            (Action::Get, ResourcePath::InteractiveState) => {
                let state = self.lock_state();
                debug!(sample_number = state.sample_number(), "host requested interactive state");
                CodapResponse::ok(Some(state.to_json()))
            }
            (Action::Update, ResourcePath::InteractiveState) => {
                self.restore(InteractiveState::from_saved(request.values));
                CodapResponse::ok(None)
            }
            (action, path) => {
                debug!(%action, resource = %path, "ignoring host notification");
                CodapResponse::ok(None)
            }
        }
    }

    fn handle_disconnect(&self) {
        if self.transition(&[ConnectionState::Handshaking], ConnectionState::Failed) {
            warn!("host disconnected during handshake");
        } else if self.transition(
            &[ConnectionState::Uninitialized, ConnectionState::Active],
            ConnectionState::Closed,
        ) {
            info!("host closed the session");
        }
    }
}

struct SessionNotifications {
    session: Weak<SessionManager>,
}

#[async_trait]
impl NotificationHandler for SessionNotifications {
    async fn on_request(&self, request: CodapRequest) -> CodapResponse {
        match self.session.upgrade() {
            Some(session) => session.handle_host_request(request),
            None => CodapResponse::rejected("plugin session is gone"),
        }
    }

    async fn on_disconnect(&self) {
        if let Some(session) = self.session.upgrade() {
            session.handle_disconnect();
        }
    }
}
