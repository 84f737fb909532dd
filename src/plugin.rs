use std::sync::Arc;

use codap_channel::{ConnectionState, HostTransport};
use tracing::info;

use crate::catalog::CatalogRecord;
use crate::config::PluginConfig;
use crate::dataset::{DatasetDescriptor, DatasetHandle, SchemaProvisioner};
use crate::error::PluginError;
use crate::forwarder::RecordForwarder;
use crate::session::SessionManager;

/// A connected plugin: handshake done, dataset provisioned, ready to forward.
#[derive(Debug)]
pub struct MoviePlugin {
    session: Arc<SessionManager>,
    forwarder: RecordForwarder,
}

impl MoviePlugin {
    /// Handshake, then make sure the dataset exists.
    pub async fn start(
        transport: Arc<dyn HostTransport>,
        config: &PluginConfig,
    ) -> Result<Self, PluginError> {
        Self::start_with_template(transport, config, &DatasetDescriptor::movies()).await
    }

    pub async fn start_with_template(
        transport: Arc<dyn HostTransport>,
        config: &PluginConfig,
        template: &DatasetDescriptor,
    ) -> Result<Self, PluginError> {
        let session = SessionManager::new(transport);
        session.init(&config.manifest()).await?;

        let provisioner = SchemaProvisioner::new(Arc::clone(&session));
        let dataset = provisioner.ensure_dataset(&config.dataset_name, template).await?;
        info!(
            dataset = %dataset.name,
            created = dataset.created,
            "plugin ready"
        );

        let forwarder = RecordForwarder::new(Arc::clone(&session), dataset);
        Ok(Self {
            session,
            forwarder,
        })
    }

    pub async fn add_record(&self, record: &CatalogRecord) -> Result<(), PluginError> {
        self.forwarder.forward(record).await
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn dataset(&self) -> &DatasetHandle {
        self.forwarder.dataset()
    }

    /// Stays attached, answering host state requests, until the host lets go.
    pub async fn run_until_closed(&self) -> ConnectionState {
        self.session.wait_closed().await
    }
}
