use std::sync::Arc;

use codap_channel::CodapRequest;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::catalog::CatalogRecord;
use crate::dataset::DatasetHandle;
use crate::error::PluginError;
use crate::presentation::PresentationGuarantor;
use crate::session::SessionManager;

/// One row for the child collection, grouped under `parent_key_value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub parent_key_value: u64,
    pub fields: Map<String, Value>,
}

impl Item {
    /// Picks the child collection's attributes off the record; missing ones are null.
    pub fn from_record(index: u64, record: &CatalogRecord, dataset: &DatasetHandle) -> Self {
        let fields = dataset
            .template
            .child()
            .map(|c| {
                c.attributes
                    .iter()
                    .map(|a| (a.name.clone(), record.field(&a.name).unwrap_or(Value::Null)))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            parent_key_value: index,
            fields,
        }
    }

    /// Flat case values as the host expects them, parent key included.
    pub fn into_case(self, parent_key: &str) -> Value {
        let mut case = Map::with_capacity(self.fields.len() + 1);
        case.insert(parent_key.to_owned(), json!(self.parent_key_value));
        case.extend(self.fields);
        Value::Object(case)
    }
}

/// Turns a user-selected record into one dataset item.
///
/// The sample index is advanced before the item is sent, and is not given
/// back if the send fails: indices may have gaps but are never reused.
#[derive(Debug)]
pub struct RecordForwarder {
    session: Arc<SessionManager>,
    dataset: DatasetHandle,
    presentation: PresentationGuarantor,
}

impl RecordForwarder {
    pub fn new(session: Arc<SessionManager>, dataset: DatasetHandle) -> Self {
        let presentation = PresentationGuarantor::new(Arc::clone(&session));
        Self {
            session,
            dataset,
            presentation,
        }
    }

    pub fn dataset(&self) -> &DatasetHandle {
        &self.dataset
    }

    pub async fn forward(&self, record: &CatalogRecord) -> Result<(), PluginError> {
        self.session.require_active()?;
        let parent_key = self.dataset.template.parent_key().ok_or_else(|| {
            PluginError::InvalidState(format!(
                "dataset '{}' template has no parent key",
                self.dataset.name
            ))
        })?;

        let index = self.session.next_sample_index()?;
        let case = Item::from_record(index, record, &self.dataset).into_case(parent_key);
        debug!(index, title = %record.title, "forwarding record");

        let resource = self.dataset.item_resource();
        let rsp = self
            .session
            .channel()
            .send_request(CodapRequest::create(&resource, Value::Array(vec![case])))
            .await?;
        if !rsp.success {
            return Err(PluginError::rejected(resource, rsp.error_message()));
        }
        info!(index, title = %record.title, "record forwarded");

        if let Err(err) = self.presentation.ensure_table(&self.dataset.name).await {
            warn!("record forwarded but case table could not be checked: {err}");
        }
        Ok(())
    }
}
