use std::sync::Arc;

use codap_channel::{CodapRequest, ResourcePath};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::PluginError;
use crate::session::SessionManager;

pub const DEFAULT_DATASET_NAME: &str = "Movies";
pub const SET_COLLECTION: &str = "movie_sets";
pub const ITEM_COLLECTION: &str = "movies";
pub const SET_INDEX_ATTRIBUTE: &str = "movie_set_index";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttributeKind {
    Categorical,
    Nominal,
    Numeric,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttributeKind,
    /// Only meaningful for numeric attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
}

impl AttributeSpec {
    pub fn new(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            precision: None,
        }
    }

    pub fn numeric(name: &str, precision: u8) -> Self {
        Self {
            name: name.to_owned(),
            kind: AttributeKind::Numeric,
            precision: Some(precision),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    /// `None` for the top-level collection.
    #[serde(rename = "parent", default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(rename = "attrs")]
    pub attributes: Vec<AttributeSpec>,
}

/// Template for the two-tier dataset the plugin appends to. Serializes to the
/// `values` of a `create dataContext` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub name: String,
    pub collections: Vec<CollectionSpec>,
}

impl DatasetDescriptor {
    /// Movie sets keyed by sample index, each holding the forwarded movies.
    pub fn movies() -> Self {
        Self {
            name: DEFAULT_DATASET_NAME.to_owned(),
            collections: vec![
                CollectionSpec {
                    name: SET_COLLECTION.to_owned(),
                    parent_name: None,
                    attributes: vec![AttributeSpec::new(
                        SET_INDEX_ATTRIBUTE,
                        AttributeKind::Categorical,
                    )],
                },
                CollectionSpec {
                    name: ITEM_COLLECTION.to_owned(),
                    parent_name: Some(SET_COLLECTION.to_owned()),
                    attributes: vec![
                        AttributeSpec::new("title", AttributeKind::Nominal),
                        AttributeSpec::numeric("popularity", 2),
                    ],
                },
            ],
        }
    }

    /// Copy of the template under another name.
    pub fn with_name(&self, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            collections: self.collections.clone(),
        }
    }

    pub fn parent(&self) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.parent_name.is_none())
    }

    /// Innermost collection: the one no other collection names as its parent.
    pub fn child(&self) -> Option<&CollectionSpec> {
        let is_parent = |c: &CollectionSpec| {
            self.collections
                .iter()
                .any(|o| o.parent_name.as_deref() == Some(c.name.as_str()))
        };
        self.collections.iter().rev().find(|c| !is_parent(*c))
    }

    /// First attribute of the parent collection: the key items are grouped by.
    pub fn parent_key(&self) -> Option<&str> {
        self.parent()?.attributes.first().map(|a| a.name.as_str())
    }
}

/// Reference to a dataset known to exist in the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    pub name: String,
    pub template: Arc<DatasetDescriptor>,
    /// Whether this call created it, as opposed to finding it.
    pub created: bool,
}

impl DatasetHandle {
    pub fn new(name: impl Into<String>, template: Arc<DatasetDescriptor>) -> Self {
        Self {
            name: name.into(),
            template,
            created: false,
        }
    }

    pub fn resource(&self) -> ResourcePath {
        ResourcePath::data_context(&self.name)
    }

    pub fn item_resource(&self) -> ResourcePath {
        ResourcePath::items(&self.name)
    }
}

/// Makes sure the named dataset exists, creating it from the template on
/// first use.
///
/// Check-then-create is serialized per provisioner, so concurrent callers in
/// this plugin never both see "absent". Two plugins provisioning the same
/// document can still race; the loser gets `HostRejected` from the create.
#[derive(Debug)]
pub struct SchemaProvisioner {
    session: Arc<SessionManager>,
    guard: Mutex<()>,
}

impl SchemaProvisioner {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            guard: Mutex::new(()),
        }
    }

    /// An existing dataset is reused as-is, even when its schema differs from
    /// the template. Only a well-formed "not found" triggers a create; a
    /// transport failure on the lookup is returned without creating.
    pub async fn ensure_dataset(
        &self,
        name: &str,
        template: &DatasetDescriptor,
    ) -> Result<DatasetHandle, PluginError> {
        self.session.require_active()?;
        let _serial = self.guard.lock().await;
        let channel = self.session.channel();
        let template = Arc::new(template.with_name(name));

        let lookup = channel
            .send_request(CodapRequest::get(ResourcePath::data_context(name)))
            .await?;
        if lookup.success {
            debug!(dataset = name, "dataset already present");
            return Ok(DatasetHandle::new(name, template));
        }

        let values = serde_json::to_value(template.as_ref()).map_err(|e| {
            PluginError::InvalidState(format!("could not encode dataset template: {e}"))
        })?;
        let rsp = channel
            .send_request(CodapRequest::create(ResourcePath::DataContextRoot, values))
            .await?;
        if !rsp.success {
            return Err(PluginError::rejected(ResourcePath::DataContextRoot, rsp.error_message()));
        }
        let id = rsp.values.as_ref().and_then(|v| v.get("id")).cloned();
        info!(dataset = name, ?id, "dataset created");
        Ok(DatasetHandle {
            created: true,
            ..DatasetHandle::new(name, template)
        })
    }
}
