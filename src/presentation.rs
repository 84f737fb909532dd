use std::sync::Arc;

use codap_channel::{CodapRequest, ResourcePath};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::session::SessionManager;

pub const CASE_TABLE: &str = "caseTable";

/// Keeps a case table on screen so forwarded items are visible.
///
/// Assumes one table per document: any existing `caseTable` counts, whichever
/// dataset it shows. That only holds while this plugin manages a single
/// dataset.
#[derive(Debug)]
pub struct PresentationGuarantor {
    session: Arc<SessionManager>,
    guard: Mutex<()>,
}

impl PresentationGuarantor {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            guard: Mutex::new(()),
        }
    }

    /// A failed component listing is returned as an error. A failed table
    /// creation is logged and swallowed.
    pub async fn ensure_table(&self, dataset_name: &str) -> Result<(), PluginError> {
        self.session.require_active()?;
        let _serial = self.guard.lock().await;
        let channel = self.session.channel();

        let listing = channel
            .send_request(CodapRequest::get(ResourcePath::ComponentList))
            .await?;
        if !listing.success {
            return Err(PluginError::rejected(
                ResourcePath::ComponentList,
                listing.error_message(),
            ));
        }
        if has_case_table(listing.values.as_ref()) {
            debug!("case table already present");
            return Ok(());
        }

        let table = json!({"type": CASE_TABLE, "dataContext": dataset_name});
        match channel.send_request(CodapRequest::create(ResourcePath::Component, table)).await {
            Ok(rsp) if rsp.success => info!(dataset = dataset_name, "case table created"),
            Ok(rsp) => warn!(
                dataset = dataset_name,
                error = ?rsp.error_message(),
                "host refused to create case table"
            ),
            Err(err) => warn!(dataset = dataset_name, "could not create case table: {err}"),
        }
        Ok(())
    }
}

fn has_case_table(components: Option<&Value>) -> bool {
    let is_table = |c: &Value| c.get("type").and_then(Value::as_str) == Some(CASE_TABLE);
    components
        .and_then(Value::as_array)
        .is_some_and(|list| list.iter().any(is_table))
}
