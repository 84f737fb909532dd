//! In-memory stand-in for the CODAP host document.
//!
//! Answers the subset of the data interactive API the plugin uses, records
//! every request it receives, and lets tests inject rejections or transport
//! failures per `(action, resource)`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::message::{Action, CodapRequest, CodapResponse, ResourcePath};
use crate::transport::{ChannelError, HostTransport, NotificationHandler};

#[derive(Debug, Clone)]
pub enum Fault {
    /// Reply `{success: false, error}`.
    Reject(String),
    /// Fail below the protocol, as if the channel broke.
    Transport,
}

#[derive(Debug, Default, Clone)]
struct Document {
    frame: Option<Value>,
    saved_state: Option<Value>,
    data_contexts: BTreeMap<String, Value>,
    items: HashMap<String, Vec<Value>>,
    components: Vec<Value>,
    next_id: u64,
}

impl Document {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
struct Inner {
    doc: Mutex<Document>,
    log: Mutex<Vec<CodapRequest>>,
    faults: Mutex<HashMap<(Action, String), Fault>>,
    handler: Mutex<Option<Arc<dyn NotificationHandler>>>,
    closed: Mutex<bool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Default)]
pub struct MockHost {
    inner: Arc<Inner>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A document that was saved with this interactive state.
    pub fn with_saved_state(self, state: Value) -> Self {
        lock(&self.inner.doc).saved_state = Some(state);
        self
    }

    pub fn with_data_context(self, name: &str, context: Value) -> Self {
        lock(&self.inner.doc).data_contexts.insert(name.to_owned(), context);
        self
    }

    pub fn with_component(self, component: Value) -> Self {
        {
            let mut doc = lock(&self.inner.doc);
            let id = doc.next_id();
            let mut component = component;
            if let Some(obj) = component.as_object_mut() {
                obj.entry("id").or_insert(json!(id));
            }
            doc.components.push(component);
        }
        self
    }

    pub fn reject(&self, action: Action, resource: impl ToString, message: &str) {
        let fault = Fault::Reject(message.to_owned());
        lock(&self.inner.faults).insert((action, resource.to_string()), fault);
    }

    pub fn fail(&self, action: Action, resource: impl ToString) {
        lock(&self.inner.faults).insert((action, resource.to_string()), Fault::Transport);
    }

    pub fn clear_faults(&self) {
        lock(&self.inner.faults).clear();
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<CodapRequest> {
        lock(&self.inner.log).clone()
    }

    pub fn count(&self, action: Action, resource: impl ToString) -> usize {
        let resource = resource.to_string();
        lock(&self.inner.log)
            .iter()
            .filter(|r| r.action == action && r.resource == resource)
            .count()
    }

    pub fn data_context(&self, name: &str) -> Option<Value> {
        lock(&self.inner.doc).data_contexts.get(name).cloned()
    }

    pub fn items(&self, name: &str) -> Vec<Value> {
        lock(&self.inner.doc).items.get(name).cloned().unwrap_or_default()
    }

    pub fn components(&self) -> Vec<Value> {
        lock(&self.inner.doc).components.clone()
    }

    pub fn frame(&self) -> Option<Value> {
        lock(&self.inner.doc).frame.clone()
    }

    pub fn saved_state(&self) -> Option<Value> {
        lock(&self.inner.doc).saved_state.clone()
    }

    // -------------------------------------------------------------------------
    // Host-initiated traffic
    // -------------------------------------------------------------------------

    fn handler(&self) -> Option<Arc<dyn NotificationHandler>> {
        lock(&self.inner.handler).clone()
    }

    /// Ask the plugin for its interactive state and store it, as the host does
    /// when the document is saved.
    pub async fn save_document(&self) -> Option<CodapResponse> {
        let handler = self.handler()?;
        let rsp = handler.on_request(CodapRequest::get(ResourcePath::InteractiveState)).await;
        if rsp.success {
            lock(&self.inner.doc).saved_state = rsp.values.clone();
        }
        Some(rsp)
    }

    /// Push a state blob into the plugin.
    pub async fn push_state(&self, state: Value) -> Option<CodapResponse> {
        let handler = self.handler()?;
        Some(handler.on_request(CodapRequest::update(ResourcePath::InteractiveState, state)).await)
    }

    pub async fn disconnect(&self) {
        *lock(&self.inner.closed) = true;
        if let Some(handler) = self.handler() {
            handler.on_disconnect().await;
        }
    }

    /// The same document opened again: contents and saved state survive,
    /// the request log and plugin connection do not.
    pub fn reopen(&self) -> MockHost {
        let doc = lock(&self.inner.doc).clone();
        let host = MockHost::new();
        *lock(&host.inner.doc) = doc;
        host
    }

    // -------------------------------------------------------------------------
    // Request handling
    // -------------------------------------------------------------------------

    fn answer(&self, req: &CodapRequest) -> CodapResponse {
        let mut doc = lock(&self.inner.doc);
        match (req.action, req.resource_path()) {
            (Action::Update, ResourcePath::InteractiveFrame) => {
                doc.frame = req.values.clone();
                CodapResponse::ok(None)
            }
            (Action::Get, ResourcePath::InteractiveFrame) => {
                let mut frame = doc.frame.clone().unwrap_or_else(|| json!({}));
                if let (Some(obj), Some(state)) = (frame.as_object_mut(), doc.saved_state.clone()) {
                    obj.insert("savedState".into(), state);
                }
                CodapResponse::ok(Some(frame))
            }
            (Action::Get, ResourcePath::DataContext(name)) => match doc.data_contexts.get(&name) {
                Some(ctx) => CodapResponse::ok(Some(ctx.clone())),
                None => CodapResponse::rejected(format!("no data context named '{name}'")),
            },
            (Action::Create, ResourcePath::DataContextRoot) => {
                let Some(values) = req.values.clone() else {
                    return CodapResponse::rejected("missing values");
                };
                let Some(name) = values.get("name").and_then(Value::as_str).map(str::to_owned)
                else {
                    return CodapResponse::rejected("data context needs a name");
                };
                if doc.data_contexts.contains_key(&name) {
                    return CodapResponse::rejected(format!("data context '{name}' already exists"));
                }
                let id = doc.next_id();
                doc.data_contexts.insert(name.clone(), values);
                CodapResponse::ok(Some(json!({"id": id, "name": name})))
            }
            (Action::Create, ResourcePath::DataContextItem(name)) => {
                if !doc.data_contexts.contains_key(&name) {
                    return CodapResponse::rejected(format!("no data context named '{name}'"));
                }
                let new_items = match req.values.clone() {
                    Some(Value::Array(items)) => items,
                    Some(item @ Value::Object(_)) => vec![item],
                    _ => return CodapResponse::rejected("items must be an object or array"),
                };
                let mut ids = Vec::with_capacity(new_items.len());
                for _ in &new_items {
                    ids.push(doc.next_id());
                }
                doc.items.entry(name).or_default().extend(new_items);
                CodapResponse::ok(Some(json!({"itemIDs": ids})))
            }
            (Action::Get, ResourcePath::ComponentList) => {
                let list: Vec<Value> = doc
                    .components
                    .iter()
                    .map(|c| {
                        json!({"id": c.get("id"), "name": c.get("name"), "type": c.get("type")})
                    })
                    .collect();
                CodapResponse::ok(Some(Value::Array(list)))
            }
            (Action::Create, ResourcePath::Component) => {
                let Some(mut component) = req.values.clone().filter(Value::is_object) else {
                    return CodapResponse::rejected("component needs values");
                };
                let id = doc.next_id();
                if let Some(obj) = component.as_object_mut() {
                    obj.insert("id".into(), json!(id));
                }
                let kind = component.get("type").cloned();
                doc.components.push(component);
                CodapResponse::ok(Some(json!({"id": id, "type": kind})))
            }
            _ => CodapResponse::rejected(format!(
                "unsupported request {} {}",
                req.action, req.resource
            )),
        }
    }
}

#[async_trait]
impl HostTransport for MockHost {
    async fn send(&self, request: CodapRequest) -> Result<CodapResponse, ChannelError> {
        if *lock(&self.inner.closed) {
            return Err(ChannelError::Closed);
        }
        lock(&self.inner.log).push(request.clone());

        let fault = lock(&self.inner.faults)
            .get(&(request.action, request.resource.clone()))
            .cloned();
        match fault {
            Some(Fault::Transport) => Err(ChannelError::Closed),
            Some(Fault::Reject(message)) => Ok(CodapResponse::rejected(message)),
            None => Ok(self.answer(&request)),
        }
    }

    fn set_notification_handler(&self, handler: Arc<dyn NotificationHandler>) {
        *lock(&self.inner.handler) = Some(handler);
    }
}
