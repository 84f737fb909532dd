use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

// -----------------------------------------------------------------------------
// Host message protocol
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Action {
    Get,
    Create,
    Update,
    Delete,
    Notify,
}

/// One request in the data interactive API, e.g.
/// `{"action": "get", "resource": "dataContext[Movies]"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodapRequest {
    pub action: Action,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
}

impl CodapRequest {
    pub fn new(action: Action, resource: impl Into<String>, values: Option<Value>) -> Self {
        Self {
            action,
            resource: resource.into(),
            values,
        }
    }

    pub fn get(resource: impl fmt::Display) -> Self {
        Self::new(Action::Get, resource.to_string(), None)
    }

    pub fn create(resource: impl fmt::Display, values: Value) -> Self {
        Self::new(Action::Create, resource.to_string(), Some(values))
    }

    pub fn update(resource: impl fmt::Display, values: Value) -> Self {
        Self::new(Action::Update, resource.to_string(), Some(values))
    }

    pub fn resource_path(&self) -> ResourcePath {
        let Ok(path) = self.resource.parse::<ResourcePath>();
        path
    }
}

/// The host's reply. `success: false` is a well-formed negative answer,
/// not a transport failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodapResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CodapResponse {
    pub fn ok(values: Option<Value>) -> Self {
        Self {
            success: true,
            values,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            values: None,
            error: Some(error.into()),
        }
    }

    /// Rejection reason, read from `error` or from `values.error`.
    pub fn error_message(&self) -> Option<String> {
        if let Some(err) = &self.error {
            return Some(err.clone());
        }
        self.values
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }
}

// -----------------------------------------------------------------------------
// Resource addressing
// -----------------------------------------------------------------------------

/// Typed view of a resource string such as `dataContext[Movies].item`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourcePath {
    InteractiveFrame,
    InteractiveState,
    /// `dataContext`, the target of a create.
    DataContextRoot,
    DataContext(String),
    DataContextItem(String),
    ComponentList,
    Component,
    Other(String),
}

impl ResourcePath {
    pub fn data_context(name: impl Into<String>) -> Self {
        ResourcePath::DataContext(name.into())
    }

    pub fn items(name: impl Into<String>) -> Self {
        ResourcePath::DataContextItem(name.into())
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePath::InteractiveFrame => f.write_str("interactiveFrame"),
            ResourcePath::InteractiveState => f.write_str("interactiveState"),
            ResourcePath::DataContextRoot => f.write_str("dataContext"),
            ResourcePath::DataContext(name) => write!(f, "dataContext[{name}]"),
            ResourcePath::DataContextItem(name) => write!(f, "dataContext[{name}].item"),
            ResourcePath::ComponentList => f.write_str("componentList"),
            ResourcePath::Component => f.write_str("component"),
            ResourcePath::Other(raw) => f.write_str(raw),
        }
    }
}

impl FromStr for ResourcePath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = match s {
            "interactiveFrame" => ResourcePath::InteractiveFrame,
            "interactiveState" => ResourcePath::InteractiveState,
            "dataContext" => ResourcePath::DataContextRoot,
            "componentList" => ResourcePath::ComponentList,
            "component" => ResourcePath::Component,
            other => parse_data_context(other)
                .unwrap_or_else(|| ResourcePath::Other(other.to_owned())),
        };
        Ok(path)
    }
}

fn parse_data_context(s: &str) -> Option<ResourcePath> {
    let rest = s.strip_prefix("dataContext[")?;
    // names may not contain ']' so the first one closes the selector
    let close = rest.find(']')?;
    let name = &rest[..close];
    if name.is_empty() {
        return None;
    }
    match &rest[close + 1..] {
        "" => Some(ResourcePath::DataContext(name.to_owned())),
        ".item" => Some(ResourcePath::DataContextItem(name.to_owned())),
        _ => None,
    }
}

// -----------------------------------------------------------------------------
// Handshake manifest
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Sent as the `values` of `update interactiveFrame` during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveFrame {
    pub name: String,
    pub title: String,
    pub dimensions: Dimensions,
    pub version: String,
}

// -----------------------------------------------------------------------------
// Connection lifecycle
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Handshaking,
    Active,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resource_paths_render_bracketed_names() {
        assert_eq!(ResourcePath::data_context("Movies").to_string(), "dataContext[Movies]");
        assert_eq!(ResourcePath::items("Movies").to_string(), "dataContext[Movies].item");
        assert_eq!(ResourcePath::ComponentList.to_string(), "componentList");
    }

    #[test]
    fn resource_paths_parse() {
        let p: ResourcePath = "dataContext[My Movies].item".parse().unwrap();
        assert_eq!(p, ResourcePath::DataContextItem("My Movies".into()));
        let p: ResourcePath = "dataContext[Movies]".parse().unwrap();
        assert_eq!(p, ResourcePath::DataContext("Movies".into()));
        let p: ResourcePath = "dataContext[].item".parse().unwrap();
        assert_eq!(p, ResourcePath::Other("dataContext[].item".into()));
        let p: ResourcePath = "dataContext[Movies].collection[movies]".parse().unwrap();
        assert!(matches!(p, ResourcePath::Other(_)));
    }

    #[test]
    fn request_omits_missing_values() {
        let req = CodapRequest::get(ResourcePath::ComponentList);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"action": "get", "resource": "componentList"})
        );
    }

    #[test]
    fn error_message_reads_nested_values() {
        let raw = json!({"success": false, "values": {"error": "no such context"}});
        let rsp: CodapResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(rsp.error_message().as_deref(), Some("no such context"));
        assert_eq!(CodapResponse::rejected("nope").error_message().as_deref(), Some("nope"));
        assert_eq!(CodapResponse::ok(None).error_message(), None);
    }

    #[test]
    fn manifest_shape() {
        let frame = InteractiveFrame {
            name: "Movies".into(),
            title: "Movie Finder".into(),
            dimensions: Dimensions {
                width: 400,
                height: 600,
            },
            version: "0.1".into(),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "name": "Movies",
                "title": "Movie Finder",
                "dimensions": {"width": 400, "height": 600},
                "version": "0.1"
            })
        );
    }
}
