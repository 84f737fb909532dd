use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

/// Key under which the sample index is persisted by the host.
pub const SAMPLE_NUMBER_KEY: &str = "sampleNumber";

/// The blob the host saves with the document and hands back on reload.
///
/// Opaque apart from `sampleNumber`; every other key is carried through
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractiveState(Map<String, Value>);

impl InteractiveState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds state from whatever the host stored. Missing or non-object
    /// blobs give an empty state.
    pub fn from_saved(saved: Option<Value>) -> Self {
        match saved {
            None | Some(Value::Null) => Self::default(),
            Some(Value::Object(map)) => Self(map),
            Some(other) => {
                warn!("ignoring saved interactive state that is not an object: {other}");
                Self::default()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Current sample number, 0 when unset or negative.
    ///
    /// Floats written by a JavaScript host are rounded up, so a fractional
    /// value never lands below an index already handed out. Values past
    /// `u64::MAX` saturate, which leaves nothing left to hand out.
    pub fn sample_number(&self) -> u64 {
        match self.0.get(SAMPLE_NUMBER_KEY) {
            Some(Value::Number(n)) => match (n.as_u64(), n.as_f64()) {
                (Some(n), _) => n,
                (None, Some(f)) if f.is_finite() && f > 0.0 => {
                    if f >= u64::MAX as f64 {
                        u64::MAX
                    } else {
                        f.ceil() as u64
                    }
                }
                _ => 0,
            },
            _ => 0,
        }
    }

    pub fn set_sample_number(&mut self, n: u64) {
        self.0.insert(SAMPLE_NUMBER_KEY.to_string(), json!(n));
    }

    /// Returns the current sample number and stores its successor, or `None`
    /// once the index space is used up. The state is left untouched then.
    pub fn advance_sample_number(&mut self) -> Option<u64> {
        let current = self.sample_number();
        let next = current.checked_add(1)?;
        self.set_sample_number(next);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_zero() {
        let mut state = InteractiveState::new();
        assert_eq!(state.sample_number(), 0);
        assert_eq!(state.advance_sample_number(), Some(0));
        assert_eq!(state.sample_number(), 1);
    }

    #[test]
    fn keeps_foreign_keys() {
        let saved = json!({"sampleNumber": 7, "theme": "dark"});
        let mut state = InteractiveState::from_saved(Some(saved));
        assert_eq!(state.advance_sample_number(), Some(7));
        assert_eq!(state.to_json(), json!({"sampleNumber": 8, "theme": "dark"}));
    }

    #[test]
    fn accepts_integral_floats() {
        let state = InteractiveState::from_saved(Some(json!({"sampleNumber": 7.0})));
        assert_eq!(state.sample_number(), 7);
        let state = InteractiveState::from_saved(Some(json!({"sampleNumber": -2})));
        assert_eq!(state.sample_number(), 0);
    }

    #[test]
    fn fractional_values_round_up() {
        let mut state = InteractiveState::from_saved(Some(json!({"sampleNumber": 7.5})));
        assert_eq!(state.sample_number(), 8);
        assert_eq!(state.advance_sample_number(), Some(8));
        assert_eq!(state.sample_number(), 9);
    }

    #[test]
    fn oversized_values_exhaust_the_index() {
        let mut state = InteractiveState::from_saved(Some(json!({"sampleNumber": 1e20})));
        assert_eq!(state.sample_number(), u64::MAX);
        assert_eq!(state.advance_sample_number(), None);
        assert_eq!(state.sample_number(), u64::MAX);

        let mut state = InteractiveState::from_saved(Some(json!({"sampleNumber": u64::MAX})));
        assert_eq!(state.advance_sample_number(), None);
    }

    #[test]
    fn non_object_blob_is_empty() {
        let garbage = InteractiveState::from_saved(Some(json!("garbage")));
        assert_eq!(garbage, InteractiveState::new());
        let null = InteractiveState::from_saved(Some(Value::Null));
        assert_eq!(null, InteractiveState::new());
    }
}
