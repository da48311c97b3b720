use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Prefix Evok puts in front of user-assigned aliases
const ALIAS_PREFIX: &str = "al_";

/// Identity of one configured controller (its display name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControllerId(String);

impl ControllerId {
    /// Create an id from a controller's display name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The display name behind the id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ControllerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Address of one I/O channel on a controller: (device-type, circuit)
///
/// Device-type is the Evok `dev` tag (`relay`, `di`, `ai`, `1wdevice`, ...);
/// circuit is unique within a device-type on one controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress {
    #[serde(rename = "dev")]
    pub device_type: String,
    pub circuit: String,
}

impl DeviceAddress {
    /// Create an address from a device-type tag and a circuit
    pub fn new(device_type: impl Into<String>, circuit: impl Into<String>) -> Self {
        Self {
            device_type: device_type.into(),
            circuit: circuit.into(),
        }
    }

    /// Extract the address from a raw Evok record
    ///
    /// Returns `None` when `dev` or `circuit` is missing. Circuits are sent as
    /// strings by current firmware and as numbers by some older releases.
    pub fn from_record(record: &Map<String, Value>) -> Option<Self> {
        let device_type = record.get("dev")?.as_str()?;
        let circuit = match record.get("circuit")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(Self::new(device_type, circuit))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_type, self.circuit)
    }
}

/// Last-known state of one device
///
/// An open-ended record of named fields. Always has a structured shape, even
/// when the controller only ever sent a bare scalar for the address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceState(Map<String, Value>);

impl DeviceState {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Record holding only a `value` field
    pub fn with_value(value: Value) -> Self {
        let mut fields = Map::new();
        fields.insert("value".to_string(), value);
        Self(fields)
    }

    /// Get one field of the record
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The primary `value` field
    pub fn value(&self) -> Option<&Value> {
        self.0.get("value")
    }

    /// The raw alias, as configured on the controller
    pub fn alias(&self) -> Option<&str> {
        self.0.get("alias").and_then(Value::as_str)
    }

    /// Alias with the Evok `al_` prefix removed
    pub fn display_name(&self) -> Option<&str> {
        self.alias()
            .map(|alias| alias.strip_prefix(ALIAS_PREFIX).unwrap_or(alias))
    }

    /// All fields of the record
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Set one field, returning the previous value
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Shallow merge: every incoming field overwrites the existing one
    pub fn merge_from(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Non-destructive merge: only fields not yet present are added
    pub fn fill_from(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    /// Consume the record into its field map
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for DeviceState {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn address_from_string_and_numeric_circuits() {
        let a = DeviceAddress::from_record(&record(json!({"dev": "relay", "circuit": "1_01"})));
        assert_eq!(a, Some(DeviceAddress::new("relay", "1_01")));

        let b = DeviceAddress::from_record(&record(json!({"dev": "input", "circuit": 3})));
        assert_eq!(b, Some(DeviceAddress::new("input", "3")));
    }

    #[test]
    fn address_requires_dev_and_circuit() {
        assert!(DeviceAddress::from_record(&record(json!({"circuit": "1"}))).is_none());
        assert!(DeviceAddress::from_record(&record(json!({"dev": "relay"}))).is_none());
        assert!(DeviceAddress::from_record(&record(json!({"dev": "relay", "circuit": null}))).is_none());
    }

    #[test]
    fn display_name_strips_alias_prefix() {
        let mut state = DeviceState::new();
        assert_eq!(state.display_name(), None);

        state.insert("alias", json!("al_kitchen"));
        assert_eq!(state.alias(), Some("al_kitchen"));
        assert_eq!(state.display_name(), Some("kitchen"));

        state.insert("alias", json!("hallway"));
        assert_eq!(state.display_name(), Some("hallway"));
    }

    #[test]
    fn fill_from_keeps_existing_fields() {
        let mut state = DeviceState::with_value(json!(1));
        state.fill_from(&record(json!({"value": 0, "alias": "al_door"})));

        assert_eq!(state.value(), Some(&json!(1)));
        assert_eq!(state.alias(), Some("al_door"));
    }
}
