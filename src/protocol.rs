use crate::error::Result;
use crate::types::DeviceAddress;
use serde_json::{json, Map, Value};

/// Request sent to the controller over the WebSocket
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Ask for the state of every device
    All,
    /// Change the state of one device
    Set { address: DeviceAddress, value: Value },
}

impl Request {
    /// Create a set request for a device
    pub fn set(address: DeviceAddress, value: impl Into<Value>) -> Self {
        Request::Set {
            address,
            value: value.into(),
        }
    }

    /// Wire representation of the request
    ///
    /// Structured set values (e.g. `{"pwm_duty": "50"}`) are flattened into
    /// the command; scalars travel in the `value` field.
    pub fn to_json(&self) -> Value {
        match self {
            Request::All => json!({ "cmd": "all" }),
            Request::Set { address, value } => {
                let mut cmd = Map::new();
                cmd.insert("cmd".to_string(), json!("set"));
                cmd.insert("dev".to_string(), json!(address.device_type));
                cmd.insert("circuit".to_string(), json!(address.circuit));
                match value {
                    Value::Object(fields) => {
                        for (key, field) in fields {
                            cmd.entry(key.clone()).or_insert_with(|| field.clone());
                        }
                    }
                    other => {
                        cmd.insert("value".to_string(), other.clone());
                    }
                }
                Value::Object(cmd)
            }
        }
    }

    /// Serialize the request into a text frame
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_json())?)
    }
}

/// One state change extracted from a controller message
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub address: DeviceAddress,
    pub payload: Value,
}

/// Parse a text frame into a message
///
/// Blank frames are the empty sentinel and yield `None`.
pub fn parse_frame(text: &str) -> Result<Option<Value>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(text)?))
}

/// Whether a received message is the "nothing received" sentinel
///
/// Any falsy JSON value counts: null, `false`, zero, and empty strings,
/// arrays or objects.
pub fn is_empty_message(message: &Value) -> bool {
    match message {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Normalize a message into its individual records
///
/// The controller sends either one record or a batch of them.
pub fn split_records(message: Value) -> Vec<Value> {
    match message {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Extract an update from one record
///
/// Records without a device-type or circuit are protocol noise and yield
/// `None`. The whole record is kept as the payload.
pub fn parse_update(record: Value) -> Option<Update> {
    let address = DeviceAddress::from_record(record.as_object()?)?;
    Some(Update {
        address,
        payload: record,
    })
}

/// Normalize a message straight into its updates, dropping noise
pub fn updates(message: Value) -> impl Iterator<Item = Update> {
    split_records(message).into_iter().filter_map(parse_update)
}

/// Normalize a message into addressed device records, dropping noise
pub fn device_records(message: Value) -> Vec<(DeviceAddress, Map<String, Value>)> {
    split_records(message)
        .into_iter()
        .filter_map(|record| match record {
            Value::Object(fields) => {
                DeviceAddress::from_record(&fields).map(|address| (address, fields))
            }
            _ => None,
        })
        .collect()
}
