use crate::types::{DeviceAddress, DeviceState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Evok v2 reports digital inputs as `input`, v3 as `di`
pub const INPUT_DEVICE_TYPES: [&str; 2] = ["input", "di"];

/// How supplementary REST records are merged over the WebSocket snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplementMerge {
    /// Only add fields the snapshot did not provide
    #[default]
    FillMissing,
    /// Overlapping fields take the REST value
    Overwrite,
}

/// Last-known state of every device on one controller
///
/// Written by the session's supervisor task only; readable from anywhere.
/// Entries are never removed, so a disconnected controller keeps serving its
/// last values.
#[derive(Debug, Default)]
pub struct StateCache {
    entries: RwLock<BTreeMap<DeviceAddress, DeviceState>>,
}

impl StateCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<DeviceAddress, DeviceState>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<DeviceAddress, DeviceState>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the state of a device, if anything is known about it yet
    pub fn get(&self, address: &DeviceAddress) -> Option<DeviceState> {
        self.read().get(address).cloned()
    }

    /// Whether anything is known about a device
    pub fn contains(&self, address: &DeviceAddress) -> bool {
        self.read().contains_key(address)
    }

    /// Number of known devices
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All known addresses, in sorted order
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.read().keys().cloned().collect()
    }

    /// Copy of the whole cache
    pub fn snapshot(&self) -> BTreeMap<DeviceAddress, DeviceState> {
        self.read().clone()
    }

    /// All devices of one device-type
    pub fn devices_of_type(&self, device_type: &str) -> Vec<(DeviceAddress, DeviceState)> {
        self.read()
            .iter()
            .filter(|(address, _)| address.device_type == device_type)
            .map(|(address, state)| (address.clone(), state.clone()))
            .collect()
    }

    /// Which digital-input tag this controller uses
    ///
    /// Falls back to both tags while the cache has no inputs at all.
    pub fn input_device_types(&self) -> Vec<&'static str> {
        let entries = self.read();
        INPUT_DEVICE_TYPES
            .iter()
            .copied()
            .find(|tag| entries.keys().any(|address| address.device_type == *tag))
            .map_or_else(|| INPUT_DEVICE_TYPES.to_vec(), |tag| vec![tag])
    }

    /// Bulk overwrite from a snapshot
    ///
    /// Each record is shallow-merged into the existing one, so fields only a
    /// previous source knew about (an alias, say) survive. Returns the
    /// addresses that were written.
    pub fn replace_all<I>(&self, entries: I) -> Vec<DeviceAddress>
    where
        I: IntoIterator<Item = (DeviceAddress, Map<String, Value>)>,
    {
        let mut cache = self.write();
        entries
            .into_iter()
            .map(|(address, fields)| {
                cache.entry(address.clone()).or_default().merge_from(&fields);
                address
            })
            .collect()
    }

    /// Bulk merge of supplementary records under the given precedence
    pub fn enrich_all<I>(&self, entries: I, policy: SupplementMerge) -> Vec<DeviceAddress>
    where
        I: IntoIterator<Item = (DeviceAddress, Map<String, Value>)>,
    {
        if policy == SupplementMerge::Overwrite {
            return self.replace_all(entries);
        }

        let mut cache = self.write();
        entries
            .into_iter()
            .map(|(address, fields)| {
                cache.entry(address.clone()).or_default().fill_from(&fields);
                address
            })
            .collect()
    }

    /// Apply one streamed update
    ///
    /// A structured payload is merged field by field. When it carries a
    /// nested `value` record, that record is merged first and the payload's
    /// other top-level fields win any ties. A bare scalar only replaces the
    /// `value` field.
    pub fn merge_update(&self, address: &DeviceAddress, payload: &Value) {
        let mut cache = self.write();
        let state = cache.entry(address.clone()).or_default();
        merge_payload(state, payload);
    }
}

fn merge_payload(state: &mut DeviceState, payload: &Value) {
    match payload {
        Value::Object(fields) => match fields.get("value") {
            Some(Value::Object(nested)) => {
                state.merge_from(nested);
                for (key, value) in fields.iter().filter(|(key, _)| key.as_str() != "value") {
                    state.insert(key.clone(), value.clone());
                }
            }
            _ => state.merge_from(fields),
        },
        scalar => {
            state.insert("value", scalar.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn addr(dev: &str, circuit: &str) -> DeviceAddress {
        DeviceAddress::new(dev, circuit)
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn absent_until_populated() {
        let cache = StateCache::new();
        assert!(cache.get(&addr("relay", "1_01")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn structured_updates_union_fields_last_write_wins() {
        let cache = StateCache::new();
        let a = addr("relay", "1_01");

        cache.merge_update(&a, &json!({"value": 0, "mode": "simple"}));
        cache.merge_update(&a, &json!({"value": 1, "alias": "al_lamp"}));
        cache.merge_update(&a, &json!({"mode": "pwm"}));

        assert_eq!(
            cache.get(&a).unwrap().into_inner(),
            fields(json!({"value": 1, "mode": "pwm", "alias": "al_lamp"}))
        );
    }

    #[test]
    fn scalar_update_creates_value_only_record() {
        let cache = StateCache::new();
        let a = addr("di", "1_01");

        cache.merge_update(&a, &json!(1));

        assert_eq!(cache.get(&a).unwrap(), DeviceState::with_value(json!(1)));
    }

    #[test]
    fn scalar_update_preserves_other_fields() {
        let cache = StateCache::new();
        let a = addr("di", "1_01");
        cache.merge_update(&a, &json!({"value": 0, "alias": "al_door", "debounce": 50}));

        cache.merge_update(&a, &json!(1));

        assert_eq!(
            cache.get(&a).unwrap().into_inner(),
            fields(json!({"value": 1, "alias": "al_door", "debounce": 50}))
        );
    }

    #[test]
    fn nested_value_record_is_overridden_by_top_level_fields() {
        let cache = StateCache::new();
        let a = addr("1wdevice", "28FF");

        cache.merge_update(
            &a,
            &json!({
                "value": {"temp": 21.5, "humidity": 40, "lost": true},
                "lost": false,
                "dev": "1wdevice",
            }),
        );

        assert_eq!(
            cache.get(&a).unwrap().into_inner(),
            fields(json!({"temp": 21.5, "humidity": 40, "lost": false, "dev": "1wdevice"}))
        );
    }

    #[test]
    fn replace_all_is_a_shallow_merge() {
        let cache = StateCache::new();
        let a = addr("relay", "1_01");
        cache.merge_update(&a, &json!({"value": 0, "alias": "al_pump"}));

        let written = cache.replace_all(vec![(a.clone(), fields(json!({"value": 1, "mode": "simple"})))]);

        assert_eq!(written, vec![a.clone()]);
        assert_eq!(
            cache.get(&a).unwrap().into_inner(),
            fields(json!({"value": 1, "alias": "al_pump", "mode": "simple"}))
        );
    }

    #[test]
    fn enrich_fill_missing_keeps_snapshot_fields() {
        let cache = StateCache::new();
        let a = addr("relay", "1_01");
        cache.replace_all(vec![(a.clone(), fields(json!({"value": 1, "alias": "al_ws"})))]);

        cache.enrich_all(
            vec![(a.clone(), fields(json!({"value": 0, "alias": "al_rest", "glob_dev_id": 1})))],
            SupplementMerge::FillMissing,
        );

        assert_eq!(
            cache.get(&a).unwrap().into_inner(),
            fields(json!({"value": 1, "alias": "al_ws", "glob_dev_id": 1}))
        );
    }

    #[test]
    fn enrich_overwrite_prefers_supplementary_fields() {
        let cache = StateCache::new();
        let a = addr("relay", "1_01");
        cache.replace_all(vec![(a.clone(), fields(json!({"value": 1, "alias": "al_ws"})))]);

        cache.enrich_all(
            vec![(a.clone(), fields(json!({"alias": "al_rest"})))],
            SupplementMerge::Overwrite,
        );

        let state = cache.get(&a).unwrap();
        assert_eq!(state.alias(), Some("al_rest"));
        assert_eq!(state.value(), Some(&json!(1)));
    }

    #[test]
    fn input_device_type_detection() {
        let cache = StateCache::new();
        assert_eq!(cache.input_device_types(), vec!["input", "di"]);

        cache.merge_update(&addr("relay", "1_01"), &json!(0));
        cache.merge_update(&addr("di", "1_01"), &json!(1));
        assert_eq!(cache.input_device_types(), vec!["di"]);
    }

    #[test]
    fn devices_of_type_filters_by_tag() {
        let cache = StateCache::new();
        cache.merge_update(&addr("relay", "1_01"), &json!(0));
        cache.merge_update(&addr("relay", "1_02"), &json!(1));
        cache.merge_update(&addr("ai", "1_01"), &json!(2.5));

        let relays = cache.devices_of_type("relay");
        assert_eq!(relays.len(), 2);
        assert!(relays.iter().all(|(a, _)| a.device_type == "relay"));
    }

    #[test]
    fn ordered_replay_matches_field_union() {
        let cache = StateCache::new();
        let mut expected: BTreeMap<DeviceAddress, Map<String, Value>> = BTreeMap::new();

        // Deterministic interleaving of 1000 updates over 10 addresses
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for i in 0..1000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let address = addr("relay", &format!("1_{:02}", seed % 10));
            let payload = if i % 3 == 0 {
                json!(i)
            } else {
                json!({"value": i, (format!("f{}", seed % 4)): i})
            };

            cache.merge_update(&address, &payload);

            let record = expected.entry(address).or_default();
            match payload {
                Value::Object(map) => record.extend(map),
                scalar => {
                    record.insert("value".to_string(), scalar);
                }
            }
        }

        let snapshot: BTreeMap<_, _> = cache
            .snapshot()
            .into_iter()
            .map(|(address, state)| (address, state.into_inner()))
            .collect();
        assert_eq!(snapshot, expected);
    }
}
