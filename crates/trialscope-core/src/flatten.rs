//! Flattening of nested hyperparameter objects into dot-separated keys.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::HpValue;

/// Flatten a hyperparameter object: `{"optim": {"lr": 0.1}}` becomes
/// `{"optim.lr": 0.1}`. Anything other than an object yields an empty map.
pub fn flatten_hparams(hparams: &Value) -> BTreeMap<String, HpValue> {
    let mut out = BTreeMap::new();
    if let Value::Object(map) = hparams {
        for (key, value) in map {
            flatten_into(key, value, &mut out);
        }
    }
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, HpValue>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(&format!("{}.{}", prefix, key), child, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), HpValue::from_json(leaf));
        }
    }
}
