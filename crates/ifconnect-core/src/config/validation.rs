//! Config validation - warns about unknown fields

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Validate JSON config and warn about unknown fields.
pub fn warn_unknown_fields(content: &str, config_name: &str) {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return;
    };

    let expected = expected_client_config_keys();
    let unknowns = find_unknown_keys(&value, &expected, "");

    for path in unknowns {
        warn!("Unknown config field in {config_name}: {path}");
    }
}

/// Find unknown keys in JSON value compared to expected keys.
/// Returns paths like "discovery.unknownField" for unknown fields.
fn find_unknown_keys(value: &Value, expected: &ExpectedKeys, prefix: &str) -> Vec<String> {
    let mut unknowns = Vec::new();

    let Value::Object(obj) = value else {
        return unknowns;
    };

    for (key, child) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        if let Some(nested) = expected.nested.get(key.as_str()) {
            unknowns.extend(find_unknown_keys(child, nested, &path));
        } else if !expected.open.contains(key.as_str()) && !expected.fields.contains(key.as_str())
        {
            unknowns.push(path);
        }
    }

    unknowns
}

/// Expected keys for a config section.
/// `fields` are leaf fields, `nested` are nested objects with their own expected keys,
/// `open` are maps whose keys are checked elsewhere.
struct ExpectedKeys {
    fields: HashSet<&'static str>,
    open: HashSet<&'static str>,
    nested: HashMap<&'static str, ExpectedKeys>,
}

impl ExpectedKeys {
    fn new(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.iter().copied().collect(),
            open: HashSet::new(),
            nested: HashMap::new(),
        }
    }

    fn with_nested(mut self, key: &'static str, nested: ExpectedKeys) -> Self {
        self.nested.insert(key, nested);
        self
    }

    fn with_open(mut self, key: &'static str) -> Self {
        self.open.insert(key);
        self
    }
}

/// Expected keys for `ClientConfig` (settings.rs)
fn expected_client_config_keys() -> ExpectedKeys {
    let discovery_keys = ExpectedKeys::new(&["port", "closeOnDiscover", "connectOnDiscover"]);
    let telemetry_keys = ExpectedKeys::new(&["enabled", "port"]);
    let logging_keys = ExpectedKeys::new(&["enabled", "level"]);
    let frame_keys = ExpectedKeys::new(&["oversize"]);

    // interval names are resolved against categories when the config is applied
    ExpectedKeys::new(&["host", "port"])
        .with_open("intervals")
        .with_nested("discovery", discovery_keys)
        .with_nested("telemetry", telemetry_keys)
        .with_nested("logging", logging_keys)
        .with_nested("frame", frame_keys)
}
