use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-feature configuration: an enabled flag plus a flat key -> value bag.
///
/// This is the system's only schema-less configuration surface. Typed getters
/// default gracefully when a key is absent or has the wrong type, so adding
/// keys stays backward compatible.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub enabled: bool,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            properties: HashMap::new(),
        }
    }
}

impl FeatureConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            properties: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.properties
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn get_f32(&self, key: &str, default: f32) -> f32 {
        self.properties
            .get(key)
            .and_then(Value::as_f64)
            .map(|v| v as f32)
            .unwrap_or(default)
    }

    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.properties
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default)
    }

    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.properties
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
    }

    /// Color as a `[r, g, b]` array.
    pub fn get_color(&self, key: &str, default: [u8; 3]) -> [u8; 3] {
        let Some(Value::Array(values)) = self.properties.get(key) else {
            return default;
        };
        if values.len() != 3 {
            return default;
        }
        let mut color = [0u8; 3];
        for (slot, value) in color.iter_mut().zip(values) {
            match value.as_u64().and_then(|v| u8::try_from(v).ok()) {
                Some(channel) => *slot = channel,
                None => return default,
            }
        }
        color
    }
}
