//! Sync items: outbound payloads waiting for a deferred task.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Error;

/// A payload stored under a tag until the deferred task of that tag delivers it.
///
/// Serializes as a flat record, `{"tag": ..., <payload fields>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub tag: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl SyncItem {
    /// Build an item from any serializable payload.
    ///
    /// Object payloads contribute their fields directly; other values are kept
    /// under `data`. A `tag` field inside the payload is dropped in favor of
    /// `tag`.
    pub fn new(tag: impl Into<String>, payload: impl Serialize) -> Result<Self, Error> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(Error::InvalidInput("sync tag cannot be empty".into()));
        }

        let payload = match serde_json::to_value(payload)? {
            Value::Object(mut map) => {
                map.remove("tag");
                map
            }
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".into(), other);
                map
            }
        };

        Ok(Self { tag, payload })
    }

    /// Look up one payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// The full record as JSON, tag included.
    pub fn to_record(&self) -> Value {
        let mut record = self.payload.clone();
        record.insert("tag".into(), Value::String(self.tag.clone()));
        Value::Object(record)
    }
}
