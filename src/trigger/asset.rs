use std::collections::HashMap;
use std::path::{Path, PathBuf};
use serde::{Serialize, Deserialize};
use serde_json::Value;

/// An archived item as seen by triggers and runner factories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub role: String,
    pub filename: PathBuf,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Asset {
    pub fn new(role: impl Into<String>, filename: impl Into<PathBuf>) -> Self {
        Self {
            role: role.into(),
            filename: filename.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.filename
    }

    /// Extension of the file name without the leading dot ("mp4" for "talk.mp4").
    pub fn extension(&self) -> Option<&str> {
        self.filename.extension().and_then(|e| e.to_str())
    }

    /// Looks up an attribute. `role`, `filename` and `extension` are built in;
    /// anything else comes from the free-form attribute map.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "role" => Some(Value::String(self.role.clone())),
            "filename" => Some(Value::String(self.filename.to_string_lossy().into_owned())),
            "extension" => self.extension().map(|e| Value::String(e.to_string())),
            _ => self.attributes.get(name).cloned(),
        }
    }

    /// Every attribute, built-ins included.
    pub fn all_attributes(&self) -> HashMap<String, Value> {
        let mut all = self.attributes.clone();
        for key in ["role", "filename", "extension"] {
            if let Some(v) = self.attribute(key) {
                all.insert(key.to_string(), v);
            }
        }
        all
    }
}
