use std::collections::HashMap;
use std::sync::Arc;
use anyhow::{Result, anyhow};
use serde_json::Value;
use crate::runtime::runner::{Runner, RunnerFactory};
use crate::trigger::Asset;

pub mod builtin;
pub mod http;
pub mod offload;
pub mod process;

/// Implementation names available to workflow documents.
#[derive(Default, Clone)]
pub struct RunnerRegistry {
    factories: HashMap<String, Arc<dyn RunnerFactory>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `log`, `fail`, `delay`, `command` and `download`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(builtin::LogFactory);
        registry.register(builtin::FailFactory);
        registry.register(builtin::DelayFactory);
        registry.register(process::CommandFactory);
        registry.register(http::DownloadFactory::new());
        registry
    }

    /// Adds a factory; a factory with the same name is replaced.
    pub fn register(&mut self, factory: impl RunnerFactory + 'static) {
        self.register_arc(Arc::new(factory));
    }

    pub fn register_arc(&mut self, factory: Arc<dyn RunnerFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RunnerFactory>> {
        self.factories.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds a runner for one asset. `${attr}` placeholders in string params
    /// are replaced by the asset's attributes first.
    pub fn create(&self, name: &str, asset: &Asset, params: &Value) -> Result<Box<dyn Runner>> {
        let factory = self.get(name)
            .ok_or_else(|| anyhow!("Unknown implementation: {}", name))?;
        let params = resolve_params(params, asset);
        factory.validate(&params)?;
        factory.create(asset, &params)
    }
}

pub fn resolve_params(params: &Value, asset: &Asset) -> Value {
    match params {
        Value::String(s) => resolve_str(s, asset),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_params(v, asset)).collect()),
        Value::Object(map) => Value::Object(
            map.iter().map(|(k, v)| (k.clone(), resolve_params(v, asset))).collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_str(s: &str, asset: &Asset) -> Value {
    // A lone placeholder keeps the attribute's own type.
    if let Some(name) = s.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
        if !name.contains("${") {
            if let Some(value) = asset.attribute(name) {
                return value;
            }
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match asset.attribute(name) {
                    Some(Value::String(v)) => out.push_str(&v),
                    Some(v) => out.push_str(&v.to_string()),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}
