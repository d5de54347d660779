pub mod asset;

pub use asset::Asset;

use anyhow::{Result, Context as AnyhowContext};
use evalexpr::{build_operator_tree, ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, Node as EvalNode};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use tracing::warn;

/// Predicate as written in a workflow document.
///
/// ```yaml
/// trigger:
///   - role: { is: video }
///   - any:
///       - extension: { is: mp4 }
///       - extension: { is: mov }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum PredicateSpec {
    Role { is: String },
    Extension { is: String },
    Attribute { name: String, is: Value },
    /// Boolean evalexpr expression over the asset attributes.
    Expression(String),
    #[serde(alias = "and")]
    All(Vec<PredicateSpec>),
    #[serde(alias = "or")]
    Any(Vec<PredicateSpec>),
    Not(Box<PredicateSpec>),
}

impl PredicateSpec {
    pub fn role(is: impl Into<String>) -> Self {
        PredicateSpec::Role { is: is.into() }
    }

    pub fn extension(is: impl Into<String>) -> Self {
        PredicateSpec::Extension { is: is.into() }
    }

    pub fn attribute(name: impl Into<String>, is: impl Into<Value>) -> Self {
        PredicateSpec::Attribute { name: name.into(), is: is.into() }
    }
}

/// Compiled predicate tree. Immutable once parsed; evaluated against one asset per call.
#[derive(Debug)]
pub enum Predicate {
    Role(String),
    Extension(String),
    Attribute { name: String, expected: Value },
    Expression { source: String, node: EvalNode },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn parse(spec: &PredicateSpec) -> Result<Self> {
        Ok(match spec {
            PredicateSpec::Role { is } => Predicate::Role(is.clone()),
            PredicateSpec::Extension { is } => Predicate::Extension(is.trim_start_matches('.').to_string()),
            PredicateSpec::Attribute { name, is } => Predicate::Attribute {
                name: name.clone(),
                expected: is.clone(),
            },
            PredicateSpec::Expression(source) => {
                let clean = source.replace("${", "").replace('}', "");
                let node = build_operator_tree(&clean)
                    .with_context(|| format!("Invalid trigger expression: {}", source))?;
                Predicate::Expression { source: clean, node }
            }
            PredicateSpec::All(specs) => Predicate::All(Self::parse_all(specs)?),
            PredicateSpec::Any(specs) => Predicate::Any(Self::parse_all(specs)?),
            PredicateSpec::Not(spec) => Predicate::Not(Box::new(Self::parse(spec)?)),
        })
    }

    fn parse_all(specs: &[PredicateSpec]) -> Result<Vec<Predicate>> {
        specs.iter().map(Self::parse).collect()
    }

    pub fn evaluate(&self, asset: &Asset) -> bool {
        match self {
            Predicate::Role(role) => asset.role == *role,
            Predicate::Extension(ext) => asset.extension() == Some(ext.as_str()),
            Predicate::Attribute { name, expected } => asset
                .attribute(name)
                .is_some_and(|actual| value_matches(&actual, expected)),
            Predicate::Expression { source, node } => {
                let ctx = expression_context(asset);
                node.eval_boolean_with_context(&ctx).unwrap_or_else(|e| {
                    warn!(expression = %source, error = %e, "Trigger expression evaluation failed");
                    false
                })
            }
            Predicate::All(operands) => operands.iter().all(|p| p.evaluate(asset)),
            Predicate::Any(operands) => operands.iter().any(|p| p.evaluate(asset)),
            Predicate::Not(operand) => !operand.evaluate(asset),
        }
    }
}

/// The AND of the top-level predicates of a workflow's trigger section. An
/// empty trigger matches every asset.
#[derive(Debug, Default)]
pub struct Trigger {
    predicates: Vec<Predicate>,
}

impl Trigger {
    pub fn parse(specs: &[PredicateSpec]) -> Result<Self> {
        Ok(Self {
            predicates: Predicate::parse_all(specs)?,
        })
    }

    /// Parses a YAML list of predicates, as found under `trigger:`.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let specs: Vec<PredicateSpec> = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str(content),
        )
        .context("Failed to deserialize trigger")?;
        Self::parse(&specs)
    }

    pub fn evaluate(&self, asset: &Asset) -> bool {
        self.predicates.iter().all(|p| p.evaluate(asset))
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    // YAML literals are loosely typed: `is: 720` should match "720" and the other way round.
    match (scalar_text(actual), scalar_text(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn expression_context(asset: &Asset) -> HashMapContext<DefaultNumericTypes> {
    let mut ctx = HashMapContext::<DefaultNumericTypes>::new();
    for (k, v) in asset.all_attributes() {
        let ev = match v {
            Value::String(s) => Some(evalexpr::Value::String(s)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() { Some(evalexpr::Value::Int(i)) }
                else { n.as_f64().map(evalexpr::Value::Float) }
            }
            Value::Bool(b) => Some(evalexpr::Value::Boolean(b)),
            _ => None,
        };
        if let Some(ev) = ev {
            let _ = ctx.set_value(k, ev);
        }
    }
    ctx
}
