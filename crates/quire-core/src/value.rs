//! The computed-result type exposed between blocks.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::block::BlockError;

/// Names a block variant a library can construct ("code", "sheet", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockTag(Arc<str>);

impl BlockTag {
    pub fn new(tag: impl Into<Arc<str>>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlockTag {
    fn from(tag: &str) -> Self {
        Self(Arc::from(tag))
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value one block exposes to its dependents.
///
/// Cloning is cheap: compound payloads sit behind `Arc`, so threading values
/// through environments shares rather than copies. Failures and unsettled
/// asynchronous computations are values too — dependents always receive
/// *something* they can display or propagate.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(Arc<str>),
    List(Arc<Vec<Value>>),
    Record(Arc<IndexMap<String, Value>>),
    /// A constructible block variant, as produced by library bindings.
    Block(BlockTag),
    /// A failed computation, propagating as data instead of unwinding.
    Error(Arc<BlockError>),
    /// An asynchronous computation that has not settled yet.
    Pending,
}

impl Value {
    pub fn text(s: impl Into<Arc<str>>) -> Self {
        Value::Text(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    pub fn record(fields: IndexMap<String, Value>) -> Self {
        Value::Record(Arc::new(fields))
    }

    pub fn error(err: BlockError) -> Self {
        Value::Error(Arc::new(err))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Value::Pending)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Block(_) => "block",
            Value::Error(_) => "error",
            Value::Pending => "pending",
        }
    }

    /// Display-oriented JSON projection. Not a wire format: blocks persist
    /// their *state*, never their computed values.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
            Value::Text(s) => Json::String(s.to_string()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Block(tag) => Json::String(format!("<block:{tag}>")),
            Value::Error(err) => Json::String(format!("<error: {err}>")),
            Value::Pending => Json::String("<pending>".to_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(Arc::from(s))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Text(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Record(fields) => {
                f.write_str("{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Block(tag) => write!(f, "<block:{tag}>"),
            Value::Error(err) => write!(f, "<error: {err}>"),
            Value::Pending => f.write_str("<pending>"),
        }
    }
}

/// Integer-valued floats print without the trailing `.0`.
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Number(5.0).to_string(), "5");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::text("hi").to_string(), "hi");
        assert_eq!(
            Value::list(vec![Value::Number(1.0), Value::text("a")]).to_string(),
            "[1, a]"
        );
        assert_eq!(Value::Block(BlockTag::from("code")).to_string(), "<block:code>");
    }

    #[test]
    fn test_equality_shares_structure() {
        let a = Value::list(vec![Value::Number(1.0)]);
        let b = a.clone();
        assert_eq!(a, b);
        if let (Value::List(x), Value::List(y)) = (&a, &b) {
            assert!(Arc::ptr_eq(x, y));
        }
    }

    #[test]
    fn test_to_json_projection() {
        let mut fields = IndexMap::new();
        fields.insert("x".to_string(), Value::Number(1.0));
        let v = Value::record(fields);
        assert_eq!(v.to_json(), serde_json::json!({"x": 1.0}));
        assert_eq!(Value::Pending.to_json(), serde_json::json!("<pending>"));
    }
}
