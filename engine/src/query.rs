//! Query filter tree for `find_documents`.
//!
//! The external query translator compiles Mongo-like filters down to this
//! tree; backends turn it into their native filter via [`QueryVisitor`].
//! The in-memory store evaluates it directly with [`QueryNode::matches`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A node in the query filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "camelCase")]
pub enum QueryNode {
    And(Box<QueryNode>, Box<QueryNode>),
    Or(Box<QueryNode>, Box<QueryNode>),
    Eq { field: String, value: Value },
    Neq { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    Contains { field: String, value: Value },
}

/// Visitor over the query tree, for translation to backend filters.
pub trait QueryVisitor {
    type Output;

    fn visit_and(&mut self, left: &QueryNode, right: &QueryNode) -> Self::Output;
    fn visit_or(&mut self, left: &QueryNode, right: &QueryNode) -> Self::Output;
    fn visit_comparison(&mut self, op: Comparison, field: &str, value: &Value) -> Self::Output;
}

/// Leaf comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl QueryNode {
    /// Drive a visitor over this node.
    pub fn accept<V: QueryVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            QueryNode::And(l, r) => visitor.visit_and(l, r),
            QueryNode::Or(l, r) => visitor.visit_or(l, r),
            QueryNode::Eq { field, value } => visitor.visit_comparison(Comparison::Eq, field, value),
            QueryNode::Neq { field, value } => {
                visitor.visit_comparison(Comparison::Neq, field, value)
            }
            QueryNode::Gt { field, value } => visitor.visit_comparison(Comparison::Gt, field, value),
            QueryNode::Gte { field, value } => {
                visitor.visit_comparison(Comparison::Gte, field, value)
            }
            QueryNode::Lt { field, value } => visitor.visit_comparison(Comparison::Lt, field, value),
            QueryNode::Lte { field, value } => {
                visitor.visit_comparison(Comparison::Lte, field, value)
            }
            QueryNode::Contains { field, value } => {
                visitor.visit_comparison(Comparison::Contains, field, value)
            }
        }
    }

    /// Evaluate this filter against a document payload.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            QueryNode::And(l, r) => l.matches(doc) && r.matches(doc),
            QueryNode::Or(l, r) => l.matches(doc) || r.matches(doc),
            QueryNode::Eq { field, value } => lookup(doc, field) == Some(value),
            QueryNode::Neq { field, value } => lookup(doc, field) != Some(value),
            QueryNode::Gt { field, value } => compare(lookup(doc, field), value)
                .map(|o| o == std::cmp::Ordering::Greater)
                .unwrap_or(false),
            QueryNode::Gte { field, value } => compare(lookup(doc, field), value)
                .map(|o| o != std::cmp::Ordering::Less)
                .unwrap_or(false),
            QueryNode::Lt { field, value } => compare(lookup(doc, field), value)
                .map(|o| o == std::cmp::Ordering::Less)
                .unwrap_or(false),
            QueryNode::Lte { field, value } => compare(lookup(doc, field), value)
                .map(|o| o != std::cmp::Ordering::Greater)
                .unwrap_or(false),
            QueryNode::Contains { field, value } => contains(lookup(doc, field), value),
        }
    }
}

/// Resolve a dotted field path inside a JSON object.
fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn compare(field: Option<&Value>, target: &Value) -> Option<std::cmp::Ordering> {
    match (field?, target) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

fn contains(field: Option<&Value>, target: &Value) -> bool {
    match field {
        Some(Value::String(haystack)) => target
            .as_str()
            .map(|needle| haystack.contains(needle))
            .unwrap_or(false),
        Some(Value::Array(items)) => items.contains(target),
        _ => false,
    }
}
