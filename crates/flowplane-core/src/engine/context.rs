//! Accumulated run context.
//!
//! The context is the JSON document condition expressions and node templates
//! address with JSON pointers: `/input/...` for the trigger payload and
//! `/nodes/<id>/output/...` for upstream results. It is never persisted as a
//! row; it is rebuilt from the event log on every claim, which is what makes
//! a run resumable by any worker.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use flowplane_types::dsl::{ConditionExpr, ConditionOp};
use flowplane_types::event::{RunEvent, RunEventType};

/// The addressable state of a run while it executes.
#[derive(Debug, Clone)]
pub struct RunContext {
    input: Value,
    node_outputs: BTreeMap<String, Value>,
}

impl RunContext {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            node_outputs: BTreeMap::new(),
        }
    }

    /// Rebuild context from a replayed event stream: every `node_succeeded`
    /// event's `payload.output` becomes that node's output. Later events win,
    /// which matters after a retry.
    pub fn from_events(input: Value, events: &[RunEvent]) -> Self {
        let mut ctx = Self::new(input);
        for event in events {
            if event.event_type == RunEventType::NodeSucceeded
                && let Some(node_id) = &event.node_id
            {
                let output = event.payload.get("output").cloned().unwrap_or(Value::Null);
                ctx.record_output(node_id.clone(), output);
            }
        }
        ctx
    }

    pub fn record_output(&mut self, node_id: String, output: Value) {
        self.node_outputs.insert(node_id, output);
    }

    pub fn output_of(&self, node_id: &str) -> Option<&Value> {
        self.node_outputs.get(node_id)
    }

    /// The full addressable document.
    pub fn to_value(&self) -> Value {
        let nodes: serde_json::Map<String, Value> = self
            .node_outputs
            .iter()
            .map(|(id, output)| (id.clone(), json!({ "output": output })))
            .collect();
        json!({ "input": self.input, "nodes": nodes })
    }

    /// Resolve a JSON pointer against the context document. Missing paths
    /// resolve to `Null` rather than erroring; conditions treat absence as
    /// falsy.
    pub fn resolve(&self, pointer: &str) -> Value {
        self.to_value().pointer(pointer).cloned().unwrap_or(Value::Null)
    }

    /// Evaluate a condition expression against the context.
    pub fn evaluate(&self, expr: &ConditionExpr) -> bool {
        let left = self.resolve(&expr.left);
        let right = expr.right.clone().unwrap_or(Value::Null);
        match expr.op {
            ConditionOp::Eq => left == right,
            ConditionOp::Ne => left != right,
            ConditionOp::Contains => match (&left, &right) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
            ConditionOp::Truthy => is_truthy(&left),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
