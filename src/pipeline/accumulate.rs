//! Function-call argument reassembly.
//!
//! Argument text arrives as arbitrary fragments. Fragments are appended per call
//! id in arrival order and parsed only once the call is resolved; nothing is
//! parsed incrementally.

use crate::error::Error;
use crate::types::UnifiedEvent;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A call whose arguments are still arriving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFunctionCall {
    pub call_id: String,
    /// Unknown until the provider names the function.
    pub name: Option<String>,
    pub argument_buffer: String,
    /// Position in which the call was first observed within the stream.
    pub order_index: usize,
}

/// Per-call accumulator. Each gateway call owns exactly one.
#[derive(Debug, Default)]
pub struct FunctionCallAccumulator {
    pending: HashMap<String, PendingFunctionCall>,
    next_order: usize,
    completed: usize,
}

impl FunctionCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unresolved calls.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Calls resolved successfully so far.
    pub fn completed_count(&self) -> usize {
        self.completed
    }

    pub fn get(&self, call_id: &str) -> Option<&PendingFunctionCall> {
        self.pending.get(call_id)
    }

    fn entry(&mut self, call_id: &str) -> &mut PendingFunctionCall {
        let next_order = &mut self.next_order;
        self.pending
            .entry(call_id.to_string())
            .or_insert_with(|| {
                let order_index = *next_order;
                *next_order += 1;
                PendingFunctionCall {
                    call_id: call_id.to_string(),
                    name: None,
                    argument_buffer: String::new(),
                    order_index,
                }
            })
    }

    /// Register a call (or late-arriving name). Emits `FunctionCallStarted`
    /// the first time the name is known.
    pub fn on_start(&mut self, call_id: &str, name: Option<&str>, out: &mut Vec<UnifiedEvent>) {
        let pending = self.entry(call_id);
        if pending.name.is_some() {
            return;
        }
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            pending.name = Some(name.to_string());
            out.push(UnifiedEvent::FunctionCallStarted {
                call_id: call_id.to_string(),
                name: name.to_string(),
            });
        }
    }

    /// Append a fragment. The pending entry is created on first sight.
    pub fn on_argument_fragment(&mut self, call_id: &str, text: &str, out: &mut Vec<UnifiedEvent>) {
        let pending = self.entry(call_id);
        if text.is_empty() {
            return;
        }
        pending.argument_buffer.push_str(text);
        out.push(UnifiedEvent::FunctionCallArgumentDelta {
            call_id: call_id.to_string(),
            partial_text: text.to_string(),
        });
    }

    /// Parse the buffered arguments and emit `FunctionCallCompleted`.
    ///
    /// The pending entry is removed whether or not parsing succeeds. Resolving
    /// an unknown id is a no-op.
    pub fn on_resolve(&mut self, call_id: &str, out: &mut Vec<UnifiedEvent>) -> Result<(), Error> {
        let Some(pending) = self.pending.remove(call_id) else {
            return Ok(());
        };
        let event = Self::complete(pending)?;
        self.completed += 1;
        out.push(event);
        Ok(())
    }

    /// Resolve a call that arrived as one already-structured object: start and
    /// resolve back to back, without argument deltas.
    pub fn resolve_structured(
        &mut self,
        call_id: &str,
        name: &str,
        arguments: &Value,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error> {
        self.on_start(call_id, Some(name), out);
        let pending = self.entry(call_id);
        pending.argument_buffer = arguments.to_string();
        self.on_resolve(call_id, out)
    }

    /// Resolve every pending call in the order it was first seen. Returns how
    /// many completed. Stops at the first failure; the remaining calls are
    /// discarded.
    pub fn resolve_all(&mut self, out: &mut Vec<UnifiedEvent>) -> Result<usize, Error> {
        let mut ordered: Vec<PendingFunctionCall> =
            self.pending.drain().map(|(_, pending)| pending).collect();
        ordered.sort_by_key(|p| p.order_index);

        let mut resolved = 0;
        for pending in ordered {
            let event = Self::complete(pending)?;
            self.completed += 1;
            resolved += 1;
            out.push(event);
        }
        Ok(resolved)
    }

    /// Drop all pending state (stream failure or cancellation). Returns how many
    /// calls were abandoned.
    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    fn complete(pending: PendingFunctionCall) -> Result<UnifiedEvent, Error> {
        let PendingFunctionCall {
            call_id,
            name,
            argument_buffer,
            ..
        } = pending;

        let name = name.ok_or_else(|| Error::FunctionCallParse {
            call_id: call_id.clone(),
            reason: "function name never received".to_string(),
        })?;

        let arguments = parse_arguments(&argument_buffer).map_err(|reason| {
            Error::FunctionCallParse {
                call_id: call_id.clone(),
                reason,
            }
        })?;

        Ok(UnifiedEvent::FunctionCallCompleted {
            call_id,
            name,
            arguments,
        })
    }
}

/// Empty argument text means a call without parameters.
fn parse_arguments(buffer: &str) -> Result<Map<String, Value>, String> {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!(
            "expected a JSON object, got {}",
            match other {
                Value::Array(_) => "an array",
                Value::String(_) => "a string",
                Value::Number(_) => "a number",
                Value::Bool(_) => "a boolean",
                _ => "null",
            }
        )),
        Err(e) => Err(e.to_string()),
    }
}
