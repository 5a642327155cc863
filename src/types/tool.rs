//! Function calling definitions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Function the model may invoke. `parameters` is a JSON Schema object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl FunctionSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A function call collected from a finished stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedFunctionCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}
