use serde_json::{Map, Value};

use crate::errors::InterfaceError;
use crate::tools::ArgumentError;

pub const UNKNOWN_TOOL_CALL_ID: &str = "unknown";

const TOOL_CALLS: &str = "tool-calls";
const FUNCTION_CALL: &str = "function-call";

/// One function call requested by the voice platform, before routing.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: Option<String>,
    raw_arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: Option<String>, raw_arguments: Value) -> Self {
        Self { id: id.into(), name, raw_arguments }
    }

    /// Arguments arrive either as an object or as a JSON-encoded string.
    pub fn arguments(&self) -> Result<Map<String, Value>, ArgumentError> {
        match &self.raw_arguments {
            Value::Null => Ok(Map::new()),
            Value::Object(map) => Ok(map.clone()),
            Value::String(text) if text.trim().is_empty() => Ok(Map::new()),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(ArgumentError::Malformed("arguments must be an object".to_owned())),
                Err(error) => Err(ArgumentError::Malformed(error.to_string())),
            },
            _ => Err(ArgumentError::Malformed("arguments must be an object".to_owned())),
        }
    }
}

/// The parts of an inbound webhook body the dispatcher needs.
#[derive(Clone, Debug, PartialEq)]
pub struct WebhookRequest {
    pub message_type: String,
    pub call_id: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl WebhookRequest {
    pub fn parse(body: &[u8]) -> Result<Self, InterfaceError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|error| malformed(format!("body is not valid JSON: {error}")))?;
        let Value::Object(root) = value else {
            return Err(malformed("body must be a JSON object".to_owned()));
        };
        let Some(Value::Object(message)) = root.get("message") else {
            return Err(malformed("`message` must be an object".to_owned()));
        };

        let message_type =
            message.get("type").and_then(Value::as_str).unwrap_or_default().to_owned();
        let call_id = root
            .get("call")
            .and_then(|call| call.get("id"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let tool_calls = match message_type.as_str() {
            TOOL_CALLS => message
                .get("toolCalls")
                .and_then(Value::as_array)
                .map(|entries| entries.iter().map(tool_call_entry).collect())
                .unwrap_or_default(),
            FUNCTION_CALL => message.get("functionCall").map(legacy_entry).into_iter().collect(),
            _ => Vec::new(),
        };

        Ok(Self { message_type, call_id, tool_calls })
    }

    /// Other message types (status updates, transcripts) carry nothing to run.
    pub fn is_tool_call_batch(&self) -> bool {
        matches!(self.message_type.as_str(), TOOL_CALLS | FUNCTION_CALL)
    }
}

fn tool_call_entry(entry: &Value) -> ToolCall {
    let function = entry.get("function");
    let name = function.and_then(|function| function.get("name")).and_then(Value::as_str);
    let arguments = function.and_then(|function| function.get("arguments")).cloned();
    ToolCall::new(id_of(entry), name.map(str::to_owned), arguments.unwrap_or(Value::Null))
}

fn legacy_entry(entry: &Value) -> ToolCall {
    ToolCall::new(
        id_of(entry),
        entry.get("name").and_then(Value::as_str).map(str::to_owned),
        entry.get("parameters").cloned().unwrap_or(Value::Null),
    )
}

fn id_of(entry: &Value) -> String {
    entry
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .unwrap_or(UNKNOWN_TOOL_CALL_ID)
        .to_owned()
}

fn malformed(message: String) -> InterfaceError {
    InterfaceError::BadRequest { message, correlation_id: "unassigned".to_owned() }
}
