//! Tool invocation boundary: approval policy, argument degradation, and
//! result serialization.

use crate::core::prompter::Prompter;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
    /// Approve this call and suppress prompts for the rest of the session.
    ApprovedAlways,
}

/// Malformed or absent argument JSON degrades to an empty object; a bad
/// payload from the model never aborts the turn.
pub fn parse_arguments(raw: Option<&str>) -> Map<String, Value> {
    raw.and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

/// Prompts until the user picks one of the four choices. No timeout; end
/// of input counts as a denial.
pub async fn request_approval(
    prompter: &mut dyn Prompter,
    tool_name: &str,
    arguments: &Map<String, Value>,
) -> ApprovalDecision {
    let prompt = format!("Execute tool {tool_name}? (y=yes, n=no, a=always, s=show args) ");
    loop {
        let Some(choice) = prompter.next_line(&prompt).await else {
            return ApprovalDecision::Denied;
        };
        match choice.trim().to_lowercase().as_str() {
            "y" => return ApprovalDecision::Approved,
            "n" => return ApprovalDecision::Denied,
            "a" => return ApprovalDecision::ApprovedAlways,
            "s" => {
                let rendered = serde_json::to_string(&Value::Object(arguments.clone()))
                    .unwrap_or_else(|_| "{}".to_string());
                prompter.notify(&format!("Tool arguments: {rendered}"));
            }
            _ => prompter.notify("Invalid choice, please select y, n, a, or s."),
        }
    }
}

/// Closed classification of a raw tool result, produced once at the
/// dispatch boundary and consumed by one exhaustive serializer.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Text(String),
    Structured(Value),
    Opaque(String),
}

impl ToolOutcome {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => ToolOutcome::Text(text),
            Value::Object(mut map) => {
                if let Some(output) = map.remove("output") {
                    return match output {
                        Value::String(text) => ToolOutcome::Text(text),
                        other => ToolOutcome::Structured(other),
                    };
                }
                if let Some(structured) = map.remove("structuredContent") {
                    return ToolOutcome::Structured(structured);
                }
                if let Some(text) = flatten_content_text(map.get("content")) {
                    return ToolOutcome::Text(text);
                }
                ToolOutcome::Structured(Value::Object(map))
            }
            Value::Array(items) => ToolOutcome::Structured(Value::Array(items)),
            other => ToolOutcome::Opaque(other.to_string()),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ToolOutcome::Text(text) => text,
            ToolOutcome::Structured(value) => {
                serde_json::to_string(&value).unwrap_or_else(|_| format!("{value}"))
            }
            ToolOutcome::Opaque(text) => text,
        }
    }
}

/// MCP call results carry a `content` array of typed blocks; the text
/// blocks are the human-readable output.
fn flatten_content_text(content: Option<&Value>) -> Option<String> {
    let items = content?.as_array()?;
    let texts: Vec<&str> = items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}

/// Total serialization of a raw tool result; never raises.
pub fn serialize_result(value: Value) -> String {
    ToolOutcome::from_value(value).into_text()
}

/// Structured error value delivered to the model in place of a result.
pub fn error_payload(message: &str) -> String {
    json!({"error": message}).to_string()
}

pub const SKIPPED_BY_USER: &str = "Tool execution skipped by user";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::prompter::ScriptedPrompter;

    #[test]
    fn malformed_arguments_degrade_to_empty_object() {
        assert!(parse_arguments(Some("{not json")).is_empty());
        assert!(parse_arguments(Some("[1,2]")).is_empty());
        assert!(parse_arguments(None).is_empty());
        let args = parse_arguments(Some("{\"q\":\"x\"}"));
        assert_eq!(args.get("q").and_then(Value::as_str), Some("x"));
    }

    #[test]
    fn serialization_is_total() {
        // Plain string: verbatim.
        assert_eq!(serialize_result(json!("done")), "done");
        // Mapping: encoded as-is.
        assert_eq!(serialize_result(json!({"result": "y"})), "{\"result\":\"y\"}");
        // Output-like field: unwrapped.
        assert_eq!(serialize_result(json!({"output": "y found"})), "y found");
        assert_eq!(
            serialize_result(json!({"output": {"rows": 3}})),
            "{\"rows\":3}"
        );
        // Structured content: unwrapped.
        assert_eq!(
            serialize_result(json!({"structuredContent": {"a": 1}, "content": []})),
            "{\"a\":1}"
        );
        // MCP content blocks: text flattened.
        assert_eq!(
            serialize_result(json!({
                "content": [
                    {"type": "text", "text": "first"},
                    {"type": "image", "data": "…"},
                    {"type": "text", "text": "second"}
                ]
            })),
            "first\nsecond"
        );
        // Anything else: generic encoding.
        assert_eq!(serialize_result(json!([1, 2, 3])), "[1,2,3]");
        assert_eq!(serialize_result(json!(42)), "42");
        assert_eq!(serialize_result(Value::Null), "null");
    }

    #[test]
    fn error_payload_is_structured() {
        assert_eq!(
            error_payload(SKIPPED_BY_USER),
            "{\"error\":\"Tool execution skipped by user\"}"
        );
    }

    #[tokio::test]
    async fn approval_reprompts_until_valid() {
        let mut prompter = ScriptedPrompter::new(["maybe", "s", "y"]);
        let args = parse_arguments(Some("{\"q\":\"x\"}"));
        let decision = request_approval(&mut prompter, "lookup", &args).await;
        assert_eq!(decision, ApprovalDecision::Approved);
        assert_eq!(prompter.notices.len(), 2);
        assert!(prompter.notices[1].contains("\"q\":\"x\""));
    }

    #[tokio::test]
    async fn approval_handles_each_choice() {
        for (input, expected) in [
            ("n", ApprovalDecision::Denied),
            ("A", ApprovalDecision::ApprovedAlways),
            ("Y", ApprovalDecision::Approved),
        ] {
            let mut prompter = ScriptedPrompter::new([input]);
            let decision = request_approval(&mut prompter, "lookup", &Map::new()).await;
            assert_eq!(decision, expected);
        }
    }

    #[tokio::test]
    async fn end_of_input_denies() {
        let mut prompter = ScriptedPrompter::new([]);
        let decision = request_approval(&mut prompter, "lookup", &Map::new()).await;
        assert_eq!(decision, ApprovalDecision::Denied);
    }
}
