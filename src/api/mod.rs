use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod client;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    /// Originating tool name; present only on function-role messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            name: None,
        }
    }

    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "function".to_string(),
            content: content.into(),
            name: Some(name.into()),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionSchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,
}

#[derive(Serialize, Debug, Clone)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Deserialize, Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Option<String>,
}

/// The first choice's message from a completion response.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    pub message: AssistantReply,
}

#[derive(Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatResponseChoice>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn function_messages_carry_the_tool_name() {
        let msg = ChatMessage::function("lookup", "{\"result\":\"y\"}");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "function");
        assert_eq!(value["name"], "lookup");
    }

    #[test]
    fn optional_request_fields_are_omitted() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            max_tokens: None,
            temperature: Some(0.2),
            top_p: None,
            functions: None,
            function_call: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        let object = value.as_object().unwrap();
        assert!(object.contains_key("temperature"));
        assert!(!object.contains_key("max_tokens"));
        assert!(!object.contains_key("functions"));
        assert!(!object.contains_key("function_call"));
    }

    #[test]
    fn response_parses_a_tool_call() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "function_call": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}
                }
            }]
        }))
        .unwrap();
        let reply = &response.choices[0].message;
        assert!(reply.content.is_none());
        assert_eq!(reply.function_call.as_ref().unwrap().name, "lookup");
    }
}
