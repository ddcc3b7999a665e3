use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One configured MCP server, normalized from any of the accepted on-disk
/// shapes. Immutable once loaded; a `tools reset` replaces the whole list.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub transport: Option<String>,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub env: Option<HashMap<String, String>>,
    pub url: Option<String>,
    pub headers: Option<HashMap<String, String>>,
}

/// Connection settings for the chat-completion deployment.
///
/// The sampling fields are kept as raw JSON values: users hand-edit this
/// file, and a value that does not coerce to the right numeric type is
/// silently left out of requests rather than failing the session.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub deployment: String,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<Value>,
    pub temperature: Option<Value>,
    pub top_p: Option<Value>,
}

fn value_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl LlmConfig {
    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens.as_ref().and_then(value_as_u32)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature.as_ref().and_then(value_as_f64)
    }

    pub fn top_p(&self) -> Option<f64> {
        self.top_p.as_ref().and_then(value_as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_sampling_values_coerce() {
        let cfg = LlmConfig {
            max_tokens: Some(json!(512)),
            temperature: Some(json!("0.7")),
            top_p: Some(json!(0.9)),
            ..LlmConfig::default()
        };
        assert_eq!(cfg.max_tokens(), Some(512));
        assert_eq!(cfg.temperature(), Some(0.7));
        assert_eq!(cfg.top_p(), Some(0.9));
    }

    #[test]
    fn unconvertible_sampling_values_are_omitted() {
        let cfg = LlmConfig {
            max_tokens: Some(json!("lots")),
            temperature: Some(json!([1, 2])),
            top_p: None,
            ..LlmConfig::default()
        };
        assert_eq!(cfg.max_tokens(), None);
        assert_eq!(cfg.temperature(), None);
        assert_eq!(cfg.top_p(), None);
    }
}
