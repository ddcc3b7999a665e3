//! Shared MCP transport abstractions.
//!
//! Implementations normalize protocol differences across stdio, streamable
//! HTTP, and legacy SSE so the session pool can treat every server as one
//! duplex channel with the same initialize / list / call surface.

use crate::core::config::data::ServerConfig;
use async_trait::async_trait;
use rust_mcp_schema::{InitializeRequestParams, InitializeResult, ListToolsResult};
use serde_json::{Map, Value};

pub mod http;
pub mod sse;
pub mod stdio;

pub const MCP_JSON_CONTENT_TYPE: &str = "application/json";
pub const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Supported MCP transport backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    StreamableHttp,
    Sse,
}

impl TransportKind {
    /// Resolves the transport kind from config, defaulting to streamable
    /// HTTP. An unrecognized kind is an error the connect pass downgrades
    /// to a skip-with-warning.
    pub fn from_config(config: &ServerConfig) -> Result<Self, String> {
        let transport = config
            .transport
            .as_deref()
            .unwrap_or("streamable-http")
            .to_ascii_lowercase();
        match transport.as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "http" | "streamable" | "streamable-http" | "streamable_http" | "stream" => {
                Ok(TransportKind::StreamableHttp)
            }
            "sse" => Ok(TransportKind::Sse),
            other => Err(format!("Unsupported MCP transport: {}", other)),
        }
    }
}

/// Contract for one established duplex channel to a tool server.
///
/// Object-safe so sessions can be driven by scripted fakes in tests.
#[async_trait]
pub trait Transport: Send {
    async fn initialize(
        &mut self,
        params: InitializeRequestParams,
    ) -> Result<InitializeResult, String>;

    async fn list_tools(&mut self) -> Result<ListToolsResult, String>;

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Value, String>;

    /// Releases the channel's resources. Must be safe to call twice.
    async fn close(&mut self);
}

pub fn require_url(config: &ServerConfig) -> Result<String, String> {
    config
        .url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| "MCP url is required for HTTP transports.".to_string())
}

pub fn require_command(config: &ServerConfig) -> Result<String, String> {
    config
        .command
        .clone()
        .filter(|command| !command.trim().is_empty())
        .ok_or_else(|| "MCP command is required for stdio transport.".to_string())
}

/// Accumulates SSE byte chunks and yields complete, trimmed lines even when
/// chunk boundaries split a line.
#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = self.buffer[search_index..].iter().position(|b| *b == b'\n')
        {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }

            let line_bytes = &self.buffer[search_index..line_end];
            if let Ok(text) = std::str::from_utf8(line_bytes) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }

            search_index = newline_index + 1;
        }

        if flush {
            if let Ok(text) = std::str::from_utf8(&self.buffer[search_index..]) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

pub fn sse_event_name(line: &str) -> Option<&str> {
    line.strip_prefix("event:").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(transport: Option<&str>) -> ServerConfig {
        ServerConfig {
            name: "alpha".to_string(),
            transport: transport.map(str::to_string),
            command: None,
            args: Vec::new(),
            env: None,
            url: None,
            headers: None,
        }
    }

    #[test]
    fn transport_kind_parses_known_aliases() {
        assert_eq!(
            TransportKind::from_config(&config(Some("stdio"))).unwrap(),
            TransportKind::Stdio
        );
        for alias in ["http", "streamable", "streamable-http", "streamable_http", "stream"] {
            assert_eq!(
                TransportKind::from_config(&config(Some(alias))).unwrap(),
                TransportKind::StreamableHttp
            );
        }
        assert_eq!(
            TransportKind::from_config(&config(Some("SSE"))).unwrap(),
            TransportKind::Sse
        );
    }

    #[test]
    fn transport_kind_defaults_to_streamable_http() {
        assert_eq!(
            TransportKind::from_config(&config(None)).unwrap(),
            TransportKind::StreamableHttp
        );
    }

    #[test]
    fn transport_kind_rejects_unknown() {
        assert!(TransportKind::from_config(&config(Some("carrier-pigeon"))).is_err());
    }

    #[test]
    fn sse_line_buffer_handles_chunk_boundaries() {
        let mut buffer = SseLineBuffer::default();
        assert_eq!(buffer.push(b"data: one\n\n"), vec!["data: one"]);
        assert_eq!(buffer.push(b"data: t"), Vec::<String>::new());
        assert_eq!(buffer.push(b"wo\n"), vec!["data: two"]);
        assert_eq!(buffer.finish(), Vec::<String>::new());
    }

    #[test]
    fn detects_event_stream_content_type() {
        assert!(is_event_stream_content_type(
            "text/event-stream; charset=utf-8"
        ));
        assert!(!is_event_stream_content_type("application/json"));
    }

    #[test]
    fn extracts_sse_fields() {
        assert_eq!(sse_data_payload("data: {\"id\":1}"), Some("{\"id\":1}"));
        assert_eq!(sse_data_payload("event: ping"), None);
        assert_eq!(sse_event_name("event: endpoint"), Some("endpoint"));
    }
}
