//! Session pool and tool registry.
//!
//! The pool owns every open MCP channel. Tools discovered across servers
//! share one namespace; the first session to register a name keeps it, and
//! later duplicates stay visible only in their own server's catalogue.

use crate::core::config::data::ServerConfig;
use crate::mcp::protocol;
use crate::mcp::transport::http::HttpTransport;
use crate::mcp::transport::sse::SseTransport;
use crate::mcp::transport::stdio::StdioTransport;
use crate::mcp::transport::{Transport, TransportKind};
use rust_mcp_schema::Tool;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub type SessionId = u64;

/// One established channel to a tool server, with its own tool catalogue as
/// the server reported it (duplicates included).
pub struct Session {
    id: SessionId,
    server_name: String,
    transport: Box<dyn Transport>,
    tools: Vec<Tool>,
}

/// A tool schema offered to the model, back-referencing its owning session.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub session: SessionId,
    pub server: String,
}

fn default_parameter_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolDefinition {
    fn from_tool(tool: &Tool, session: SessionId, server: &str) -> Self {
        let parameters = serde_json::to_value(&tool.input_schema)
            .ok()
            .filter(|value| value.is_object())
            .unwrap_or_else(default_parameter_schema);
        Self {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            parameters,
            session,
            server: server.to_string(),
        }
    }
}

#[derive(Default)]
pub struct SessionPool {
    descriptors: Vec<ServerConfig>,
    sessions: Vec<Session>,
    tool_to_session: HashMap<String, SessionId>,
    function_defs: Vec<ToolDefinition>,
    next_session_id: SessionId,
}

impl SessionPool {
    pub fn new(descriptors: Vec<ServerConfig>) -> Self {
        Self {
            descriptors,
            ..Self::default()
        }
    }

    /// Attempts to connect every configured server in order. A failure is
    /// contained at that server's boundary: it is logged and the remaining
    /// servers still connect.
    pub async fn connect_all(&mut self) {
        let descriptors = self.descriptors.clone();
        for config in descriptors {
            let kind = match TransportKind::from_config(&config) {
                Ok(kind) => kind,
                Err(err) => {
                    warn!(server = %config.name, %err, "Skipping server");
                    continue;
                }
            };
            info!(server = %config.name, transport = ?kind, "Connecting to MCP server");
            match self.connect_one(&config, kind).await {
                Ok(count) => {
                    info!(server = %config.name, tools = count, "Connected to MCP server");
                }
                Err(err) => {
                    warn!(server = %config.name, error = %err, "Connection failed");
                }
            }
        }
    }

    async fn connect_one(
        &mut self,
        config: &ServerConfig,
        kind: TransportKind,
    ) -> Result<usize, String> {
        let transport: Box<dyn Transport> = match kind {
            TransportKind::Stdio => Box::new(StdioTransport::connect(config).await?),
            TransportKind::StreamableHttp => Box::new(HttpTransport::connect(config)?),
            TransportKind::Sse => Box::new(SseTransport::connect(config).await?),
        };
        self.install(config.name.clone(), transport).await
    }

    /// Performs the initialize handshake, fetches the tool catalogue, and
    /// registers the resulting session. Returns the number of tools the
    /// server reported, duplicates included.
    pub async fn install(
        &mut self,
        server_name: String,
        mut transport: Box<dyn Transport>,
    ) -> Result<usize, String> {
        if let Err(err) = transport.initialize(protocol::client_details()).await {
            transport.close().await;
            return Err(err);
        }
        let list = match transport.list_tools().await {
            Ok(list) => list,
            Err(err) => {
                transport.close().await;
                return Err(err);
            }
        };

        let id = self.next_session_id;
        self.next_session_id += 1;
        let session = Session {
            id,
            server_name,
            transport,
            tools: list.tools,
        };
        Ok(self.register_session(session))
    }

    /// First-registration-wins: a tool name already present keeps its
    /// existing mapping and the newcomer is dropped from dispatch.
    fn register_session(&mut self, session: Session) -> usize {
        let discovered = session.tools.len();
        for tool in &session.tools {
            if self.tool_to_session.contains_key(&tool.name) {
                debug!(
                    tool = %tool.name,
                    server = %session.server_name,
                    "Tool name already registered; keeping first registration"
                );
                continue;
            }
            self.tool_to_session.insert(tool.name.clone(), session.id);
            self.function_defs.push(ToolDefinition::from_tool(
                tool,
                session.id,
                &session.server_name,
            ));
        }
        self.sessions.push(session);
        discovered
    }

    /// Releases every open session, most recent first. Safe to call when
    /// nothing is open.
    pub async fn teardown(&mut self) {
        while let Some(mut session) = self.sessions.pop() {
            debug!(server = %session.server_name, "Closing MCP session");
            session.transport.close().await;
        }
        self.tool_to_session.clear();
        self.function_defs.clear();
    }

    /// Tears down all sessions, swaps in a new descriptor set, and
    /// reconnects. No stale tool name survives into the new registry.
    pub async fn full_reconnect(&mut self, descriptors: Vec<ServerConfig>) {
        self.teardown().await;
        self.descriptors = descriptors;
        self.connect_all().await;
    }

    /// Forwards a tool call to its owning session. The caller converts any
    /// failure into a non-fatal in-conversation error.
    pub async fn dispatch(
        &mut self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Value, String> {
        let not_registered = || format!("Tool '{}' is not registered", name);
        let session_id = *self.tool_to_session.get(name).ok_or_else(not_registered)?;
        let session = self
            .sessions
            .iter_mut()
            .find(|session| session.id == session_id)
            .ok_or_else(not_registered)?;
        session.transport.call_tool(name, arguments).await
    }

    pub fn function_defs(&self) -> &[ToolDefinition] {
        &self.function_defs
    }

    /// Owning server of a dispatchable tool name.
    pub fn tool_server(&self, tool_name: &str) -> Option<&str> {
        let session_id = *self.tool_to_session.get(tool_name)?;
        self.sessions
            .iter()
            .find(|session| session.id == session_id)
            .map(|session| session.server_name.as_str())
    }

    pub fn has_server(&self, server_name: &str) -> bool {
        self.sessions
            .iter()
            .any(|session| session.server_name == server_name)
    }

    pub fn server_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for session in &self.sessions {
            if !names.contains(&session.server_name.as_str()) {
                names.push(session.server_name.as_str());
            }
        }
        names
    }

    /// Tools as reported by the named server's own sessions — this includes
    /// names that lost the registry race and are not dispatchable.
    pub fn tools_for_server(&self, server_name: &str) -> Vec<&Tool> {
        self.sessions
            .iter()
            .filter(|session| session.server_name == server_name)
            .flat_map(|session| session.tools.iter())
            .collect()
    }
}
