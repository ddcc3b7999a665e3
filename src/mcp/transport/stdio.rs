//! Subprocess transport: spawns the configured command and speaks
//! line-delimited JSON-RPC over its stdin/stdout pipes.

use super::{require_command, Transport};
use crate::core::config::data::ServerConfig;
use crate::mcp::protocol;
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{
    CallToolRequestParams, InitializeRequestParams, InitializeResult, ListToolsResult, RequestId,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

const STDIO_REQUEST_TIMEOUT_SECONDS: u64 = 60;
const STDIO_WRITE_TIMEOUT_SECONDS: u64 = 10;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

pub struct StdioTransport {
    child: Option<Child>,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    next_request_id: AtomicI64,
    server_name: String,
}

impl StdioTransport {
    pub async fn connect(config: &ServerConfig) -> Result<Self, String> {
        let command = require_command(config)?;
        debug!(command = %command, args = ?config.args, "Starting MCP stdio server");
        let mut cmd = Command::new(command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        if let Some(env) = &config.env {
            cmd.envs(env);
        }

        let mut child = cmd.spawn().map_err(|err| err.to_string())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "Unable to retrieve stdin.".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Unable to retrieve stdout.".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Unable to retrieve stderr.".to_string())?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        Self::spawn_stdout_reader(pending.clone(), stdout, config.name.clone());
        Self::spawn_stderr_drain(stderr);

        Ok(Self {
            child: Some(child),
            stdin: Mutex::new(stdin),
            pending,
            next_request_id: AtomicI64::new(0),
            server_name: config.name.clone(),
        })
    }

    fn spawn_stdout_reader(
        pending: PendingMap,
        stdout: tokio::process::ChildStdout,
        server_name: String,
    ) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let value = match serde_json::from_str::<Value>(&line) {
                    Ok(value) => value,
                    Err(_) => continue,
                };
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Ok(message) = serde_json::from_value::<ServerMessage>(item.clone()) {
                            Self::dispatch_message(&pending, message, &server_name).await;
                        }
                    }
                } else if let Ok(message) = serde_json::from_value::<ServerMessage>(value) {
                    Self::dispatch_message(&pending, message, &server_name).await;
                }
            }
        });
    }

    fn spawn_stderr_drain(stderr: tokio::process::ChildStderr) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(_)) = reader.next_line().await {}
        });
    }

    async fn dispatch_message(pending: &PendingMap, message: ServerMessage, server_name: &str) {
        match &message {
            ServerMessage::Response(response) => {
                debug!(
                    server = %server_name,
                    response_id = ?response.id,
                    "Received MCP stdio response"
                );
                if let Some(tx) = pending.lock().await.remove(&response.id) {
                    let _ = tx.send(message);
                }
            }
            ServerMessage::Error(error) => {
                debug!(
                    server = %server_name,
                    error_code = error.error.code,
                    "Received MCP stdio error"
                );
                if let Some(id) = error.id.as_ref() {
                    if let Some(tx) = pending.lock().await.remove(id) {
                        let _ = tx.send(message);
                    }
                }
            }
            ServerMessage::Request(_) | ServerMessage::Notification(_) => {
                debug!(server = %server_name, "Ignoring unsolicited MCP stdio message");
            }
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn write_payload(&self, payload: &str) -> Result<(), String> {
        let write_timeout = tokio::time::Duration::from_secs(STDIO_WRITE_TIMEOUT_SECONDS);
        let mut stdin = match tokio::time::timeout(write_timeout, self.stdin.lock()).await {
            Ok(stdin) => stdin,
            Err(_) => return Err("Timed out waiting for MCP stdio stdin lock.".to_string()),
        };
        tokio::time::timeout(write_timeout, stdin.write_all(payload.as_bytes()))
            .await
            .map_err(|_| "Timed out writing MCP stdio request.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(write_timeout, stdin.write_all(b"\n"))
            .await
            .map_err(|_| "Timed out writing MCP stdio request newline.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(write_timeout, stdin.flush())
            .await
            .map_err(|_| "Timed out flushing MCP stdio request.".to_string())?
            .map_err(|err| err.to_string())?;
        Ok(())
    }

    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id();
        debug!(server = %self.server_name, request_id = ?request_id, "Sending MCP stdio request");
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request_id.clone(), tx);
        }

        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;
        if let Err(err) = self.write_payload(&payload).await {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        let timeout = tokio::time::Duration::from_secs(STDIO_REQUEST_TIMEOUT_SECONDS);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err("MCP stdio response channel closed.".to_string()),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err("MCP stdio request timed out.".to_string())
            }
        }
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;
        self.write_payload(&payload).await
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn initialize(
        &mut self,
        params: InitializeRequestParams,
    ) -> Result<InitializeResult, String> {
        let response = self
            .send_request(RequestFromClient::InitializeRequest(params))
            .await?;
        let result = protocol::parse_initialize_result(response)?;
        self.send_notification(NotificationFromClient::InitializedNotification(None))
            .await?;
        Ok(result)
    }

    async fn list_tools(&mut self) -> Result<ListToolsResult, String> {
        let response = self
            .send_request(RequestFromClient::ListToolsRequest(None))
            .await?;
        protocol::parse_list_tools(response)
    }

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Value, String> {
        let mut params = CallToolRequestParams::new(name);
        if let Some(arguments) = arguments {
            params = params.with_arguments(arguments);
        }
        let response = self
            .send_request(RequestFromClient::CallToolRequest(params))
            .await?;
        protocol::parse_response_value(response)
    }

    async fn close(&mut self) {
        self.pending.lock().await.clear();
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}
