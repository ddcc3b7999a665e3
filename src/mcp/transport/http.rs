//! Streamable-HTTP transport: JSON-RPC requests are POSTed to the server
//! URL; replies come back as a JSON body or as the first response message
//! on a short-lived event stream.

use super::{
    is_event_stream_content_type, require_url, sse_data_payload, SseLineBuffer, Transport,
    MCP_JSON_AND_SSE_ACCEPT, MCP_JSON_CONTENT_TYPE, MCP_PROTOCOL_VERSION_HEADER,
    MCP_SESSION_ID_HEADER,
};
use crate::core::config::data::ServerConfig;
use crate::mcp::protocol;
use async_trait::async_trait;
use futures_util::StreamExt;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{
    CallToolRequestParams, InitializeRequestParams, InitializeResult, ListToolsResult, RequestId,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const HTTP_REQUEST_TIMEOUT_SECONDS: u64 = 60;

pub(crate) fn build_http_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECONDS))
        .build()
        .map_err(|err| err.to_string())
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    session_id: Option<String>,
    negotiated_protocol_version: Option<String>,
    next_request_id: i64,
}

impl HttpTransport {
    pub fn connect(config: &ServerConfig) -> Result<Self, String> {
        let url = require_url(config)?;
        let client =
            build_http_client().map_err(|err| format!("Failed to build HTTP client: {err}"))?;
        Ok(Self {
            client,
            url,
            headers: config.headers.clone().unwrap_or_default(),
            session_id: None,
            negotiated_protocol_version: None,
            next_request_id: 0,
        })
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.saturating_add(1);
        RequestId::Integer(id)
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request = request
            .header("Content-Type", MCP_JSON_CONTENT_TYPE)
            .header("Accept", MCP_JSON_AND_SSE_ACCEPT);
        if let Some(version) = self
            .negotiated_protocol_version
            .as_deref()
            .filter(|version| !version.trim().is_empty())
        {
            request = request.header(MCP_PROTOCOL_VERSION_HEADER, version);
        }
        if let Some(session_id) = &self.session_id {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        request
    }

    async fn send_message(&mut self, message: ClientMessage) -> Result<ServerMessage, String> {
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;
        debug!(url = %self.url, "Sending MCP HTTP request");
        let request = self.apply_headers(self.client.post(&self.url)).body(payload);

        let response = request.send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        let session_id = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        let server_message = if is_event_stream_content_type(&content_type) {
            next_sse_server_message(response).await?
        } else {
            let body = response.bytes().await.map_err(|err| err.to_string())?;
            serde_json::from_slice::<ServerMessage>(&body).map_err(|err| err.to_string())?
        };

        if let Some(session_id) = session_id {
            self.session_id = Some(session_id);
        }
        Ok(server_message)
    }

    async fn send_request(&mut self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id();
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id),
        )
        .map_err(|err| err.to_string())?;
        self.send_message(message).await
    }

    async fn send_notification(
        &mut self,
        notification: NotificationFromClient,
    ) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;
        let request = self.apply_headers(self.client.post(&self.url)).body(payload);
        let response = request.send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }
        if let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            self.session_id = Some(session_id.to_string());
        }
        Ok(())
    }
}

/// Reads an SSE response body until the first response or error message.
async fn next_sse_server_message(response: reqwest::Response) -> Result<ServerMessage, String> {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| err.to_string())?;
        for line in buffer.push(&chunk) {
            if let Some(message) = decode_sse_line(&line)? {
                return Ok(message);
            }
        }
    }

    for line in buffer.finish() {
        if let Some(message) = decode_sse_line(&line)? {
            return Ok(message);
        }
    }

    Err("Empty event-stream response.".to_string())
}

fn decode_sse_line(line: &str) -> Result<Option<ServerMessage>, String> {
    let Some(payload) = sse_data_payload(line) else {
        return Ok(None);
    };
    if payload.is_empty() {
        return Ok(None);
    }
    let message = serde_json::from_str::<ServerMessage>(payload).map_err(|err| err.to_string())?;
    if matches!(
        message,
        ServerMessage::Response(_) | ServerMessage::Error(_)
    ) {
        Ok(Some(message))
    } else {
        Ok(None)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn initialize(
        &mut self,
        params: InitializeRequestParams,
    ) -> Result<InitializeResult, String> {
        let response = self
            .send_request(RequestFromClient::InitializeRequest(params))
            .await?;
        let result = protocol::parse_initialize_result(response)?;
        self.negotiated_protocol_version = Some(result.protocol_version.clone());
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
        self.session_id = None;
    }
}
