//! Legacy HTTP+SSE transport: a long-lived GET stream carries server
//! messages; the stream's first `endpoint` event names the URL requests are
//! POSTed back to.

use super::{
    require_url, sse_data_payload, sse_event_name, SseLineBuffer, Transport,
    MCP_JSON_CONTENT_TYPE,
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
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

const SSE_ENDPOINT_TIMEOUT_SECONDS: u64 = 10;
const SSE_REQUEST_TIMEOUT_SECONDS: u64 = 60;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HashMap<String, String>,
    pending: PendingMap,
    next_request_id: AtomicI64,
    reader: Option<JoinHandle<()>>,
}

impl SseTransport {
    pub async fn connect(config: &ServerConfig) -> Result<Self, String> {
        let url = require_url(config)?;
        let client = super::http::build_http_client()
            .map_err(|err| format!("Failed to build HTTP client: {err}"))?;

        let mut request = client.get(&url).header("Accept", "text/event-stream");
        if let Some(headers) = &config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }
        let response = request.send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = Self::spawn_stream_reader(
            response,
            url.clone(),
            pending.clone(),
            endpoint_tx,
            config.name.clone(),
        );

        let timeout = tokio::time::Duration::from_secs(SSE_ENDPOINT_TIMEOUT_SECONDS);
        let endpoint = match tokio::time::timeout(timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err("SSE stream closed before announcing an endpoint.".to_string());
            }
            Err(_) => {
                reader.abort();
                return Err("Timed out waiting for the SSE endpoint event.".to_string());
            }
        };

        Ok(Self {
            client,
            endpoint,
            headers: config.headers.clone().unwrap_or_default(),
            pending,
            next_request_id: AtomicI64::new(0),
            reader: Some(reader),
        })
    }

    fn spawn_stream_reader(
        response: reqwest::Response,
        base_url: String,
        pending: PendingMap,
        endpoint_tx: oneshot::Sender<String>,
        server_name: String,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = SseLineBuffer::default();
            let mut current_event: Option<String> = None;
            let mut endpoint_tx = Some(endpoint_tx);

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(_) => break,
                };
                for line in buffer.push(&chunk) {
                    if let Some(event) = sse_event_name(&line) {
                        current_event = Some(event.to_string());
                        continue;
                    }
                    let Some(payload) = sse_data_payload(&line) else {
                        continue;
                    };
                    if payload.is_empty() {
                        continue;
                    }
                    if current_event.as_deref() == Some("endpoint") {
                        current_event = None;
                        if let Some(tx) = endpoint_tx.take() {
                            if let Some(endpoint) = resolve_endpoint(&base_url, payload) {
                                let _ = tx.send(endpoint);
                            }
                        }
                        continue;
                    }
                    current_event = None;
                    if let Ok(message) = serde_json::from_str::<ServerMessage>(payload) {
                        Self::dispatch_message(&pending, message, &server_name).await;
                    }
                }
            }
            pending.lock().await.clear();
        })
    }

    async fn dispatch_message(pending: &PendingMap, message: ServerMessage, server_name: &str) {
        match &message {
            ServerMessage::Response(response) => {
                debug!(server = %server_name, response_id = ?response.id, "Received MCP SSE response");
                if let Some(tx) = pending.lock().await.remove(&response.id) {
                    let _ = tx.send(message);
                }
            }
            ServerMessage::Error(error) => {
                debug!(server = %server_name, error_code = error.error.code, "Received MCP SSE error");
                if let Some(id) = error.id.as_ref() {
                    if let Some(tx) = pending.lock().await.remove(id) {
                        let _ = tx.send(message);
                    }
                }
            }
            ServerMessage::Request(_) | ServerMessage::Notification(_) => {
                debug!(server = %server_name, "Ignoring unsolicited MCP SSE message");
            }
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn post_message(&self, message: &ClientMessage) -> Result<(), String> {
        let payload = serde_json::to_string(message).map_err(|err| err.to_string())?;
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", MCP_JSON_CONTENT_TYPE)
            .body(payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        let response = request.send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }
        Ok(())
    }

    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id();
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

        if let Err(err) = self.post_message(&message).await {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        let timeout = tokio::time::Duration::from_secs(SSE_REQUEST_TIMEOUT_SECONDS);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err("MCP SSE stream closed.".to_string()),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err("MCP SSE request timed out.".to_string())
            }
        }
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        self.post_message(&message).await
    }
}

/// The endpoint event may carry an absolute URL or a path relative to the
/// stream URL.
fn resolve_endpoint(base_url: &str, payload: &str) -> Option<String> {
    reqwest::Url::parse(base_url)
        .ok()?
        .join(payload)
        .ok()
        .map(|url| url.to_string())
}

#[async_trait]
impl Transport for SseTransport {
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
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.pending.lock().await.clear();
    }
}
