use reqwest::{
    Client, StatusCode,
    header::{self, HeaderValue},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::ChatBackend;
use super::types::{
    ClientInfo, Exchange, FinishChatArg, InitializeParams, ReplyStatus, RpcRequest, RpcResponse,
    SendMessageArg, SendMessageResult, ToolCallParams, ToolCallResult, ToolContent,
};

const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
const MCP_SESSION_HEADER: &str = "mcp-session-id";
const USER_AGENT: &str = concat!("agent-zero-cli/", env!("CARGO_PKG_VERSION"));
/// Longest slice of an error body quoted back to the user.
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status {status}{body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("remote error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("tool `{tool}` failed: {message}")]
    ToolFailed { tool: String, message: String },
    #[error("request interrupted")]
    Interrupted,
}

/// Talks to an Agent Zero MCP endpoint over MCP's streamable-HTTP transport.
///
/// The MCP handshake happens lazily on the first tool call. The server's
/// session header, if it sends one, is echoed on every later request.
#[derive(Debug, Clone)]
pub struct AgentZeroClient {
    base_url: String,
    client: Client,
    /// Passed to `send_message`; Agent Zero keeps persistent chats alive
    /// until `finish_chat`.
    persistent_chat: bool,
    mcp_session_id: Option<String>,
    initialized: bool,
    next_request_id: u64,
}

impl AgentZeroClient {
    pub fn new(base_url: &str, persistent_chat: bool) -> Self {
        // Replies can take minutes, so only connecting is time-limited.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!("connect timeout disabled, HTTP client setup failed: {}", e);
                Client::new()
            });
        AgentZeroClient {
            base_url: base_url.to_string(),
            client,
            persistent_chat,
            mcp_session_id: None,
            initialized: false,
            next_request_id: 0,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize>(&self, body: &T) -> Result<reqwest::Response, TransportError> {
        let mut request = self
            .client
            .post(&self.base_url)
            .json(body)
            .header(header::USER_AGENT, HeaderValue::from_static(USER_AGENT))
            .header(
                header::ACCEPT,
                HeaderValue::from_static("application/json, text/event-stream"),
            );
        if let Some(ref session_id) = self.mcp_session_id {
            request = request.header(MCP_SESSION_HEADER, session_id.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status,
                body: quote_error_body(&body),
            });
        }
        Ok(response)
    }

    /// Generic JSON-RPC request: the result is deserialized into `R`.
    async fn rpc_request<P, R>(&mut self, method: &str, params: P) -> Result<R, TransportError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.next_request_id += 1;
        let id = self.next_request_id;
        debug!("rpc request: method={} id={}", method, id);

        let response = self
            .post(&RpcRequest {
                jsonrpc: "2.0",
                id: Some(id),
                method,
                params: Some(params),
            })
            .await?;

        if let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            self.mcp_session_id = Some(session_id.to_string());
        }
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await?;

        let result = rpc_result(parse_rpc_body(&content_type, &body, id)?)?;
        serde_json::from_value(result)
            .map_err(|e| TransportError::Malformed(format!("{} result: {}", method, e)))
    }

    async fn rpc_notify(&mut self, method: &str) -> Result<(), TransportError> {
        debug!("rpc notify: method={}", method);
        self.post(&RpcRequest::<Value> {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        })
        .await?;
        Ok(())
    }

    async fn ensure_initialized(&mut self) -> Result<(), TransportError> {
        if self.initialized {
            return Ok(());
        }
        let server_info: Value = self
            .rpc_request(
                "initialize",
                InitializeParams {
                    protocol_version: MCP_PROTOCOL_VERSION,
                    capabilities: serde_json::json!({}),
                    client_info: ClientInfo {
                        name: env!("CARGO_PKG_NAME"),
                        version: env!("CARGO_PKG_VERSION"),
                    },
                },
            )
            .await?;
        debug!("initialized: {}", server_info);
        self.rpc_notify("notifications/initialized").await?;
        self.initialized = true;
        Ok(())
    }

    async fn call_tool<A: Serialize>(
        &mut self,
        name: &str,
        arguments: A,
    ) -> Result<ToolCallResult, TransportError> {
        self.ensure_initialized().await?;
        self.rpc_request("tools/call", ToolCallParams { name, arguments })
            .await
    }
}

impl ChatBackend for AgentZeroClient {
    async fn send_message(
        &mut self,
        message: &str,
        chat_id: Option<&str>,
    ) -> Result<Exchange, TransportError> {
        let persistent_chat = self.persistent_chat;
        let result = self
            .call_tool(
                "send_message",
                SendMessageArg {
                    message,
                    attachments: None,
                    chat_id,
                    persistent_chat,
                },
            )
            .await?;
        exchange_from_tool_result(result)
    }

    async fn finish_chat(&mut self, chat_id: &str) -> Result<(), TransportError> {
        let result = self
            .call_tool("finish_chat", FinishChatArg { chat_id })
            .await?;
        if result.is_error {
            return Err(TransportError::ToolFailed {
                tool: "finish_chat".to_string(),
                message: first_text(result.content).unwrap_or_default(),
            });
        }
        Ok(())
    }
}

// --

fn quote_error_body(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return String::new();
    }
    let mut quoted: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if quoted.len() < body.len() {
        quoted.push_str("...");
    }
    format!(": {}", quoted)
}

/// Extracts the JSON-RPC response with the given `id` from a response body,
/// which is either a single JSON document or a server-sent event stream.
pub fn parse_rpc_body(content_type: &str, body: &str, id: u64) -> Result<RpcResponse, TransportError> {
    if content_type.starts_with("text/event-stream") {
        for data in sse_data_payloads(body) {
            let message = serde_json::from_str::<RpcResponse>(&data)
                .map_err(|e| TransportError::Malformed(format!("bad event data: {}", e)))?;
            // Servers may interleave notifications ahead of the response.
            if message.id.as_ref().and_then(Value::as_u64) == Some(id) {
                return Ok(message);
            }
        }
        Err(TransportError::Malformed(
            "event stream ended without a response".to_string(),
        ))
    } else {
        serde_json::from_str(body).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

/// The `data:` payload of each event in an SSE body. Multi-line payloads are
/// joined with newlines.
fn sse_data_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            if !current.is_empty() {
                payloads.push(current.join("\n"));
                current.clear();
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        payloads.push(current.join("\n"));
    }
    payloads
}

fn rpc_result(response: RpcResponse) -> Result<Value, TransportError> {
    if let Some(error) = response.error {
        return Err(TransportError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    response.result.ok_or_else(|| {
        TransportError::Malformed("response has neither result nor error".to_string())
    })
}

fn first_text(content: Vec<ToolContent>) -> Option<String> {
    content.into_iter().find_map(|item| match item {
        ToolContent::Text { text } => Some(text),
        ToolContent::Other => None,
    })
}

/// Agent Zero answers `send_message` with a JSON document (status, response,
/// chat_id) serialized as text. Anything else is shown to the user verbatim.
pub fn exchange_from_tool_result(result: ToolCallResult) -> Result<Exchange, TransportError> {
    let is_error = result.is_error;
    let text = first_text(result.content).ok_or_else(|| {
        TransportError::Malformed("send_message result has no text content".to_string())
    })?;

    match serde_json::from_str::<SendMessageResult>(&text) {
        Ok(parsed) => {
            let status = match parsed.status.as_deref() {
                None if is_error => ReplyStatus::Error,
                status => ReplyStatus::from_status(status),
            };
            let reply = match parsed.response {
                Some(response) if !response.is_empty() => response,
                // No response field: show the whole document.
                _ => serde_json::from_str::<Value>(&text)
                    .ok()
                    .and_then(|value| serde_json::to_string_pretty(&value).ok())
                    .unwrap_or(text),
            };
            Ok(Exchange {
                status,
                reply,
                chat_id: parsed.chat_id.filter(|chat_id| !chat_id.is_empty()),
            })
        }
        Err(_) => Ok(Exchange {
            status: if is_error {
                ReplyStatus::Error
            } else {
                ReplyStatus::Unknown
            },
            reply: text,
            chat_id: None,
        }),
    }
}
