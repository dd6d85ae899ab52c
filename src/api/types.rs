use serde::{Deserialize, Serialize};
use serde_json::Value;

//
// JSON-RPC 2.0 envelope
//

#[derive(Serialize, Debug)]
pub struct RpcRequest<'a, P: Serialize> {
    pub jsonrpc: &'static str,
    /// Absent for notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

#[derive(Deserialize, Debug)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[derive(Deserialize, Debug)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

//
// MCP
//

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: &'static str,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

#[derive(Serialize, Debug)]
pub struct ClientInfo {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Serialize, Debug)]
pub struct ToolCallParams<'a, A: Serialize> {
    pub name: &'a str,
    pub arguments: A,
}

#[derive(Deserialize, Debug)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

//
// Agent Zero tools
//

#[derive(Serialize, Debug)]
pub struct SendMessageArg<'a> {
    pub message: &'a str,
    /// Always null; attachments aren't supported by this client.
    pub attachments: Option<Vec<String>>,
    pub chat_id: Option<&'a str>,
    pub persistent_chat: bool,
}

#[derive(Serialize, Debug)]
pub struct FinishChatArg<'a> {
    pub chat_id: &'a str,
}

/// The JSON document Agent Zero returns as the text of a `send_message` result.
#[derive(Deserialize, Debug)]
pub struct SendMessageResult {
    pub status: Option<String>,
    pub response: Option<String>,
    pub chat_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReplyStatus {
    Success,
    Error,
    Unknown,
}

impl ReplyStatus {
    pub fn from_status(status: Option<&str>) -> ReplyStatus {
        match status {
            Some("success") => ReplyStatus::Success,
            Some("error") => ReplyStatus::Error,
            _ => ReplyStatus::Unknown,
        }
    }
}

/// One completed exchange with the assistant.
#[derive(Clone, Debug, PartialEq)]
pub struct Exchange {
    pub status: ReplyStatus,
    pub reply: String,
    /// The chat id the server reported, if it reported one.
    pub chat_id: Option<String>,
}
