//! Wire types for the language server conversation
//!
//! Provides the error type, capability tracking, and the wire shapes the
//! language server may answer with. Reply shapes that vary between servers
//! are modelled as untagged unions and normalized before any further logic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything that can go wrong between the bridge and the server
#[derive(Debug, Clone, Error)]
pub enum LspError {
    /// The transport could not be opened
    #[error("Failed to connect to language server: {0}")]
    ConnectFailed(String),
    /// The socket closed while the operation was in progress
    #[error("Connection closed")]
    ConnectionClosed,
    /// The session was disposed before the operation completed
    #[error("Session disposed")]
    SessionDisposed,
    /// The `initialize` handshake was rejected
    #[error("LSP initialization failed: {0}")]
    InitializationFailed(String),
    /// No reply within the request timeout
    #[error("LSP request timed out")]
    Timeout,
    /// The server answered with an error object
    #[error("LSP RPC error {code}: {message}")]
    Rpc { code: i32, message: String },
    /// A reply did not have the expected shape
    #[error("Failed to parse LSP response: {0}")]
    ParseError(String),
    /// No usable session right now
    #[error("Not connected to a language server")]
    NotConnected,
    /// The client has been destroyed
    #[error("LSP client destroyed")]
    Destroyed,
    /// Socket level failure
    #[error("LSP IO error: {0}")]
    Io(String),
}

impl LspError {
    /// True when the failure means the session behind the request is gone.
    ///
    /// Servers and intermediaries report this in free text as often as through
    /// typed errors, so the message is inspected too.
    pub fn is_stale_session(&self) -> bool {
        match self {
            LspError::SessionDisposed | LspError::ConnectionClosed => true,
            other => {
                let message = other.to_string().to_lowercase();
                message.contains("disposed") || message.contains("closed")
            }
        }
    }
}

impl From<std::io::Error> for LspError {
    fn from(err: std::io::Error) -> Self {
        LspError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LspError {
    fn from(err: serde_json::Error) -> Self {
        LspError::ParseError(err.to_string())
    }
}

/// What the server said it can do in its `initialize` reply.
///
/// Providers consult this before sending anything, so an unadvertised
/// feature never reaches the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub completion: bool,
    pub hover: bool,
    pub signature_help: bool,
    pub completion_trigger_characters: Vec<String>,
    pub signature_trigger_characters: Vec<String>,
}

impl ServerCapabilities {
    /// Accepts either the full result or its `capabilities` member
    pub fn from_initialize_result(result: &serde_json::Value) -> Self {
        let caps = result.get("capabilities").unwrap_or(result);

        Self {
            completion: caps
                .get("completionProvider")
                .map(|v| !v.is_null() && v != &serde_json::Value::Bool(false))
                .unwrap_or(false),
            hover: caps
                .get("hoverProvider")
                .map(|v| !v.is_null() && v != &serde_json::Value::Bool(false))
                .unwrap_or(false),
            signature_help: caps
                .get("signatureHelpProvider")
                .map(|v| !v.is_null() && v != &serde_json::Value::Bool(false))
                .unwrap_or(false),
            completion_trigger_characters: trigger_characters(caps.get("completionProvider")),
            signature_trigger_characters: trigger_characters(caps.get("signatureHelpProvider")),
        }
    }
}

fn trigger_characters(provider: Option<&serde_json::Value>) -> Vec<String> {
    provider
        .and_then(|p| p.get("triggerCharacters"))
        .and_then(|t| t.as_array())
        .map(|chars| {
            chars
                .iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Zero-based position on the server side of the translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// `MarkupContent` as sent by servers that support structured documentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupContent {
    pub kind: String,
    pub value: String,
}

/// Documentation is either a bare string or `MarkupContent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Documentation {
    Markup(MarkupContent),
    Plain(String),
}

impl Documentation {
    pub fn into_value(self) -> String {
        match self {
            Documentation::Markup(markup) => markup.value,
            Documentation::Plain(text) => text,
        }
    }
}

/// Deprecated-but-common hover element: a string or a `{language, value}` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarkedString {
    Code { language: String, value: String },
    Plain(String),
}

impl MarkedString {
    pub fn into_markdown(self) -> String {
        match self {
            MarkedString::Code { language, value } => format!("```{}\n{}\n```", language, value),
            MarkedString::Plain(text) => text,
        }
    }
}

/// `Hover.contents` in all three shapes the protocol allows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HoverContents {
    Markup(MarkupContent),
    Many(Vec<MarkedString>),
    Single(MarkedString),
}

impl HoverContents {
    /// Flatten into markdown blocks, dropping empty ones
    pub fn into_blocks(self) -> Vec<String> {
        let blocks = match self {
            HoverContents::Markup(markup) => vec![markup.value],
            HoverContents::Many(items) => items.into_iter().map(MarkedString::into_markdown).collect(),
            HoverContents::Single(item) => vec![item.into_markdown()],
        };
        blocks.into_iter().filter(|b| !b.trim().is_empty()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hover {
    pub contents: HoverContents,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

/// One server suggestion; only the fields the bridge reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<Documentation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_text_format: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_edit: Option<TextEdit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_text: Option<String>,
}

impl CompletionItem {
    /// Text to insert, by protocol precedence
    pub fn resolved_insert_text(&self) -> String {
        self.text_edit
            .as_ref()
            .map(|edit| edit.new_text.clone())
            .or_else(|| self.insert_text.clone())
            .unwrap_or_else(|| self.label.clone())
    }

    pub fn is_snippet(&self) -> bool {
        self.insert_text_format == Some(INSERT_TEXT_FORMAT_SNIPPET)
    }
}

pub const INSERT_TEXT_FORMAT_SNIPPET: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionListReply {
    #[serde(default)]
    pub is_incomplete: bool,
    pub items: Vec<CompletionItem>,
}

/// Response can be CompletionItem[] or CompletionList
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionResponse {
    List(Vec<CompletionItem>),
    Wrapped(CompletionListReply),
}

impl CompletionResponse {
    pub fn into_items(self) -> Vec<CompletionItem> {
        match self {
            CompletionResponse::List(items) => items,
            CompletionResponse::Wrapped(list) => list.items,
        }
    }
}

/// Either the parameter text or `[start, end]` offsets into the signature label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterLabel {
    Simple(String),
    Offsets([u32; 2]),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterInformation {
    pub label: ParameterLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<Documentation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInformation {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<Documentation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterInformation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHelp {
    #[serde(default)]
    pub signatures: Vec<SignatureInformation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_signature: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_parameter: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn advertised_providers_become_flags() {
        let result = json!({
            "capabilities": {
                "completionProvider": {
                    "triggerCharacters": ["."]
                },
                "hoverProvider": true,
                "signatureHelpProvider": false
            }
        });

        let caps = ServerCapabilities::from_initialize_result(&result);
        assert!(caps.completion);
        assert!(caps.hover);
        assert!(!caps.signature_help);
        assert_eq!(caps.completion_trigger_characters, vec![".".to_string()]);
    }

    #[test]
    fn capabilities_without_wrapper_and_null_providers() {
        let caps = ServerCapabilities::from_initialize_result(&json!({
            "hoverProvider": null,
            "signatureHelpProvider": {"triggerCharacters": ["(", ","]}
        }));
        assert!(!caps.hover);
        assert!(!caps.completion);
        assert!(caps.signature_help);
        assert_eq!(caps.signature_trigger_characters, vec!["(", ","]);
    }

    #[test]
    fn completion_response_accepts_bare_list_and_wrapper() {
        let bare: CompletionResponse = serde_json::from_value(json!([{"label": "print"}])).unwrap();
        assert_eq!(bare.into_items().len(), 1);

        let wrapped: CompletionResponse = serde_json::from_value(json!({
            "isIncomplete": false,
            "items": [{"label": "print"}, {"label": "pow"}]
        }))
        .unwrap();
        assert_eq!(wrapped.into_items().len(), 2);
    }

    #[test]
    fn hover_contents_shapes_flatten_to_blocks() {
        let markup: HoverContents =
            serde_json::from_value(json!({"kind": "markdown", "value": "**x**"})).unwrap();
        assert_eq!(markup.into_blocks(), vec!["**x**".to_string()]);

        let many: HoverContents = serde_json::from_value(json!([
            {"language": "python", "value": "def f()"},
            "plain",
            ""
        ]))
        .unwrap();
        assert_eq!(
            many.into_blocks(),
            vec!["```python\ndef f()\n```".to_string(), "plain".to_string()]
        );
    }

    #[test]
    fn insert_text_precedence() {
        let item: CompletionItem = serde_json::from_value(json!({
            "label": "range",
            "insertText": "range()",
            "textEdit": {
                "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 2}},
                "newText": "range($1)"
            },
            "insertTextFormat": 2
        }))
        .unwrap();
        assert_eq!(item.resolved_insert_text(), "range($1)");
        assert!(item.is_snippet());
    }

    #[test]
    fn stale_session_classification() {
        assert!(LspError::SessionDisposed.is_stale_session());
        assert!(LspError::ConnectionClosed.is_stale_session());
        assert!(LspError::Rpc {
            code: -32603,
            message: "Connection got disposed.".to_string()
        }
        .is_stale_session());
        assert!(!LspError::Timeout.is_stale_session());
    }
}
