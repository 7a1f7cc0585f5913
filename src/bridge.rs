//! Host bridge
//!
//! The embedding application talks to the editor through named messages,
//! one JSON object per line: `{"name": "...", "value": ...}`. Commands come
//! in, echoes and feature results go out.

use std::future::Future;
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::editor::{
    CompletionList, Document, EditorPosition, HoverResult, ProviderRegistry, SignatureHelpResult,
};
use crate::lsp::LspClient;

/// Inbound message from the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "value", rename_all = "snake_case")]
pub enum BridgeCommand {
    SetText(String),
    SetCursor(EditorPosition),
    /// New language server endpoint, `host:port`
    LspUrl(String),
    SetLspHeader(String),
    GetLspHeader,
    Completion(EditorPosition),
    Hover(EditorPosition),
    SignatureHelp(EditorPosition),
    Destroy,
}

/// Outbound message to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "value", rename_all = "snake_case")]
pub enum BridgeEvent {
    CurrentText(String),
    CurrentCursor(EditorPosition),
    CurrentLspHeader(String),
    Completion(CompletionList),
    Hover(Option<HoverResult>),
    SignatureHelp(SignatureHelpResult),
    Warning(String),
}

impl BridgeCommand {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Trim the header and make sure it ends with a newline.
///
/// Blank input clears the header instead of leaving a lone `"\n"`
/// preamble, so positions are only shifted when there is real content.
pub fn normalize_header(header: &str) -> Option<String> {
    let header = header.trim();
    if header.is_empty() {
        return None;
    }
    Some(format!("{}\n", header))
}

/// Editor state on the host side of the bridge
pub struct EditorBridge {
    client: LspClient,
    registry: ProviderRegistry,
    document: Document,
    cursor: EditorPosition,
    events: mpsc::UnboundedSender<BridgeEvent>,
}

impl EditorBridge {
    /// Wire a bridge to `client`. Signature help results reach the host
    /// through the client's observer, whichever path requested them.
    pub fn new(
        client: LspClient,
        registry: ProviderRegistry,
        events: mpsc::UnboundedSender<BridgeEvent>,
    ) -> Self {
        let observer_events = events.clone();
        client.on_signature_help(move |result| {
            let _ = observer_events.send(BridgeEvent::SignatureHelp(result.clone()));
        });

        Self {
            client,
            registry,
            document: Document::default(),
            cursor: EditorPosition::new(1, 1),
            events,
        }
    }

    pub fn client(&self) -> &LspClient {
        &self.client
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).is_err() {
            debug!("bridge event dropped: host receiver gone");
        }
    }

    /// Run a feature request off the command loop against a snapshot of
    /// the document, so a silent server never holds up later commands.
    fn spawn_request<F, Fut>(&self, request: F)
    where
        F: FnOnce(ProviderRegistry, Document, mpsc::UnboundedSender<BridgeEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let work = request(
            self.registry.clone(),
            self.document.clone(),
            self.events.clone(),
        );
        tokio::spawn(work);
    }

    /// Apply one command. Breaks after `destroy`.
    pub async fn handle(&mut self, command: BridgeCommand) -> ControlFlow<()> {
        let language_id = self.client.config().language_id.clone();

        match command {
            BridgeCommand::SetText(text) => {
                if self.document.text() != text {
                    self.document.set_text(text.clone());
                    self.emit(BridgeEvent::CurrentText(text));
                }
            }
            BridgeCommand::SetCursor(position) => {
                self.cursor = position;
                self.emit(BridgeEvent::CurrentCursor(position));
            }
            BridgeCommand::LspUrl(endpoint) => {
                if self.client.is_destroyed() {
                    self.emit(BridgeEvent::Warning(
                        "LSP client destroyed; endpoint change ignored".to_string(),
                    ));
                } else {
                    self.client.set_endpoint(&endpoint);
                }
            }
            BridgeCommand::SetLspHeader(header) => {
                let header = normalize_header(&header);
                self.client.set_preamble(header.clone());
                self.emit(BridgeEvent::CurrentLspHeader(header.unwrap_or_default()));
            }
            BridgeCommand::GetLspHeader => {
                self.emit(BridgeEvent::CurrentLspHeader(
                    self.client.preamble().unwrap_or_default(),
                ));
            }
            BridgeCommand::Completion(position) => {
                self.cursor = position;
                self.spawn_request(move |registry, document, events| async move {
                    let list = registry
                        .provide_completion(&language_id, &document, position)
                        .await;
                    let _ = events.send(BridgeEvent::Completion(list));
                });
            }
            BridgeCommand::Hover(position) => {
                self.spawn_request(move |registry, document, events| async move {
                    let hover = registry.provide_hover(&language_id, &document, position).await;
                    let _ = events.send(BridgeEvent::Hover(hover));
                });
            }
            BridgeCommand::SignatureHelp(position) => {
                self.cursor = position;
                // Emitted by the observer installed in `new`
                self.spawn_request(move |registry, document, _| async move {
                    registry
                        .provide_signature_help(&language_id, &document, position)
                        .await;
                });
            }
            BridgeCommand::Destroy => {
                self.client.destroy();
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    /// Parse and apply one line from the host
    pub async fn handle_line(&mut self, line: &str) -> ControlFlow<()> {
        let line = line.trim();
        if line.is_empty() {
            return ControlFlow::Continue(());
        }

        match BridgeCommand::parse(line) {
            Ok(command) => self.handle(command).await,
            Err(e) => {
                warn!("unrecognized bridge message: {}", e);
                self.emit(BridgeEvent::Warning(format!("unrecognized message: {}", e)));
                ControlFlow::Continue(())
            }
        }
    }
}
