//! Editor feature providers backed by the language server
//!
//! A provider holds a weak reference to the client and nothing else. Every
//! request resolves the current session afresh, so a reconnect underneath a
//! registered provider needs no re-wiring.

mod completion;
mod hover;
mod signature;

pub use completion::{CompletionProvider, Snippet, SNIPPET_KIND};
pub use hover::HoverProvider;
pub use signature::SignatureHelpProvider;

use std::sync::{Arc, Weak};

use tracing::debug;

use super::client::ClientInner;
use super::session::RpcSession;
use super::types::{LspError, Position, ServerCapabilities};
use crate::editor::{EditorPosition, EditorSurface, Registration, TextModel};

/// The three provider registrations, created and disposed together
pub(crate) struct ProviderRegistrations {
    handles: Vec<Registration>,
}

impl ProviderRegistrations {
    pub(crate) fn register(
        surface: &dyn EditorSurface,
        language_id: &str,
        client: Weak<ClientInner>,
    ) -> Self {
        let handles = vec![
            surface.register_completion_provider(
                language_id,
                Arc::new(CompletionProvider::new(client.clone())),
            ),
            surface.register_hover_provider(language_id, Arc::new(HoverProvider::new(client.clone()))),
            surface.register_signature_help_provider(
                language_id,
                Arc::new(SignatureHelpProvider::new(client)),
            ),
        ];
        debug!(language_id, "providers registered");
        Self { handles }
    }

    pub(crate) fn dispose(self) {
        for handle in self.handles {
            handle.dispose();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Feature {
    Completion,
    Hover,
    SignatureHelp,
}

impl Feature {
    fn name(self) -> &'static str {
        match self {
            Feature::Completion => "completion",
            Feature::Hover => "hover",
            Feature::SignatureHelp => "signatureHelp",
        }
    }

    fn supported_by(self, capabilities: &ServerCapabilities) -> bool {
        match self {
            Feature::Completion => capabilities.completion,
            Feature::Hover => capabilities.hover,
            Feature::SignatureHelp => capabilities.signature_help,
        }
    }
}

/// Number of lines the preamble pushes the visible text down by
pub(crate) fn preamble_line_count(preamble: Option<&str>) -> u32 {
    preamble.map(|p| p.matches('\n').count() as u32).unwrap_or(0)
}

/// 1-based editor position to 0-based server position, shifted past the
/// preamble
pub(crate) fn to_server_position(position: EditorPosition, preamble_lines: u32) -> Position {
    Position::new(
        position.line_number.saturating_sub(1) + preamble_lines,
        position.column.saturating_sub(1),
    )
}

/// Everything one request needs, snapshotted when it starts
pub(crate) struct RequestContext {
    pub(crate) client: Arc<ClientInner>,
    pub(crate) session: Arc<RpcSession>,
    pub(crate) feature: Feature,
    pub(crate) uri: String,
    pub(crate) position: Position,
    pub(crate) preamble_lines: u32,
}

impl RequestContext {
    /// Resolve a valid session, translate the position and resend the
    /// document. `None` means the caller should answer with its empty result.
    pub(crate) fn prepare(
        client: &Weak<ClientInner>,
        feature: Feature,
        model: &dyn TextModel,
        position: EditorPosition,
    ) -> Option<Self> {
        let client = client.upgrade()?;
        if client.is_destroyed() {
            return None;
        }
        let session = client.valid_session()?;

        if !feature.supported_by(&session.capabilities()) {
            debug!(feature = feature.name(), "server does not advertise feature");
            return None;
        }

        let preamble = client.preamble_snapshot();
        let preamble_lines = preamble_line_count(preamble.as_deref());
        let text = match preamble {
            Some(preamble) => preamble + &model.value(),
            None => model.value(),
        };

        let context = Self {
            uri: client.config.document_uri.clone(),
            position: to_server_position(position, preamble_lines),
            preamble_lines,
            client,
            session,
            feature,
        };

        if let Err(e) = context.session.did_open(&context.uri, &text) {
            context.fail(&e);
            return None;
        }
        Some(context)
    }

    /// Log a failed request and kick recovery if the session went stale
    pub(crate) fn fail(&self, error: &LspError) {
        debug!(feature = self.feature.name(), "request failed: {}", error);
        self.client.handle_request_failure(&self.session, error);
    }
}
