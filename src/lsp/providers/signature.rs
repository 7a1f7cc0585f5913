//! Signature help provider

use std::sync::Weak;

use serde_json::Value;
use tracing::debug;

use super::{Feature, RequestContext};
use crate::editor::{
    EditorPosition, MarkdownString, ParameterView, SignatureHelpResult, SignatureView, TextModel,
};
use crate::lsp::client::ClientInner;
use crate::lsp::types::{LspError, SignatureHelp};

pub struct SignatureHelpProvider {
    client: Weak<ClientInner>,
}

impl SignatureHelpProvider {
    pub(crate) fn new(client: Weak<ClientInner>) -> Self {
        Self { client }
    }

    /// Signature help at `position`. The registered observer, if any, sees
    /// every successful result before it is returned.
    pub async fn provide(&self, model: &dyn TextModel, position: EditorPosition) -> SignatureHelpResult {
        let Some(context) =
            RequestContext::prepare(&self.client, Feature::SignatureHelp, model, position)
        else {
            return SignatureHelpResult::default();
        };

        let reply = context
            .session
            .signature_help(&context.uri, context.position)
            .await
            .and_then(parse_signature_help);

        match reply {
            Ok(help) => {
                let result = normalize(help);
                if let Some(observer) = context.client.signature_observer() {
                    (*observer)(&result);
                }
                debug!(signatures = result.signatures.len(), "signature help");
                result
            }
            Err(e) => {
                context.fail(&e);
                SignatureHelpResult::default()
            }
        }
    }
}

fn parse_signature_help(reply: Value) -> Result<SignatureHelp, LspError> {
    if reply.is_null() {
        return Ok(SignatureHelp {
            signatures: Vec::new(),
            active_signature: None,
            active_parameter: None,
        });
    }
    Ok(serde_json::from_value(reply)?)
}

pub(crate) fn normalize(help: SignatureHelp) -> SignatureHelpResult {
    let signatures = help
        .signatures
        .into_iter()
        .map(|signature| SignatureView {
            label: signature.label,
            documentation: signature
                .documentation
                .map(|doc| MarkdownString::new(doc.into_value())),
            parameters: signature
                .parameters
                .into_iter()
                .map(|parameter| ParameterView {
                    label: parameter.label,
                    documentation: parameter
                        .documentation
                        .map(|doc| MarkdownString::new(doc.into_value())),
                })
                .collect(),
        })
        .collect();

    SignatureHelpResult {
        signatures,
        active_signature: help.active_signature.unwrap_or(0),
        active_parameter: help.active_parameter.unwrap_or(0),
    }
}
