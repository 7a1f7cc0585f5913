//! Hover provider

use std::sync::Weak;

use serde_json::Value;

use super::{Feature, RequestContext};
use crate::editor::{EditorPosition, EditorRange, HoverResult, MarkdownString, TextModel};
use crate::lsp::client::ClientInner;
use crate::lsp::types::{Hover, LspError, Range};

pub struct HoverProvider {
    client: Weak<ClientInner>,
}

impl HoverProvider {
    pub(crate) fn new(client: Weak<ClientInner>) -> Self {
        Self { client }
    }

    /// Hover at `position`, or `None` when there is nothing to show
    pub async fn provide(&self, model: &dyn TextModel, position: EditorPosition) -> Option<HoverResult> {
        let context = RequestContext::prepare(&self.client, Feature::Hover, model, position)?;

        let reply = context
            .session
            .hover(&context.uri, context.position)
            .await
            .and_then(parse_hover);

        match reply {
            Ok(hover) => hover.and_then(|hover| to_result(hover, context.preamble_lines)),
            Err(e) => {
                context.fail(&e);
                None
            }
        }
    }
}

fn parse_hover(reply: Value) -> Result<Option<Hover>, LspError> {
    if reply.is_null() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(reply)?))
}

/// Map a server range back into the visible document. Ranges that start
/// inside the preamble have no editor counterpart.
fn to_editor_range(range: Range, preamble_lines: u32) -> Option<EditorRange> {
    if range.start.line < preamble_lines {
        return None;
    }
    Some(EditorRange {
        start_line_number: (range.start.line - preamble_lines).saturating_add(1),
        start_column: range.start.character.saturating_add(1),
        end_line_number: range.end.line.saturating_sub(preamble_lines).saturating_add(1),
        end_column: range.end.character.saturating_add(1),
    })
}

pub(crate) fn to_result(hover: Hover, preamble_lines: u32) -> Option<HoverResult> {
    let contents: Vec<MarkdownString> = hover
        .contents
        .into_blocks()
        .into_iter()
        .map(MarkdownString::new)
        .collect();
    if contents.is_empty() {
        return None;
    }

    Some(HoverResult {
        contents,
        range: hover
            .range
            .and_then(|range| to_editor_range(range, preamble_lines)),
    })
}
