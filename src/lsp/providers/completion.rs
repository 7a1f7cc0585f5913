//! Completion provider

use std::collections::HashSet;
use std::sync::Weak;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Feature, RequestContext};
use crate::editor::{
    CompletionList, CompletionSuggestion, EditorPosition, EditorRange, MarkdownString, TextModel,
    WordAtPosition,
};
use crate::lsp::client::ClientInner;
use crate::lsp::types::{CompletionItem, CompletionResponse, LspError};

/// LSP `CompletionItemKind.Snippet`
pub const SNIPPET_KIND: u32 = 15;

/// Static completion offered alongside server results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub label: String,
    pub insert_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

impl Snippet {
    fn matches(&self, word: &str) -> bool {
        word.is_empty() || self.label.to_lowercase().contains(&word.to_lowercase())
    }
}

pub struct CompletionProvider {
    client: Weak<ClientInner>,
}

impl CompletionProvider {
    pub(crate) fn new(client: Weak<ClientInner>) -> Self {
        Self { client }
    }

    /// Suggestions at `position`. Empty whenever the server cannot answer.
    pub async fn provide(&self, model: &dyn TextModel, position: EditorPosition) -> CompletionList {
        let word = model.word_until_position(position);
        let Some(context) = RequestContext::prepare(&self.client, Feature::Completion, model, position)
        else {
            return CompletionList::default();
        };

        let reply = context
            .session
            .completion(&context.uri, context.position)
            .await
            .and_then(parse_items);

        match reply {
            Ok(items) => {
                let snippets = context.client.snippets();
                build_list(items, &snippets, &word, position.line_number)
            }
            Err(e) => {
                context.fail(&e);
                CompletionList::default()
            }
        }
    }
}

fn parse_items(reply: Value) -> Result<Vec<CompletionItem>, LspError> {
    if reply.is_null() {
        return Ok(Vec::new());
    }
    let response: CompletionResponse = serde_json::from_value(reply)?;
    Ok(response.into_items())
}

fn word_range(word: &WordAtPosition, line_number: u32) -> EditorRange {
    EditorRange {
        start_line_number: line_number,
        start_column: word.start_column,
        end_line_number: line_number,
        end_column: word.end_column,
    }
}

/// Adapt server items, merge matching snippets and drop duplicates
pub(crate) fn build_list(
    items: Vec<CompletionItem>,
    snippets: &[Snippet],
    word: &WordAtPosition,
    line_number: u32,
) -> CompletionList {
    let range = word_range(word, line_number);

    let from_server = items.into_iter().map(|item| CompletionSuggestion {
        insert_text: item.resolved_insert_text(),
        insert_as_snippet: item.is_snippet(),
        label: item.label,
        kind: item.kind,
        detail: item.detail,
        documentation: item
            .documentation
            .map(|doc| MarkdownString::new(doc.into_value())),
        sort_text: item.sort_text,
        range,
    });

    let from_snippets = snippets
        .iter()
        .filter(|snippet| snippet.matches(&word.word))
        .map(|snippet| CompletionSuggestion {
            label: snippet.label.clone(),
            kind: Some(SNIPPET_KIND),
            insert_text: snippet.insert_text.clone(),
            insert_as_snippet: true,
            detail: None,
            documentation: snippet.documentation.clone().map(MarkdownString::new),
            sort_text: None,
            range,
        });

    let mut seen = HashSet::new();
    let suggestions = from_server
        .chain(from_snippets)
        .filter(|s| seen.insert((s.label.clone(), s.insert_text.clone(), s.kind)))
        .collect();

    CompletionList { suggestions }
}
