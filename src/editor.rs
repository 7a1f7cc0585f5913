//! Editor surface boundary
//!
//! The editor widget itself lives outside this crate. What it offers us is a
//! text model to read from and a place to register the three language
//! feature providers; what it gets back are results in its own 1-based,
//! markdown-flavoured shapes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use crate::lsp::providers::{CompletionProvider, HoverProvider, SignatureHelpProvider};
use crate::lsp::types::ParameterLabel;

/// 1-based cursor position as the editor reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorPosition {
    #[serde(alias = "line")]
    pub line_number: u32,
    pub column: u32,
}

impl EditorPosition {
    pub fn new(line_number: u32, column: u32) -> Self {
        Self {
            line_number,
            column,
        }
    }
}

/// 1-based, end-exclusive range in editor coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorRange {
    pub start_line_number: u32,
    pub start_column: u32,
    pub end_line_number: u32,
    pub end_column: u32,
}

/// The word being typed, up to the cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordAtPosition {
    pub word: String,
    pub start_column: u32,
    pub end_column: u32,
}

/// Read access to the document the providers serve
pub trait TextModel: Send + Sync {
    /// Full visible text
    fn value(&self) -> String;

    /// Identifier characters immediately before `position` on its line
    fn word_until_position(&self, position: EditorPosition) -> WordAtPosition;
}

/// Plain in-memory text model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    text: String,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl TextModel for Document {
    fn value(&self) -> String {
        self.text.clone()
    }

    fn word_until_position(&self, position: EditorPosition) -> WordAtPosition {
        let line = self
            .text
            .split('\n')
            .nth(position.line_number.saturating_sub(1) as usize)
            .unwrap_or_default();
        let line_end = u32::try_from(line.chars().count())
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let column = position.column.clamp(1, line_end);

        let before: Vec<char> = line.chars().take((column - 1) as usize).collect();
        let word_len = before.iter().rev().take_while(|c| is_word_char(**c)).count();
        let word: String = before[before.len() - word_len..].iter().collect();

        WordAtPosition {
            word,
            start_column: column - word_len as u32,
            end_column: column,
        }
    }
}

/// Handle to one provider registration. Disposing (or dropping) removes it.
pub struct Registration {
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl Registration {
    pub fn new(disposer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disposer: Some(Box::new(disposer)),
        }
    }

    pub fn dispose(mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

/// Where language feature providers get registered.
///
/// Registering again for the same feature and language replaces the earlier
/// provider; disposing the earlier handle afterwards must leave the
/// replacement in place.
pub trait EditorSurface: Send + Sync {
    fn register_completion_provider(
        &self,
        language_id: &str,
        provider: Arc<CompletionProvider>,
    ) -> Registration;

    fn register_hover_provider(&self, language_id: &str, provider: Arc<HoverProvider>)
        -> Registration;

    fn register_signature_help_provider(
        &self,
        language_id: &str,
        provider: Arc<SignatureHelpProvider>,
    ) -> Registration;
}

struct Slot<T> {
    id: u64,
    provider: Arc<T>,
}

type Slots<T> = HashMap<String, Slot<T>>;

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    completion: Slots<CompletionProvider>,
    hover: Slots<HoverProvider>,
    signature_help: Slots<SignatureHelpProvider>,
}

/// In-process editor surface: one provider per feature and language.
///
/// A newer registration replaces an older one; disposing a superseded
/// handle leaves the newer provider in place.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register<T: Send + Sync + 'static>(
        &self,
        select: fn(&mut RegistryState) -> &mut Slots<T>,
        language_id: &str,
        provider: Arc<T>,
    ) -> Registration {
        let id = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.next_id += 1;
            let id = state.next_id;
            select(&mut state).insert(language_id.to_string(), Slot { id, provider });
            id
        };

        let weak: Weak<Mutex<RegistryState>> = Arc::downgrade(&self.state);
        let language_id = language_id.to_string();
        Registration::new(move || {
            let Some(state) = weak.upgrade() else { return };
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            let slots = select(&mut state);
            if slots.get(&language_id).map(|slot| slot.id) == Some(id) {
                slots.remove(&language_id);
            }
        })
    }

    fn lookup<T>(
        &self,
        select: fn(&mut RegistryState) -> &mut Slots<T>,
        language_id: &str,
    ) -> Option<Arc<T>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        select(&mut state)
            .get(language_id)
            .map(|slot| Arc::clone(&slot.provider))
    }

    pub fn completion_provider(&self, language_id: &str) -> Option<Arc<CompletionProvider>> {
        self.lookup(|s| &mut s.completion, language_id)
    }

    pub fn hover_provider(&self, language_id: &str) -> Option<Arc<HoverProvider>> {
        self.lookup(|s| &mut s.hover, language_id)
    }

    pub fn signature_help_provider(&self, language_id: &str) -> Option<Arc<SignatureHelpProvider>> {
        self.lookup(|s| &mut s.signature_help, language_id)
    }

    /// Number of live registrations across all features
    pub fn registration_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.completion.len() + state.hover.len() + state.signature_help.len()
    }

    pub async fn provide_completion(
        &self,
        language_id: &str,
        model: &dyn TextModel,
        position: EditorPosition,
    ) -> CompletionList {
        match self.completion_provider(language_id) {
            Some(provider) => provider.provide(model, position).await,
            None => CompletionList::default(),
        }
    }

    pub async fn provide_hover(
        &self,
        language_id: &str,
        model: &dyn TextModel,
        position: EditorPosition,
    ) -> Option<HoverResult> {
        match self.hover_provider(language_id) {
            Some(provider) => provider.provide(model, position).await,
            None => None,
        }
    }

    pub async fn provide_signature_help(
        &self,
        language_id: &str,
        model: &dyn TextModel,
        position: EditorPosition,
    ) -> SignatureHelpResult {
        match self.signature_help_provider(language_id) {
            Some(provider) => provider.provide(model, position).await,
            None => SignatureHelpResult::default(),
        }
    }
}

impl EditorSurface for ProviderRegistry {
    fn register_completion_provider(
        &self,
        language_id: &str,
        provider: Arc<CompletionProvider>,
    ) -> Registration {
        self.register(|s| &mut s.completion, language_id, provider)
    }

    fn register_hover_provider(
        &self,
        language_id: &str,
        provider: Arc<HoverProvider>,
    ) -> Registration {
        self.register(|s| &mut s.hover, language_id, provider)
    }

    fn register_signature_help_provider(
        &self,
        language_id: &str,
        provider: Arc<SignatureHelpProvider>,
    ) -> Registration {
        self.register(|s| &mut s.signature_help, language_id, provider)
    }
}

/// Markdown text block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkdownString {
    pub value: String,
}

impl MarkdownString {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// One completion entry in editor shape. `kind` uses LSP numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSuggestion {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<u32>,
    pub insert_text: String,
    #[serde(default)]
    pub insert_as_snippet: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<MarkdownString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_text: Option<String>,
    pub range: EditorRange,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionList {
    pub suggestions: Vec<CompletionSuggestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoverResult {
    pub contents: Vec<MarkdownString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<EditorRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterView {
    pub label: ParameterLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<MarkdownString>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureView {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<MarkdownString>,
    pub parameters: Vec<ParameterView>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHelpResult {
    pub signatures: Vec<SignatureView>,
    pub active_signature: u32,
    pub active_parameter: u32,
}
