pub mod bridge;
pub mod config;
pub mod editor;
pub mod log;
pub mod lsp;

pub use bridge::{BridgeCommand, BridgeEvent, EditorBridge};
pub use config::BridgeConfig;
pub use editor::{Document, EditorPosition, EditorSurface, ProviderRegistry, TextModel};
pub use lsp::{ClientConfig, LspClient, LspError};
