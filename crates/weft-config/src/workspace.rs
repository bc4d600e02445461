//! Workspace-level settings: root mode, URI mappings and document selectors.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

/// Whether the language server can serve several workspace folders over one
/// connection.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum WorkspaceFoldersMode {
    /// One shared connection; roots are announced through
    /// `workspace/didChangeWorkspaceFolders`.
    Supported,
    /// One connection per workspace root.
    #[default]
    Unsupported,
}

impl WorkspaceFoldersMode {
    /// Returns `true` when a single multi-root connection should be used.
    #[must_use]
    pub fn is_multi_root(self) -> bool {
        matches!(self, Self::Supported)
    }
}

/// Prefix rewrite between the host's URI namespace and the server's.
///
/// A URI starting with `client` is rewritten to start with `server` on its way
/// to the language server, and the reverse on its way back.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UriMapping {
    /// Prefix as seen by the host.
    pub client: Url,
    /// Prefix as seen by the language server.
    pub server: Url,
}

impl UriMapping {
    /// Creates a mapping between two prefixes.
    #[must_use]
    pub fn new(client: Url, server: Url) -> Self {
        Self { client, server }
    }
}

/// A single document filter.
///
/// Every field is optional; an absent field matches anything. `pattern` is a
/// glob which the client resolves against the workspace root when scoping.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DocumentFilter {
    /// Language identifier such as `typescript`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// URI scheme such as `file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// Glob pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl DocumentFilter {
    /// Builds a filter matching a single language.
    #[must_use]
    pub fn language(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            ..Self::default()
        }
    }

    /// Builds a filter matching a glob pattern.
    #[must_use]
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::default()
        }
    }
}

/// Entry of a document selector: either a bare language id or a filter.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SelectorEntry {
    /// Bare language identifier, shorthand for `{ language = "..." }`.
    Language(String),
    /// Full document filter.
    Filter(DocumentFilter),
}

impl SelectorEntry {
    /// Expands bare language ids into filters.
    #[must_use]
    pub fn into_filter(self) -> DocumentFilter {
        match self {
            Self::Language(language) => DocumentFilter::language(language),
            Self::Filter(filter) => filter,
        }
    }
}

impl From<DocumentFilter> for SelectorEntry {
    fn from(filter: DocumentFilter) -> Self {
        Self::Filter(filter)
    }
}

/// Ordered list of selector entries; a document matches if any entry matches.
pub type DocumentSelector = Vec<SelectorEntry>;
