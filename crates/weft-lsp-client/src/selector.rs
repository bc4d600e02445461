//! Scoping document selectors to a workspace root.

use url::Url;
use weft_config::{DocumentFilter, DocumentSelector, SelectorEntry};

use crate::errors::ConversionError;

/// Glob matching every document.
pub const MATCH_EVERYTHING: &str = "**";

/// Restricts a selector so it only matches documents under `root`.
///
/// An absent or empty selector becomes `[{ pattern: "**" }]`. Without a root
/// the selector is otherwise returned unchanged. With a root, bare language
/// ids become language filters and every filter's pattern (defaulting to
/// `**`) is resolved against the root URI, read as a directory even when it
/// lacks a trailing slash.
///
/// # Errors
///
/// Returns [`ConversionError::InvalidUri`] when a pattern cannot be joined
/// onto the root.
pub fn scope_document_selector_to_root(
    selector: Option<&[SelectorEntry]>,
    root: Option<&Url>,
) -> Result<DocumentSelector, ConversionError> {
    let entries: DocumentSelector = match selector {
        Some(given) if !given.is_empty() => given.to_vec(),
        _ => vec![SelectorEntry::Filter(DocumentFilter::pattern(
            MATCH_EVERYTHING,
        ))],
    };
    let Some(root) = root else {
        return Ok(entries);
    };
    let base = as_directory(root);
    entries
        .into_iter()
        .map(|entry| {
            let mut filter = entry.into_filter();
            let pattern = filter.pattern.as_deref().unwrap_or(MATCH_EVERYTHING);
            let resolved = base
                .join(pattern)
                .map_err(|source| ConversionError::invalid(pattern, source))?;
            filter.pattern = Some(resolved.into());
            Ok(SelectorEntry::Filter(filter))
        })
        .collect()
}

/// `root` with a trailing slash, so relative joins stay beneath it.
pub(crate) fn as_directory(root: &Url) -> Url {
    if root.cannot_be_a_base() || root.path().ends_with('/') {
        return root.clone();
    }
    let mut directory = root.clone();
    let path = format!("{}/", root.path());
    directory.set_path(&path);
    directory
}
