//! Workspace-root diffs and their protocol form.

use lsp_types::WorkspaceFolder;
use url::Url;

use crate::errors::ConversionError;
use crate::host::WorkspaceRoot;
use crate::uri::UriRewriter;

/// Roots added and removed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RootDiff {
    pub(crate) added: Vec<Url>,
    pub(crate) removed: Vec<Url>,
}

impl RootDiff {
    pub(crate) fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compares snapshots by URI, ignoring order and duplicates.
pub(crate) fn diff_roots(before: &[WorkspaceRoot], after: &[WorkspaceRoot]) -> RootDiff {
    RootDiff {
        added: missing_from(after, before),
        removed: missing_from(before, after),
    }
}

fn missing_from(source: &[WorkspaceRoot], other: &[WorkspaceRoot]) -> Vec<Url> {
    let mut missing: Vec<Url> = Vec::new();
    for root in source {
        let known = other.iter().any(|candidate| candidate.uri == root.uri);
        if !known && !missing.contains(&root.uri) {
            missing.push(root.uri.clone());
        }
    }
    missing
}

/// Converts a host root into a protocol workspace folder named after its
/// last path segment.
pub(crate) fn workspace_folder(
    root: &Url,
    rewriter: &UriRewriter,
) -> Result<WorkspaceFolder, ConversionError> {
    Ok(WorkspaceFolder {
        uri: rewriter.to_protocol(root)?,
        name: folder_name(root),
    })
}

fn folder_name(root: &Url) -> String {
    root.path_segments()
        .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
        .map_or_else(|| root.to_string(), str::to_owned)
}
