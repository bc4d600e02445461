//! Renders `textDocument/publishDiagnostics` as view decorations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::stream::{BoxStream, StreamExt};
use lsp_types::notification::PublishDiagnostics;
use lsp_types::{Diagnostic, PublishDiagnosticsParams};
use tracing::{debug, warn};
use url::Url;

use crate::connection::Connection;
use crate::convert::diagnostic_to_decoration;
use crate::dispose::Subscription;
use crate::errors::ConversionError;
use crate::host::{DecorationSink, DecorationType, TextDocument, ViewComponent, WindowModel};
use crate::lock;
use crate::uri::UriRewriter;

const DIAGNOSTICS_TARGET: &str = "weft_lsp_client::diagnostics";

struct DiagnosticsState {
    by_document: Mutex<HashMap<Url, Vec<Diagnostic>>>,
    sink: Arc<dyn DecorationSink>,
    window: Arc<dyn WindowModel>,
    rewriter: UriRewriter,
    decoration_type: DecorationType,
}

/// Latest diagnostics per document for one session.
///
/// Each publish replaces the document's previous diagnostics; visible views
/// of that document are re-rendered immediately.
#[derive(Clone)]
pub(crate) struct DiagnosticsProjector {
    state: Arc<DiagnosticsState>,
}

impl DiagnosticsProjector {
    pub(crate) fn new(
        sink: Arc<dyn DecorationSink>,
        window: Arc<dyn WindowModel>,
        rewriter: UriRewriter,
    ) -> Self {
        let decoration_type = sink.create_decoration_type();
        Self {
            state: Arc::new(DiagnosticsState {
                by_document: Mutex::new(HashMap::new()),
                sink,
                window,
                rewriter,
                decoration_type,
            }),
        }
    }

    pub(crate) fn publish(&self, params: PublishDiagnosticsParams) -> Result<(), ConversionError> {
        let document = self.state.rewriter.from_protocol(&params.uri)?;
        debug!(
            target: DIAGNOSTICS_TARGET,
            document = %document,
            count = params.diagnostics.len(),
            "received diagnostics"
        );
        lock(&self.state.by_document).insert(document.clone(), params.diagnostics);
        for view in self.state.window.visible_views() {
            if view.document == document {
                self.render(&view);
            }
        }
        Ok(())
    }

    /// Re-renders every visible view from the current state.
    pub(crate) fn render_visible(&self) {
        for view in self.state.window.visible_views() {
            self.render(&view);
        }
    }

    /// Removes this session's decorations from every visible view and forgets
    /// all diagnostics.
    pub(crate) fn clear(&self) {
        let cleared = std::mem::take(&mut *lock(&self.state.by_document));
        for view in self.state.window.visible_views() {
            if cleared.contains_key(&view.document) {
                self.state
                    .sink
                    .set_decorations(&view, self.state.decoration_type, Vec::new());
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn diagnostics_for(&self, document: &Url) -> Vec<Diagnostic> {
        lock(&self.state.by_document)
            .get(document)
            .cloned()
            .unwrap_or_default()
    }

    /// Consumes diagnostics and document-open events until either source ends
    /// or the subscription is dropped.
    pub(crate) fn spawn(
        &self,
        connection: &Connection,
        opened_documents: BoxStream<'static, TextDocument>,
    ) -> Subscription {
        let mut published = connection.observe::<PublishDiagnostics>().fuse();
        let mut opened = opened_documents.fuse();
        let projector = self.clone();
        Subscription::from_task(tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(params) = published.next() => {
                        if let Err(error) = projector.publish(params) {
                            warn!(
                                target: DIAGNOSTICS_TARGET,
                                %error,
                                "dropping diagnostics for unmappable document"
                            );
                        }
                    }
                    Some(_) = opened.next() => projector.render_visible(),
                    else => break,
                }
            }
        }))
    }

    fn render(&self, view: &ViewComponent) {
        let decorations = lock(&self.state.by_document)
            .get(&view.document)
            .map(|diagnostics| diagnostics.iter().map(diagnostic_to_decoration).collect())
            .unwrap_or_default();
        self.state
            .sink
            .set_decorations(view, self.state.decoration_type, decorations);
    }
}
