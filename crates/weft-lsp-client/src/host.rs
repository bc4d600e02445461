//! The host editor model the client projects server state onto.
//!
//! Every collaborator is a trait object so tests and embedders can supply
//! their own implementation. Event sources are plain streams.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use lsp_types::{DiagnosticSeverity, Position, Range};
use strum::{Display, EnumString};
use url::Url;
use weft_config::DocumentSelector;

use crate::dispose::Subscription;
use crate::errors::{ClientError, HostError};

/// A workspace root as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceRoot {
    /// Root URI in the host namespace.
    pub uri: Url,
}

impl WorkspaceRoot {
    /// Creates a root from its URI.
    #[must_use]
    pub fn new(uri: Url) -> Self {
        Self { uri }
    }
}

/// A text document known to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    /// Document URI in the host namespace.
    pub uri: Url,
    /// Language identifier such as `typescript`.
    pub language_id: String,
    /// Full text.
    pub text: String,
}

/// Identifier of a host view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(pub u64);

/// A visible editor component showing one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewComponent {
    /// Host identifier of the view.
    pub id: ViewId,
    /// Document shown by the view.
    pub document: Url,
}

/// Handle for a family of decorations created by one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecorationType(pub u64);

/// A single diagnostic rendered as a decoration.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoration {
    /// Range in the document.
    pub range: Range,
    /// Severity reported by the server.
    pub severity: Option<DiagnosticSeverity>,
    /// Text shown to the user.
    pub message: String,
}

/// Status update forwarded to a progress reporter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Completion in the range `0..=100`.
    pub percentage: Option<f64>,
    /// Free-form status text.
    pub message: Option<String>,
}

/// Host provider categories the client can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ProviderKind {
    /// Hover information.
    Hover,
    /// Go to definition.
    Definition,
    /// Find references.
    References,
    /// Go to type definition.
    TypeDefinition,
    /// Go to implementation.
    Implementation,
}

/// A provider invocation from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    /// Document the request concerns, in the host namespace.
    pub document: Url,
    /// Cursor position.
    pub position: Position,
    /// Whether references should include the declaration.
    pub include_declaration: bool,
}

impl ProviderRequest {
    /// Creates a request at `position` in `document`.
    #[must_use]
    pub fn new(document: Url, position: Position) -> Self {
        Self {
            document,
            position,
            include_declaration: false,
        }
    }
}

/// Hover content in host form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostHover {
    /// Markdown rendering of the hover contents.
    pub contents: String,
    /// Range the hover applies to.
    pub range: Option<Range>,
}

/// A location in host form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLocation {
    /// Target document in the host namespace.
    pub uri: Url,
    /// Target range.
    pub range: Range,
}

/// Result of a provider invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResponse {
    /// Hover contents, if any.
    Hover(Option<HostHover>),
    /// Definition-like or reference results.
    Locations(Vec<HostLocation>),
}

/// Workspace roots and documents.
pub trait Workspace: Send + Sync {
    /// Current roots.
    fn roots(&self) -> Vec<WorkspaceRoot>;

    /// Emits whenever the set of roots changes.
    fn root_changes(&self) -> BoxStream<'static, ()>;

    /// Currently known text documents.
    fn text_documents(&self) -> Vec<TextDocument>;

    /// Emits documents as they are opened.
    fn opened_documents(&self) -> BoxStream<'static, TextDocument>;
}

/// A provider the host invokes for matching documents.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Answers a host request.
    async fn provide(&self, request: ProviderRequest) -> Result<ProviderResponse, ClientError>;
}

/// Accepts provider registrations.
pub trait ProviderSink: Send + Sync {
    /// Registers `provider` for documents matching `selector`; the returned
    /// subscription removes it.
    fn register_provider(
        &self,
        kind: ProviderKind,
        selector: DocumentSelector,
        provider: Arc<dyn Provider>,
    ) -> Subscription;
}

/// Renders decorations in views.
pub trait DecorationSink: Send + Sync {
    /// Creates a fresh decoration type.
    fn create_decoration_type(&self) -> DecorationType;

    /// Replaces every decoration of `decoration_type` in `view`.
    fn set_decorations(
        &self,
        view: &ViewComponent,
        decoration_type: DecorationType,
        decorations: Vec<Decoration>,
    );
}

/// The host window.
pub trait WindowModel: Send + Sync {
    /// Views currently visible.
    fn visible_views(&self) -> Vec<ViewComponent>;
}

/// Creates progress reporters.
#[async_trait]
pub trait ProgressFactory: Send + Sync {
    /// Creates a reporter titled `title`.
    async fn create_reporter(
        &self,
        title: Option<String>,
    ) -> Result<Box<dyn ProgressReporter>, HostError>;
}

/// A single progress indicator.
pub trait ProgressReporter: Send {
    /// Forwards a status update.
    fn report(&mut self, update: ProgressUpdate);

    /// Completes the indicator.
    fn complete(self: Box<Self>);
}

/// Bundle of host collaborators.
#[derive(Clone)]
pub struct HostModel {
    /// Roots and documents.
    pub workspace: Arc<dyn Workspace>,
    /// Provider registrations.
    pub providers: Arc<dyn ProviderSink>,
    /// Decoration rendering.
    pub decorations: Arc<dyn DecorationSink>,
    /// Visible views.
    pub window: Arc<dyn WindowModel>,
    /// Progress reporters.
    pub progress: Arc<dyn ProgressFactory>,
}

impl fmt::Debug for HostModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostModel").finish_non_exhaustive()
    }
}
