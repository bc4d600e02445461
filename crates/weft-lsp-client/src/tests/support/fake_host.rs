//! Recording implementation of every host collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use futures::stream::{BoxStream, StreamExt};
use lsp_types::Position;
use url::Url;
use weft_config::{DocumentFilter, DocumentSelector, SelectorEntry};

use crate::dispose::Subscription;
use crate::errors::{ClientError, HostError};
use crate::host::{
    Decoration, DecorationSink, DecorationType, HostModel, ProgressFactory, ProgressReporter,
    ProgressUpdate, Provider, ProviderKind, ProviderRequest, ProviderResponse, ProviderSink,
    TextDocument, ViewComponent, ViewId, WindowModel, Workspace, WorkspaceRoot,
};
use crate::lock;

/// A provider registration observed by the host.
#[derive(Clone)]
pub struct RegisteredProvider {
    /// Provider category.
    pub kind: ProviderKind,
    /// Selector the provider was registered for.
    pub selector: DocumentSelector,
    provider: Arc<dyn Provider>,
    active: Arc<AtomicBool>,
}

impl RegisteredProvider {
    /// Returns `true` until the registration's subscription is disposed.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// What a progress reporter has been told.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReporterRecord {
    /// Title the reporter was created with.
    pub title: Option<String>,
    /// Updates in arrival order.
    pub updates: Vec<ProgressUpdate>,
    /// Whether the reporter was completed.
    pub completed: bool,
    /// How many times `complete` was called.
    pub completions: usize,
}

struct RecordingReporter {
    record: Arc<Mutex<ReporterRecord>>,
}

impl ProgressReporter for RecordingReporter {
    fn report(&mut self, update: ProgressUpdate) {
        lock(&self.record).updates.push(update);
    }

    fn complete(self: Box<Self>) {
        let mut record = lock(&self.record);
        record.completed = true;
        record.completions += 1;
    }
}

#[derive(Default)]
struct HostState {
    roots: Vec<WorkspaceRoot>,
    root_listeners: Vec<UnboundedSender<()>>,
    documents: Vec<TextDocument>,
    open_listeners: Vec<UnboundedSender<TextDocument>>,
    providers: Vec<RegisteredProvider>,
    decoration_types: u64,
    decorations: HashMap<(ViewId, DecorationType), Vec<Decoration>>,
    views: Vec<ViewComponent>,
    reporters: Vec<Arc<Mutex<ReporterRecord>>>,
    reporter_failures: usize,
}

/// In-memory host used by the client tests.
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    /// Creates a host with the given roots.
    pub fn with_roots(roots: &[&str]) -> Arc<Self> {
        let host = Arc::new(Self::default());
        lock(&host.state).roots = roots.iter().map(|root| WorkspaceRoot::new(url(root))).collect();
        host
    }

    /// Bundles this host into the collaborator set `register` expects.
    pub fn model(self: &Arc<Self>) -> HostModel {
        HostModel {
            workspace: Arc::clone(self) as Arc<dyn Workspace>,
            providers: Arc::clone(self) as Arc<dyn ProviderSink>,
            decorations: Arc::clone(self) as Arc<dyn DecorationSink>,
            window: Arc::clone(self) as Arc<dyn WindowModel>,
            progress: Arc::clone(self) as Arc<dyn ProgressFactory>,
        }
    }

    /// Replaces the roots and notifies listeners.
    pub fn set_roots(&self, roots: &[&str]) {
        let mut state = lock(&self.state);
        state.roots = roots.iter().map(|root| WorkspaceRoot::new(url(root))).collect();
        state
            .root_listeners
            .retain(|listener| listener.unbounded_send(()).is_ok());
    }

    /// Records a document without announcing it, as if open before startup.
    pub fn add_document(&self, uri: &str, language_id: &str, text: &str) {
        lock(&self.state).documents.push(document(uri, language_id, text));
    }

    /// Opens a document and notifies listeners.
    pub fn open_document(&self, uri: &str, language_id: &str, text: &str) {
        let opened = document(uri, language_id, text);
        let mut state = lock(&self.state);
        state.documents.push(opened.clone());
        state
            .open_listeners
            .retain(|listener| listener.unbounded_send(opened.clone()).is_ok());
    }

    /// Makes a view showing `uri` visible.
    pub fn show(&self, uri: &str) -> ViewComponent {
        let mut state = lock(&self.state);
        let view = ViewComponent {
            id: ViewId(state.views.len() as u64 + 1),
            document: url(uri),
        };
        state.views.push(view.clone());
        view
    }

    /// Every provider registration, active or not.
    pub fn providers(&self) -> Vec<RegisteredProvider> {
        lock(&self.state).providers.clone()
    }

    /// Active registrations of `kind`.
    pub fn active_providers(&self, kind: ProviderKind) -> Vec<RegisteredProvider> {
        self.providers()
            .into_iter()
            .filter(|registered| registered.kind == kind && registered.is_active())
            .collect()
    }

    /// Number of active registrations of any kind.
    pub fn active_provider_count(&self) -> usize {
        self.providers()
            .iter()
            .filter(|registered| registered.is_active())
            .count()
    }

    /// Invokes the first active provider of `kind` whose selector matches
    /// `document`, as the host would when the user asks for it.
    pub async fn invoke(
        &self,
        kind: ProviderKind,
        document: &str,
        line: u32,
        character: u32,
    ) -> Result<ProviderResponse, ClientError> {
        let target = url(document);
        let language = self.language_of(&target);
        let provider = self
            .active_providers(kind)
            .into_iter()
            .find(|registered| selector_matches(&registered.selector, &target, language.as_deref()))
            .map(|registered| registered.provider)
            .unwrap_or_else(|| panic!("no active {kind} provider matches {document}"));
        provider
            .provide(ProviderRequest::new(target, Position::new(line, character)))
            .await
    }

    /// Latest decorations rendered in `view`, across decoration types.
    pub fn decorations(&self, view: &ViewComponent) -> Vec<Decoration> {
        lock(&self.state)
            .decorations
            .iter()
            .filter(|((id, _), _)| *id == view.id)
            .flat_map(|(_, decorations)| decorations.clone())
            .collect()
    }

    /// Whether any decorations were ever set for `view`.
    pub fn has_rendered(&self, view: &ViewComponent) -> bool {
        lock(&self.state)
            .decorations
            .keys()
            .any(|(id, _)| *id == view.id)
    }

    /// Snapshots of every reporter created so far.
    pub fn reporters(&self) -> Vec<ReporterRecord> {
        lock(&self.state)
            .reporters
            .iter()
            .map(|record| lock(record).clone())
            .collect()
    }

    /// Makes the next `count` reporter creations fail.
    pub fn fail_reporters(&self, count: usize) {
        lock(&self.state).reporter_failures = count;
    }

    fn language_of(&self, document: &Url) -> Option<String> {
        lock(&self.state)
            .documents
            .iter()
            .find(|known| &known.uri == document)
            .map(|known| known.language_id.clone())
    }
}

impl Workspace for FakeHost {
    fn roots(&self) -> Vec<WorkspaceRoot> {
        lock(&self.state).roots.clone()
    }

    fn root_changes(&self) -> BoxStream<'static, ()> {
        let (sender, receiver) = unbounded();
        lock(&self.state).root_listeners.push(sender);
        receiver.boxed()
    }

    fn text_documents(&self) -> Vec<TextDocument> {
        lock(&self.state).documents.clone()
    }

    fn opened_documents(&self) -> BoxStream<'static, TextDocument> {
        let (sender, receiver) = unbounded();
        lock(&self.state).open_listeners.push(sender);
        receiver.boxed()
    }
}

impl ProviderSink for FakeHost {
    fn register_provider(
        &self,
        kind: ProviderKind,
        selector: DocumentSelector,
        provider: Arc<dyn Provider>,
    ) -> Subscription {
        let active = Arc::new(AtomicBool::new(true));
        lock(&self.state).providers.push(RegisteredProvider {
            kind,
            selector,
            provider,
            active: Arc::clone(&active),
        });
        Subscription::new(move || active.store(false, Ordering::SeqCst))
    }
}

impl DecorationSink for FakeHost {
    fn create_decoration_type(&self) -> DecorationType {
        let mut state = lock(&self.state);
        state.decoration_types += 1;
        DecorationType(state.decoration_types)
    }

    fn set_decorations(
        &self,
        view: &ViewComponent,
        decoration_type: DecorationType,
        decorations: Vec<Decoration>,
    ) {
        lock(&self.state)
            .decorations
            .insert((view.id, decoration_type), decorations);
    }
}

impl WindowModel for FakeHost {
    fn visible_views(&self) -> Vec<ViewComponent> {
        lock(&self.state).views.clone()
    }
}

#[async_trait]
impl ProgressFactory for FakeHost {
    async fn create_reporter(
        &self,
        title: Option<String>,
    ) -> Result<Box<dyn ProgressReporter>, HostError> {
        tokio::task::yield_now().await;
        let mut state = lock(&self.state);
        if state.reporter_failures > 0 {
            state.reporter_failures -= 1;
            return Err(HostError::new("progress is unavailable"));
        }
        let record = Arc::new(Mutex::new(ReporterRecord {
            title,
            ..ReporterRecord::default()
        }));
        state.reporters.push(Arc::clone(&record));
        Ok(Box::new(RecordingReporter { record }))
    }
}

/// Parses a URL literal used in a test.
pub fn url(text: &str) -> Url {
    Url::parse(text).unwrap_or_else(|error| panic!("invalid test URL {text}: {error}"))
}

fn document(uri: &str, language_id: &str, text: &str) -> TextDocument {
    TextDocument {
        uri: url(uri),
        language_id: language_id.to_owned(),
        text: text.to_owned(),
    }
}

// Approximates host selector matching: every present field must match and
// patterns support a trailing `**`.
fn selector_matches(selector: &[SelectorEntry], document: &Url, language: Option<&str>) -> bool {
    selector
        .iter()
        .cloned()
        .map(SelectorEntry::into_filter)
        .any(|filter| filter_matches(&filter, document, language))
}

fn filter_matches(filter: &DocumentFilter, document: &Url, language: Option<&str>) -> bool {
    let language_ok = filter
        .language
        .as_deref()
        .is_none_or(|wanted| language == Some(wanted));
    let scheme_ok = filter
        .scheme
        .as_deref()
        .is_none_or(|wanted| document.scheme() == wanted);
    let pattern_ok = filter.pattern.as_deref().is_none_or(|pattern| {
        pattern.strip_suffix("**").map_or_else(
            || pattern == document.as_str(),
            |prefix| document.as_str().starts_with(prefix),
        )
    });
    language_ok && scheme_ok && pattern_ok
}
