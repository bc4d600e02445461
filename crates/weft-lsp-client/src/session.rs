//! One connection's lifecycle: startup, registrations, projections and
//! teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lsp_types::notification::{DidOpenTextDocument, Initialized};
use lsp_types::request::{Initialize, RegisterCapability, Request as _, UnregisterCapability};
use lsp_types::{
    ClientCapabilities, ClientInfo, DidOpenTextDocumentParams, DynamicRegistrationClientCapabilities,
    GotoCapability, HoverClientCapabilities, InitializeParams, InitializedParams, MarkupKind,
    PublishDiagnosticsClientCapabilities, Registration, RegistrationParams,
    TextDocumentClientCapabilities, TextDocumentItem, UnregistrationParams,
    WorkspaceClientCapabilities, WorkspaceFolder,
};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::ClientOptions;
use crate::connection::Connection;
use crate::dispose::Subscription;
use crate::errors::ClientError;
use crate::feature::{FeatureScope, static_registrations};
use crate::host::HostModel;
use crate::lock;
use crate::projectors::{DiagnosticsProjector, ProgressProjector, forward_log_messages};
use crate::registration::RegistrationTable;
use crate::selector::as_directory;
use crate::transport::{Channel, Connector};

const SESSION_TARGET: &str = "weft_lsp_client::session";

/// Initial version reported for documents synchronised at startup.
const INITIAL_DOCUMENT_VERSION: i32 = 1;

static NO_CAPABILITIES: Value = Value::Null;

/// Everything a session needs from the client that owns it.
pub(crate) struct SessionContext {
    pub(crate) host: HostModel,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) options: ClientOptions,
}

struct SessionInner {
    root: Option<Url>,
    connection: Connection,
    registrations: RegistrationTable,
    diagnostics: DiagnosticsProjector,
    progress: ProgressProjector,
    tasks: Mutex<Vec<Subscription>>,
    disposed: AtomicBool,
}

/// A connection plus the host state derived from it.
#[derive(Clone)]
pub(crate) struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Connects and initialises a session.
    ///
    /// `root` scopes registrations and document sync; `None` serves every
    /// root. On failure the half-built session is torn down.
    pub(crate) async fn open(
        context: &Arc<SessionContext>,
        root: Option<Url>,
        workspace_folders: Option<Vec<WorkspaceFolder>>,
    ) -> Result<Self, ClientError> {
        let session = Self::connect(context, root).await?;
        session.handshake(context, workspace_folders).await?;
        Ok(session)
    }

    /// Connects and wires the projections without initialising the server.
    pub(crate) async fn connect(
        context: &Arc<SessionContext>,
        root: Option<Url>,
    ) -> Result<Self, ClientError> {
        let channel = context.connector.connect().await?;
        Ok(Self::attach(context, root, channel))
    }

    /// Runs `initialize`/`initialized`, document sync and static
    /// registrations. The session is disposed if any step fails.
    pub(crate) async fn handshake(
        &self,
        context: &Arc<SessionContext>,
        workspace_folders: Option<Vec<WorkspaceFolder>>,
    ) -> Result<(), ClientError> {
        let outcome = self.initialize(context, workspace_folders).await;
        if outcome.is_err() {
            self.dispose();
        }
        outcome
    }

    fn attach(context: &Arc<SessionContext>, root: Option<Url>, channel: Channel) -> Self {
        let connection = Connection::new(channel);
        let host = &context.host;
        let diagnostics = DiagnosticsProjector::new(
            Arc::clone(&host.decorations),
            Arc::clone(&host.window),
            context.options.rewriter().clone(),
        );
        let progress = ProgressProjector::new(
            Arc::clone(&host.progress),
            context.options.config().progress_suffix.as_str(),
        );
        let tasks = vec![
            forward_log_messages(&connection),
            diagnostics.spawn(&connection, host.workspace.opened_documents()),
            progress.spawn(&connection),
        ];
        let session = Self {
            inner: Arc::new(SessionInner {
                root,
                connection,
                registrations: RegistrationTable::new(),
                diagnostics,
                progress,
                tasks: Mutex::new(tasks),
                disposed: AtomicBool::new(false),
            }),
        };
        session.watch_close();
        session.install_registration_handlers(context);
        session.inner.connection.start();
        session
    }

    async fn initialize(
        &self,
        context: &Arc<SessionContext>,
        workspace_folders: Option<Vec<WorkspaceFolder>>,
    ) -> Result<(), ClientError> {
        let connection = &self.inner.connection;
        let params = self.initialize_params(&context.options, workspace_folders)?;
        info!(
            target: SESSION_TARGET,
            connection = connection.id(),
            root = ?self.inner.root.as_ref().map(Url::as_str),
            "initializing language server"
        );
        let result = connection.request(Initialize::METHOD, params).await?;
        debug!(
            target: SESSION_TARGET,
            connection = connection.id(),
            server = ?result.get("serverInfo"),
            "language server initialized"
        );
        connection.send_notification::<Initialized>(InitializedParams {})?;
        self.sync_documents(context)?;
        let capabilities = result.get("capabilities").unwrap_or(&NO_CAPABILITIES);
        let registrations =
            static_registrations(capabilities, &context.options.config().document_selector)?;
        if let Err(error) = self.install_all(context, &registrations) {
            warn!(
                target: SESSION_TARGET,
                connection = connection.id(),
                %error,
                "failed to install static registrations"
            );
        }
        Ok(())
    }

    #[expect(deprecated, reason = "rootUri is still how single-root servers learn their root")]
    fn initialize_params(
        &self,
        options: &ClientOptions,
        workspace_folders: Option<Vec<WorkspaceFolder>>,
    ) -> Result<Value, ClientError> {
        let root_uri = self
            .inner
            .root
            .as_ref()
            .map(|root| options.rewriter().to_protocol(root))
            .transpose()?;
        let params = InitializeParams {
            process_id: None,
            root_uri,
            initialization_options: options.config().initialization_options.clone(),
            capabilities: client_capabilities(options.config().is_multi_root()),
            workspace_folders,
            client_info: Some(ClientInfo {
                name: env!("CARGO_PKG_NAME").to_owned(),
                version: Some(env!("CARGO_PKG_VERSION").to_owned()),
            }),
            ..InitializeParams::default()
        };
        let mut encoded = serde_json::to_value(params)
            .map_err(|source| ClientError::codec(Initialize::METHOD, source))?;
        if let Value::Object(map) = &mut encoded {
            map.entry("workspaceFolders").or_insert(Value::Null);
        }
        Ok(encoded)
    }

    fn sync_documents(&self, context: &SessionContext) -> Result<(), ClientError> {
        for document in context.host.workspace.text_documents() {
            if !self.covers(&document.uri) {
                continue;
            }
            let uri = context.options.rewriter().to_protocol(&document.uri)?;
            self.inner
                .connection
                .send_notification::<DidOpenTextDocument>(DidOpenTextDocumentParams {
                    text_document: TextDocumentItem::new(
                        uri,
                        document.language_id,
                        INITIAL_DOCUMENT_VERSION,
                        document.text,
                    ),
                })?;
        }
        Ok(())
    }

    fn install_registration_handlers(&self, context: &Arc<SessionContext>) {
        let weak = Arc::downgrade(&self.inner);
        let shared = Arc::clone(context);
        self.inner
            .connection
            .on_request::<RegisterCapability, _, _>(move |params: RegistrationParams| {
                let upgraded = weak.upgrade().map(|inner| Self { inner });
                let context = Arc::clone(&shared);
                async move {
                    let session = upgraded.ok_or(ClientError::ConnectionClosed)?;
                    session.install_all(&context, &params.registrations)
                }
            });
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .connection
            .on_request::<UnregisterCapability, _, _>(move |params: UnregistrationParams| {
                let upgraded = weak.upgrade().map(|inner| Self { inner });
                async move {
                    let session = upgraded.ok_or(ClientError::ConnectionClosed)?;
                    for unregistration in &params.unregisterations {
                        if !session.inner.registrations.remove(&unregistration.id) {
                            debug!(
                                target: SESSION_TARGET,
                                connection = session.inner.connection.id(),
                                id = %unregistration.id,
                                "ignoring unregistration for unknown id"
                            );
                        }
                    }
                    Ok(())
                }
            });
    }

    /// Installs each registration in order; failures are logged and the first
    /// one is returned once every registration has been attempted.
    fn install_all(
        &self,
        context: &SessionContext,
        registrations: &[Registration],
    ) -> Result<(), ClientError> {
        if self.is_disposed() {
            return Ok(());
        }
        let scope = FeatureScope {
            connection: self.inner.connection.clone(),
            root: self.inner.root.clone(),
            rewriter: context.options.rewriter().clone(),
            providers: Arc::clone(&context.host.providers),
        };
        let mut first_error = None;
        for registration in registrations {
            let installed = self
                .inner
                .registrations
                .install(registration, |feature, options| {
                    feature.register(&scope, options)
                });
            if let Err(error) = installed {
                warn!(
                    target: SESSION_TARGET,
                    connection = self.inner.connection.id(),
                    id = %registration.id,
                    method = %registration.method,
                    %error,
                    "failed to install registration"
                );
                first_error.get_or_insert(error);
            }
        }
        if self.is_disposed() {
            self.inner.registrations.clear();
        }
        first_error.map_or(Ok(()), Err)
    }

    fn watch_close(&self) {
        let closed = self.inner.connection.closed();
        let weak = Arc::downgrade(&self.inner);
        let watcher = tokio::spawn(async move {
            closed.await;
            if let Some(inner) = weak.upgrade() {
                Self { inner }.dispose();
            }
        });
        lock(&self.inner.tasks).push(Subscription::from_task(watcher));
    }

    fn covers(&self, document: &Url) -> bool {
        self.inner
            .root
            .as_ref()
            .is_none_or(|root| is_under(document, root))
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Tears the session down once: registrations, projections, reporters
    /// and finally the connection.
    pub(crate) fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let removed = self.inner.registrations.clear();
        let tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        for task in tasks {
            task.unsubscribe();
        }
        self.inner.diagnostics.clear();
        self.inner.progress.complete_all();
        self.inner.connection.close();
        info!(
            target: SESSION_TARGET,
            connection = self.inner.connection.id(),
            root = ?self.inner.root.as_ref().map(Url::as_str),
            registrations = removed,
            "session disposed"
        );
    }
}

/// Returns `true` when `document` lies inside the directory named by `root`.
pub(crate) fn is_under(document: &Url, root: &Url) -> bool {
    document == root || document.as_str().starts_with(as_directory(root).as_str())
}

fn client_capabilities(multi_root: bool) -> ClientCapabilities {
    let dynamic_registration = Some(true);
    let goto = GotoCapability {
        dynamic_registration,
        link_support: Some(true),
    };
    ClientCapabilities {
        workspace: Some(WorkspaceClientCapabilities {
            workspace_folders: Some(multi_root),
            ..WorkspaceClientCapabilities::default()
        }),
        text_document: Some(TextDocumentClientCapabilities {
            hover: Some(HoverClientCapabilities {
                dynamic_registration,
                content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
            }),
            references: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration,
            }),
            definition: Some(goto.clone()),
            type_definition: Some(goto.clone()),
            implementation: Some(goto),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities::default()),
            ..TextDocumentClientCapabilities::default()
        }),
        ..ClientCapabilities::default()
    }
}
