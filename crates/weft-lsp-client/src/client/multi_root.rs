//! One shared session announcing roots through workspace-folder changes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use futures::stream::BoxStream;
use lsp_types::notification::DidChangeWorkspaceFolders;
use lsp_types::{DidChangeWorkspaceFoldersParams, WorkspaceFolder, WorkspaceFoldersChangeEvent};
use tracing::{debug, warn};
use url::Url;

use super::CLIENT_TARGET;
use super::folders::{RootDiff, diff_roots, workspace_folder};
use crate::connection::Connection;
use crate::dispose::Subscription;
use crate::errors::ClientError;
use crate::lock;
use crate::session::{Session, SessionContext};
use crate::uri::UriRewriter;

/// Roots the server has been told about.
#[derive(Default)]
struct Folders {
    /// Host roots as last announced.
    announced: Vec<Url>,
    /// Roots announced on behalf of `with_connection` callers, with the
    /// number of callers still using each.
    lent: HashMap<Url, usize>,
}

impl Folders {
    fn is_lent(&self, root: &Url) -> bool {
        self.lent.contains_key(root)
    }
}

pub(crate) struct MultiRootManager {
    context: Arc<SessionContext>,
    session: Session,
    folders: Arc<Mutex<Folders>>,
    reconciler: Mutex<Option<Subscription>>,
}

/// A root announced for one `with_connection` call; withdrawn on drop once
/// no caller uses it and the host has not adopted it.
struct LentRoot<'a> {
    manager: &'a MultiRootManager,
    root: Url,
    folder: WorkspaceFolder,
}

impl Drop for LentRoot<'_> {
    fn drop(&mut self) {
        let mut folders = lock(&self.manager.folders);
        let remaining = folders.lent.get_mut(&self.root).map(|count| {
            *count = count.saturating_sub(1);
            *count
        });
        if remaining != Some(0) {
            return;
        }
        folders.lent.remove(&self.root);
        if folders.announced.contains(&self.root) {
            return;
        }
        let connection = self.manager.session.connection();
        if let Err(error) = announce(connection, Vec::new(), vec![self.folder.clone()]) {
            warn!(
                target: CLIENT_TARGET,
                root = %self.root,
                %error,
                "failed to withdraw temporary workspace folder"
            );
        }
    }
}

impl MultiRootManager {
    /// Opens the shared session announcing the current roots, then follows
    /// root changes.
    pub(crate) async fn start(context: Arc<SessionContext>) -> Result<Self, ClientError> {
        let workspace = Arc::clone(&context.host.workspace);
        let changes = workspace.root_changes();
        let folders = workspace
            .roots()
            .iter()
            .map(|root| workspace_folder(&root.uri, context.options.rewriter()))
            .collect::<Result<Vec<_>, _>>()?;
        let session = Session::open(&context, None, Some(folders)).await?;
        let known = Arc::new(Mutex::new(Folders {
            announced: workspace.roots().into_iter().map(|root| root.uri).collect(),
            lent: HashMap::new(),
        }));
        let reconciler = spawn_reconciler(
            &context,
            session.connection().clone(),
            Arc::clone(&known),
            changes,
        );
        Ok(Self {
            context,
            session,
            folders: known,
            reconciler: Mutex::new(Some(reconciler)),
        })
    }

    /// Runs `f` against the shared connection, announcing `root` for the
    /// duration of the call when the server has not been told about it.
    pub(crate) async fn with_connection<F, Fut, T>(&self, root: &Url, f: F) -> Result<T, ClientError>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let connection = self.session.connection().clone();
        let lent = self.lend(root)?;
        let result = f(connection).await;
        drop(lent);
        result
    }

    /// Announces `root` unless the host already has it announced.
    fn lend(&self, root: &Url) -> Result<Option<LentRoot<'_>>, ClientError> {
        let mut folders = lock(&self.folders);
        if folders.announced.contains(root) {
            return Ok(None);
        }
        let folder = workspace_folder(root, self.context.options.rewriter())?;
        if !folders.is_lent(root) {
            debug!(
                target: CLIENT_TARGET,
                root = %root,
                "temporarily announcing workspace folder"
            );
            announce(self.session.connection(), vec![folder.clone()], Vec::new())?;
        }
        *folders.lent.entry(root.clone()).or_insert(0) += 1;
        Ok(Some(LentRoot {
            manager: self,
            root: root.clone(),
            folder,
        }))
    }

    pub(crate) fn shutdown(&self) {
        let reconciler = lock(&self.reconciler).take();
        if let Some(task) = reconciler {
            task.unsubscribe();
        }
        self.session.dispose();
    }
}

fn spawn_reconciler(
    context: &Arc<SessionContext>,
    connection: Connection,
    folders: Arc<Mutex<Folders>>,
    mut changes: BoxStream<'static, ()>,
) -> Subscription {
    let workspace = Arc::clone(&context.host.workspace);
    let rewriter = context.options.rewriter().clone();
    Subscription::from_task(tokio::spawn(async move {
        let mut before = Vec::new();
        loop {
            let after = workspace.roots();
            let mut diff = diff_roots(&before, &after);
            {
                let mut known = lock(&folders);
                diff.added.retain(|root| !known.is_lent(root));
                diff.removed.retain(|root| !known.is_lent(root));
                if !diff.is_empty()
                    && let Err(error) = publish_diff(&connection, &rewriter, &diff)
                {
                    warn!(
                        target: CLIENT_TARGET,
                        %error,
                        "failed to announce workspace folder changes"
                    );
                }
                known.announced = after.iter().map(|root| root.uri.clone()).collect();
            }
            before = after;
            if changes.next().await.is_none() {
                break;
            }
        }
    }))
}

fn publish_diff(
    connection: &Connection,
    rewriter: &UriRewriter,
    diff: &RootDiff,
) -> Result<(), ClientError> {
    let convert = |uris: &[Url]| {
        uris.iter()
            .map(|uri| workspace_folder(uri, rewriter))
            .collect::<Result<Vec<_>, _>>()
    };
    debug!(
        target: CLIENT_TARGET,
        added = diff.added.len(),
        removed = diff.removed.len(),
        "announcing workspace folder changes"
    );
    announce(connection, convert(&diff.added)?, convert(&diff.removed)?)
}

fn announce(
    connection: &Connection,
    added: Vec<WorkspaceFolder>,
    removed: Vec<WorkspaceFolder>,
) -> Result<(), ClientError> {
    connection.send_notification::<DidChangeWorkspaceFolders>(DidChangeWorkspaceFoldersParams {
        event: WorkspaceFoldersChangeEvent { added, removed },
    })
}
