//! One session per workspace root.

use std::collections::HashMap;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared, join_all};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tracing::{debug, error, info};
use url::Url;

use super::CLIENT_TARGET;
use super::folders::diff_roots;
use crate::connection::Connection;
use crate::dispose::Subscription;
use crate::errors::ClientError;
use crate::host::WorkspaceRoot;
use crate::lock;
use crate::session::{Session, SessionContext};

type PendingSession = Shared<BoxFuture<'static, Option<Session>>>;

/// How far a root's session got; shared between its opening task and
/// removals.
enum Startup {
    Connecting,
    Attached(Session),
    Cancelled,
}

struct RootEntry {
    generation: u64,
    startup: Arc<Mutex<Startup>>,
    session: PendingSession,
}

impl RootEntry {
    /// Disposes the session, or makes the opening task drop it once the
    /// transport connects. A pending `initialize` fails with
    /// [`ClientError::ConnectionClosed`].
    fn cancel(&self) {
        let previous = mem::replace(&mut *lock(&self.startup), Startup::Cancelled);
        if let Startup::Attached(session) = previous {
            session.dispose();
        }
    }
}

struct SingleRootState {
    context: Arc<SessionContext>,
    sessions: Mutex<HashMap<Url, RootEntry>>,
    next_generation: AtomicU64,
}

impl SingleRootState {
    /// Starts opening a session for `root` unless one is already tracked.
    ///
    /// The returned future resolves to `None` when the session could not be
    /// opened; the failure is logged and the root forgotten so a later
    /// root-change event can retry.
    fn add_root(self: &Arc<Self>, root: &Url) -> PendingSession {
        let mut sessions = lock(&self.sessions);
        if let Some(entry) = sessions.get(root) {
            return entry.session.clone();
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let startup = Arc::new(Mutex::new(Startup::Connecting));
        let state = Arc::clone(self);
        let slot = Arc::clone(&startup);
        let key = root.clone();
        let pending = async move {
            match open_root(&state.context, &key, &slot).await {
                Ok(session) => {
                    info!(target: CLIENT_TARGET, root = %key, "root session ready");
                    Some(session)
                }
                Err(_) if matches!(*lock(&slot), Startup::Cancelled) => {
                    debug!(
                        target: CLIENT_TARGET,
                        root = %key,
                        "root removed before its session was ready"
                    );
                    None
                }
                Err(error) => {
                    error!(
                        target: CLIENT_TARGET,
                        root = %key,
                        %error,
                        "failed to open root session"
                    );
                    state.forget(&key, generation);
                    None
                }
            }
        }
        .boxed()
        .shared();
        sessions.insert(
            root.clone(),
            RootEntry {
                generation,
                startup,
                session: pending.clone(),
            },
        );
        drop(sessions);
        tokio::spawn(pending.clone());
        pending
    }

    /// Stops tracking `root` and disposes its session without waiting for
    /// it to finish starting.
    fn remove_root(&self, root: &Url) {
        let entry = lock(&self.sessions).remove(root);
        if let Some(removed) = entry {
            removed.cancel();
            info!(target: CLIENT_TARGET, root = %root, "root session disposed");
        }
    }

    /// Takes the tracked session for `root`, if it opened successfully and
    /// is still live.
    async fn take_session(&self, root: &Url) -> Option<Session> {
        let tracked = lock(&self.sessions)
            .get(root)
            .map(|entry| (entry.generation, entry.session.clone()));
        let (generation, pending) = tracked?;
        let session = pending.await?;
        self.forget(root, generation);
        (!session.is_disposed()).then_some(session)
    }

    fn forget(&self, root: &Url, generation: u64) {
        let mut sessions = lock(&self.sessions);
        if sessions
            .get(root)
            .is_some_and(|entry| entry.generation == generation)
        {
            sessions.remove(root);
        }
    }

    fn drain(&self) -> Vec<RootEntry> {
        lock(&self.sessions)
            .drain()
            .map(|(_, entry)| entry)
            .collect()
    }
}

async fn open_root(
    context: &Arc<SessionContext>,
    root: &Url,
    startup: &Mutex<Startup>,
) -> Result<Session, ClientError> {
    let session = Session::connect(context, Some(root.clone())).await?;
    let cancelled = {
        let mut slot = lock(startup);
        let cancelled = matches!(*slot, Startup::Cancelled);
        if !cancelled {
            *slot = Startup::Attached(session.clone());
        }
        cancelled
    };
    if cancelled {
        session.dispose();
        return Err(ClientError::ConnectionClosed);
    }
    session.handshake(context, None).await?;
    Ok(session)
}

pub(crate) struct SingleRootManager {
    state: Arc<SingleRootState>,
    reconciler: Mutex<Option<Subscription>>,
}

impl SingleRootManager {
    /// Opens a session for every current root, waiting for all of them, then
    /// follows root changes.
    pub(crate) async fn start(context: Arc<SessionContext>) -> Self {
        let workspace = Arc::clone(&context.host.workspace);
        let changes = workspace.root_changes();
        let initial = workspace.roots();
        let state = Arc::new(SingleRootState {
            context,
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        });
        let pending: Vec<PendingSession> = initial
            .iter()
            .map(|root| state.add_root(&root.uri))
            .collect();
        join_all(pending).await;
        let reconciler = spawn_reconciler(Arc::clone(&state), initial, changes);
        Self {
            state,
            reconciler: Mutex::new(Some(reconciler)),
        }
    }

    /// Runs `f` against the session for `root` and disposes that session
    /// afterwards, whether or not `f` succeeded.
    pub(crate) async fn with_connection<F, Fut, T>(&self, root: &Url, f: F) -> Result<T, ClientError>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let session = match self.state.take_session(root).await {
            Some(session) => session,
            None => Session::open(&self.state.context, Some(root.clone()), None).await?,
        };
        let result = f(session.connection().clone()).await;
        session.dispose();
        result
    }

    pub(crate) fn shutdown(&self) {
        let reconciler = lock(&self.reconciler).take();
        if let Some(task) = reconciler {
            task.unsubscribe();
        }
        for entry in self.state.drain() {
            entry.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_roots(&self) -> Vec<Url> {
        lock(&self.state.sessions).keys().cloned().collect()
    }
}

fn spawn_reconciler(
    state: Arc<SingleRootState>,
    initial: Vec<WorkspaceRoot>,
    mut changes: BoxStream<'static, ()>,
) -> Subscription {
    let workspace = Arc::clone(&state.context.host.workspace);
    Subscription::from_task(tokio::spawn(async move {
        let mut before = initial;
        while changes.next().await.is_some() {
            let after = workspace.roots();
            let diff = diff_roots(&before, &after);
            for root in &diff.removed {
                state.remove_root(root);
            }
            for root in &diff.added {
                drop(state.add_root(root));
            }
            before = after;
        }
    }))
}
