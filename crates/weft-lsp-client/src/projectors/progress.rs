//! Maps `window/progress` tokens onto host progress reporters.
//!
//! One reporter exists per live token. The slot for a token is inserted
//! before the host is asked for a reporter, so notifications racing the
//! creation share it instead of creating a second reporter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::OnceCell;
use tracing::{debug, error};

use crate::connection::Connection;
use crate::dispose::Subscription;
use crate::errors::HostError;
use crate::host::{ProgressFactory, ProgressReporter, ProgressUpdate};
use crate::lock;
use crate::protocol::{WindowProgress, WindowProgressParams};

const PROGRESS_TARGET: &str = "weft_lsp_client::progress";

type SharedReporter = Arc<Mutex<Option<Box<dyn ProgressReporter>>>>;
type ReporterSlot = Arc<OnceCell<SharedReporter>>;

struct ProgressState {
    factory: Arc<dyn ProgressFactory>,
    suffix: String,
    reporters: Mutex<HashMap<String, ReporterSlot>>,
    closed: AtomicBool,
}

#[derive(Clone)]
pub(crate) struct ProgressProjector {
    state: Arc<ProgressState>,
}

impl ProgressProjector {
    pub(crate) fn new(factory: Arc<dyn ProgressFactory>, suffix: impl Into<String>) -> Self {
        Self {
            state: Arc::new(ProgressState {
                factory,
                suffix: suffix.into(),
                reporters: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Applies one notification.
    ///
    /// Creates the token's reporter on first sight, forwards the update, and
    /// completes and forgets the reporter on `done`. After
    /// [`ProgressProjector::complete_all`] notifications are ignored.
    pub(crate) async fn handle(&self, params: WindowProgressParams) -> Result<(), HostError> {
        if self.is_closed() {
            return Ok(());
        }
        let done = params.is_done();
        let forward = params.has_update() || !done;
        let slot = Arc::clone(
            lock(&self.state.reporters)
                .entry(params.id.clone())
                .or_default(),
        );
        let factory = Arc::clone(&self.state.factory);
        let title = params
            .title
            .map(|title| format!("{title}{}", self.state.suffix));
        let created = slot
            .get_or_try_init(|| async move {
                debug!(target: PROGRESS_TARGET, title = ?title, "creating progress reporter");
                let reporter = factory.create_reporter(title).await?;
                Ok::<_, HostError>(Arc::new(Mutex::new(Some(reporter))))
            })
            .await;
        let reporter = match created {
            Ok(reporter) => Arc::clone(reporter),
            Err(error) => {
                self.evict(&params.id, &slot);
                return Err(error);
            }
        };
        if self.is_closed() {
            complete(&reporter);
            return Ok(());
        }
        if forward && let Some(active) = lock(&reporter).as_mut() {
            active.report(ProgressUpdate {
                percentage: params.percentage,
                message: params.message,
            });
        }
        if done {
            self.evict(&params.id, &slot);
            complete(&reporter);
        }
        Ok(())
    }

    /// Completes every live reporter and ignores later notifications.
    pub(crate) fn complete_all(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        let slots: Vec<ReporterSlot> = lock(&self.state.reporters)
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        for slot in slots {
            if let Some(reporter) = slot.get() {
                complete(reporter);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn live_tokens(&self) -> usize {
        lock(&self.state.reporters).len()
    }

    pub(crate) fn spawn(&self, connection: &Connection) -> Subscription {
        let mut notifications = connection.observe::<WindowProgress>();
        let projector = self.clone();
        Subscription::from_task(tokio::spawn(async move {
            while let Some(params) = notifications.next().await {
                let id = params.id.clone();
                if let Err(error) = projector.handle(params).await {
                    error!(
                        target: PROGRESS_TARGET,
                        id = %id,
                        %error,
                        "failed to create progress reporter"
                    );
                }
            }
        }))
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn evict(&self, id: &str, slot: &ReporterSlot) {
        let mut reporters = lock(&self.state.reporters);
        if reporters
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            reporters.remove(id);
        }
    }
}

fn complete(reporter: &SharedReporter) {
    let finished = lock(reporter).take();
    if let Some(active) = finished {
        active.complete();
    }
}
