//! Idempotent teardown handles.

use std::fmt;

use tokio::task::JoinHandle;

type Teardown = Box<dyn FnOnce() + Send>;

/// Handle whose teardown runs exactly once.
///
/// The teardown runs on [`Subscription::unsubscribe`] or, failing that, when
/// the handle is dropped.
#[must_use = "dropping a subscription runs its teardown immediately"]
pub struct Subscription {
    teardown: Option<Teardown>,
}

impl Subscription {
    /// Wraps a teardown closure.
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A subscription with nothing to tear down.
    pub const fn empty() -> Self {
        Self { teardown: None }
    }

    /// Aborts the task when the subscription ends.
    pub fn from_task<T: Send + 'static>(handle: JoinHandle<T>) -> Self {
        Self::new(move || handle.abort())
    }

    /// Runs the teardown now.
    pub fn unsubscribe(mut self) {
        self.run();
    }

    /// Returns `true` once the teardown has run or if there never was one.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.teardown.is_none()
    }

    fn run(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}
