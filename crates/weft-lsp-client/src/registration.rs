//! Active capability registrations of one session, keyed by registration id.

use std::collections::HashMap;
use std::sync::Mutex;

use lsp_types::Registration;
use tracing::debug;

use crate::dispose::Subscription;
use crate::errors::ClientError;
use crate::feature::{Feature, RegisterOptions, feature_for};
use crate::lock;

const REGISTRATION_TARGET: &str = "weft_lsp_client::registration";

/// Result of [`RegistrationTable::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstallOutcome {
    /// A provider was installed.
    Installed,
    /// The method is not a supported feature.
    Ignored,
}

struct ActiveRegistration {
    method: String,
    handle: Subscription,
}

/// Registrations installed on behalf of one session.
///
/// Installing an id that is already present disposes the previous provider
/// first. Host teardown always runs outside the table lock.
#[derive(Default)]
pub(crate) struct RegistrationTable {
    entries: Mutex<HashMap<String, ActiveRegistration>>,
}

impl RegistrationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn install<F>(
        &self,
        registration: &Registration,
        register: F,
    ) -> Result<InstallOutcome, ClientError>
    where
        F: FnOnce(&'static Feature, RegisterOptions) -> Result<Subscription, ClientError>,
    {
        let previous = lock(&self.entries).remove(&registration.id);
        if let Some(previous) = previous {
            debug!(
                target: REGISTRATION_TARGET,
                id = %registration.id,
                previous = %previous.method,
                method = %registration.method,
                "replacing registration"
            );
            previous.handle.unsubscribe();
        }
        let Some(feature) = feature_for(&registration.method) else {
            debug!(
                target: REGISTRATION_TARGET,
                id = %registration.id,
                method = %registration.method,
                "ignoring registration for unsupported method"
            );
            return Ok(InstallOutcome::Ignored);
        };
        let options = RegisterOptions::from_registration(
            registration.register_options.as_ref(),
            &registration.method,
        )?;
        let handle = register(feature, options)?;
        let displaced = lock(&self.entries).insert(
            registration.id.clone(),
            ActiveRegistration {
                method: registration.method.clone(),
                handle,
            },
        );
        if let Some(displaced) = displaced {
            displaced.handle.unsubscribe();
        }
        Ok(InstallOutcome::Installed)
    }

    /// Disposes the registration; returns `false` when the id is unknown.
    pub(crate) fn remove(&self, id: &str) -> bool {
        let removed = lock(&self.entries).remove(id);
        match removed {
            Some(entry) => {
                debug!(
                    target: REGISTRATION_TARGET,
                    id,
                    method = %entry.method,
                    "removing registration"
                );
                entry.handle.unsubscribe();
                true
            }
            None => false,
        }
    }

    /// Disposes every registration and returns how many there were.
    pub(crate) fn clear(&self) -> usize {
        let drained: Vec<ActiveRegistration> =
            lock(&self.entries).drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for entry in drained {
            entry.handle.unsubscribe();
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Method registered under `id`, if any.
    #[cfg(test)]
    pub(crate) fn method(&self, id: &str) -> Option<String> {
        lock(&self.entries).get(id).map(|entry| entry.method.clone())
    }
}
