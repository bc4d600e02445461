//! Language Server Protocol client bridge.
//!
//! The crate connects a host editor model to one or more language servers.
//! It keeps a connection per workspace root, or a single shared connection
//! when the server understands several workspace folders, and projects what
//! the server says onto the host: capability registrations become scoped
//! providers, `publishDiagnostics` becomes view decorations, progress
//! notifications drive host progress reporters, and log messages flow into
//! `tracing`. URIs are rewritten at every boundary so the host and server may
//! use different namespaces.
//!
//! Transport framing stays behind the [`Connector`] trait and host behaviour
//! behind the traits in [`host`], so tests and embedders can supply their own.

mod client;
mod connection;
mod convert;
mod dispose;
mod errors;
mod feature;
pub mod host;
mod projectors;
mod protocol;
mod registration;
mod selector;
mod session;
pub mod telemetry;
mod transport;
mod uri;

#[cfg(test)]
mod tests;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use client::{Client, ClientOptions, register};
pub use connection::{Connection, NotificationStream};
pub use dispose::Subscription;
pub use errors::{ClientError, ConversionError, HostError, TransportError};
pub use feature::{FEATURES, Feature, RegisterOptions, SelectorPolicy, feature_for, static_registrations};
pub use host::{HostModel, ProviderKind};
pub use protocol::{
    JSONRPC_VERSION, Message, Notification, Request, RequestId, Response, ResponseError,
    WindowProgress, WindowProgressParams,
};
pub use selector::{MATCH_EVERYTHING, scope_document_selector_to_root};
pub use transport::{Channel, Connector};
pub use uri::{Direction, LOCATION_LINK_FIELDS, URI_FIELDS, UriConverter, UriRewriter};
pub use weft_config::{Config, DocumentFilter, DocumentSelector, SelectorEntry, UriMapping};

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
