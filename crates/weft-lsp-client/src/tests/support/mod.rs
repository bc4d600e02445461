//! Shared fakes and helpers for the client tests.

mod fake_host;
mod fake_server;
mod world;

use std::sync::Arc;

use serde_json::Value;

pub use fake_host::{FakeHost, url};
pub use fake_server::{FakeConnector, ServerHandle, ServerScript};
pub use world::TestWorld;

use crate::client::{Client, ClientOptions, register};
use crate::errors::ClientError;
use crate::transport::Connector;

/// Upper bound on scheduler turns spent waiting for background tasks.
const MAX_TURNS: usize = 2_000;

/// Yields until `condition` holds, failing the test if it never does.
pub async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..MAX_TURNS {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("timed out waiting until {description}");
}

/// Lets every runnable background task make progress.
pub async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}

/// Registers a client for `host` against `connector`.
pub async fn start_client(
    options: ClientOptions,
    host: &Arc<FakeHost>,
    connector: &FakeConnector,
) -> Result<Client, ClientError> {
    let shared: Arc<dyn Connector> = Arc::new(connector.clone());
    register(options, host.model(), shared).await
}

/// Extracts the `uri` fields of `workspace/didChangeWorkspaceFolders` events.
pub fn folder_uris(event: &Value, side: &str) -> Vec<String> {
    event["event"][side]
        .as_array()
        .map(|folders| {
            folders
                .iter()
                .filter_map(|folder| folder["uri"].as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}
