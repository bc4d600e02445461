//! BDD world driving a client on a current-thread runtime.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::{Builder, Runtime};
use weft_config::Config;

use super::{FakeConnector, FakeHost, ServerHandle, ServerScript, settle, start_client, wait_until};
use crate::client::{Client, ClientOptions};
use crate::errors::ClientError;
use crate::host::{ProviderKind, ProviderResponse, Workspace};
use crate::protocol::Response;

/// Shared state exercised by the step implementations.
pub struct TestWorld {
    /// Host the client projects onto.
    pub host: Arc<FakeHost>,
    /// Connector recording every server the client starts.
    pub connector: FakeConnector,
    /// Configuration used by the next registration.
    pub config: Config,
    /// Script used by servers started after registration.
    pub script: ServerScript,
    client: Option<Client>,
    /// Outcome of the last provider invocation.
    pub last_response: Option<Result<ProviderResponse, ClientError>>,
    runtime: Runtime,
}

impl TestWorld {
    /// Creates a world with no roots and a default single-root config.
    pub fn new() -> Self {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("test runtime should build");
        Self {
            host: FakeHost::with_roots(&[]),
            connector: FakeConnector::default(),
            config: Config::default(),
            script: ServerScript::default(),
            client: None,
            last_response: None,
            runtime,
        }
    }

    /// Runs `future` to completion, letting background tasks progress.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Registers the client with the current config and script.
    pub fn register(&mut self) {
        self.connector.set_script(self.script.clone());
        let options = ClientOptions::from_config(self.config.clone());
        let client = self
            .block_on(start_client(options, &self.host, &self.connector))
            .expect("client should register");
        self.client = Some(client);
        self.settle();
    }

    /// The registered client.
    pub fn client(&self) -> &Client {
        self.client.as_ref().expect("client should be registered")
    }

    /// Drains runnable background work.
    pub fn settle(&self) {
        self.block_on(settle());
    }

    /// Blocks until `condition` holds.
    pub fn wait_until(&self, description: &str, condition: impl FnMut() -> bool) {
        self.block_on(wait_until(description, condition));
    }

    /// Removes `root` from the host's roots and lets the client react.
    pub fn remove_root(&self, root: &str) {
        let remaining: Vec<String> = self
            .host
            .roots()
            .into_iter()
            .map(|candidate| candidate.uri.to_string())
            .filter(|candidate| candidate != root)
            .collect();
        let borrowed: Vec<&str> = remaining.iter().map(String::as_str).collect();
        self.host.set_roots(&borrowed);
        self.settle();
    }

    /// Invokes a host provider and records the outcome.
    pub fn invoke(&mut self, kind: ProviderKind, document: &str, line: u32, character: u32) {
        let host = Arc::clone(&self.host);
        let response = self.block_on(host.invoke(kind, document, line, character));
        self.last_response = Some(response);
    }

    /// The first server started.
    pub fn server(&self) -> ServerHandle {
        self.connector.server(0)
    }

    /// Sends a server-to-client request on the first connection.
    pub fn server_request(&self, method: &str, params: Value) -> Response {
        let server = self.server();
        let response = self.block_on(server.request(method, params));
        self.settle();
        response
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
