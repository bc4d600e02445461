//! The client entry point: [`register`] and the [`Client`] it returns.

mod folders;
mod multi_root;
mod single_root;

use std::future::Future;
use std::sync::Arc;

use tracing::info;
use url::Url;
use weft_config::Config;

use crate::connection::Connection;
use crate::errors::ClientError;
use crate::host::HostModel;
use crate::session::SessionContext;
use crate::transport::Connector;
use crate::uri::UriRewriter;

use self::multi_root::MultiRootManager;
use self::single_root::SingleRootManager;

pub(crate) const CLIENT_TARGET: &str = "weft_lsp_client::client";

/// Options accepted by [`register`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    config: Config,
    rewriter: UriRewriter,
}

impl ClientOptions {
    /// Builds options from configuration, deriving the URI rewriter from the
    /// configured prefix mappings.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        let rewriter = UriRewriter::from_mappings(&config.uri_mappings);
        Self { config, rewriter }
    }

    /// Replaces the URI rewriter, for conversions prefix mappings cannot
    /// express.
    #[must_use]
    pub fn with_rewriter(mut self, rewriter: UriRewriter) -> Self {
        self.rewriter = rewriter;
        self
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// URI rewriter in effect.
    #[must_use]
    pub fn rewriter(&self) -> &UriRewriter {
        &self.rewriter
    }
}

enum Mode {
    MultiRoot(MultiRootManager),
    SingleRoot(SingleRootManager),
}

/// A registered language client.
pub struct Client {
    mode: Mode,
}

/// Starts a client for the host's workspace.
///
/// In multi-root mode a single session is opened and initialised before this
/// returns. Otherwise a session is opened for every current root and all of
/// them are awaited; roots whose session fails to open are logged and
/// skipped.
///
/// # Errors
///
/// Returns the connect or initialise failure of the shared session in
/// multi-root mode.
pub async fn register(
    options: ClientOptions,
    host: HostModel,
    connector: Arc<dyn Connector>,
) -> Result<Client, ClientError> {
    let multi_root = options.config().is_multi_root();
    let context = Arc::new(SessionContext {
        host,
        connector,
        options,
    });
    info!(target: CLIENT_TARGET, multi_root, "registering language client");
    let mode = if multi_root {
        Mode::MultiRoot(MultiRootManager::start(context).await?)
    } else {
        Mode::SingleRoot(SingleRootManager::start(context).await)
    };
    Ok(Client { mode })
}

impl Client {
    /// Runs `f` with a connection able to serve `root`.
    ///
    /// With a multi-root server the shared connection is used, and `root` is
    /// announced for the duration of the call if the host does not have it
    /// open. Otherwise the root's session is used (or opened) and disposed
    /// once `f` completes.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or the failure to announce the root or open its
    /// session.
    pub async fn with_connection<F, Fut, T>(&self, root: &Url, f: F) -> Result<T, ClientError>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        match &self.mode {
            Mode::MultiRoot(manager) => manager.with_connection(root, f).await,
            Mode::SingleRoot(manager) => manager.with_connection(root, f).await,
        }
    }

    /// Returns `true` when one shared connection serves every root.
    #[must_use]
    pub fn is_multi_root(&self) -> bool {
        matches!(self.mode, Mode::MultiRoot(_))
    }

    /// Stops following root changes and disposes every session.
    ///
    /// Sessions that are still starting are cancelled rather than awaited.
    pub fn shutdown(self) {
        match &self.mode {
            Mode::MultiRoot(manager) => manager.shutdown(),
            Mode::SingleRoot(manager) => manager.shutdown(),
        }
        info!(target: CLIENT_TARGET, "language client shut down");
    }

    #[cfg(test)]
    pub(crate) fn tracked_roots(&self) -> Vec<Url> {
        match &self.mode {
            Mode::MultiRoot(_) => Vec::new(),
            Mode::SingleRoot(manager) => manager.tracked_roots(),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("multi_root", &self.is_multi_root())
            .finish_non_exhaustive()
    }
}
