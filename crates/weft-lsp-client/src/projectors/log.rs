//! Forwards `window/logMessage` into the tracing pipeline.

use futures::StreamExt;
use lsp_types::notification::LogMessage;
use lsp_types::{LogMessageParams, MessageType};
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::dispose::Subscription;

const SERVER_LOG_TARGET: &str = "weft_lsp_client::server";

/// Emits a server log message at the matching level; unknown types log at
/// debug.
fn log_server_message(connection: u64, params: &LogMessageParams) {
    match params.typ {
        MessageType::ERROR => error!(target: SERVER_LOG_TARGET, connection, "{}", params.message),
        MessageType::WARNING => warn!(target: SERVER_LOG_TARGET, connection, "{}", params.message),
        MessageType::INFO => info!(target: SERVER_LOG_TARGET, connection, "{}", params.message),
        _ => debug!(target: SERVER_LOG_TARGET, connection, "{}", params.message),
    }
}

pub(crate) fn forward_log_messages(connection: &Connection) -> Subscription {
    let id = connection.id();
    let mut messages = connection.observe::<LogMessage>();
    Subscription::from_task(tokio::spawn(async move {
        while let Some(params) = messages.next().await {
            log_server_message(id, &params);
        }
    }))
}
