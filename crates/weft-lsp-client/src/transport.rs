//! The transport seam: a bidirectional stream of JSON-RPC messages.
//!
//! Framing, process spawning and sockets live behind [`Connector`]. The
//! client only sees decoded [`Message`] values travelling over a [`Channel`].

use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::dispose::Subscription;
use crate::errors::TransportError;
use crate::protocol::Message;

/// A connected message channel.
///
/// Dropping the outgoing sender signals the peer that the client has gone
/// away; the close hook runs exactly once when the owning connection closes.
#[derive(Debug)]
pub struct Channel {
    outgoing: UnboundedSender<Message>,
    incoming: UnboundedReceiver<Message>,
    close_hook: Subscription,
}

impl Channel {
    /// Creates a channel from its two halves.
    #[must_use]
    pub fn new(outgoing: UnboundedSender<Message>, incoming: UnboundedReceiver<Message>) -> Self {
        Self {
            outgoing,
            incoming,
            close_hook: Subscription::empty(),
        }
    }

    /// Attaches a teardown that runs when the connection closes.
    #[must_use]
    pub fn with_close_hook(mut self, hook: Subscription) -> Self {
        self.close_hook = hook;
        self
    }

    /// Creates two channels wired back to back.
    ///
    /// Messages sent on one are received on the other, which suits servers
    /// running in-process.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (left_tx, left_rx) = unbounded_channel();
        let (right_tx, right_rx) = unbounded_channel();
        (Self::new(left_tx, right_rx), Self::new(right_tx, left_rx))
    }

    /// Sends a message to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Send`] when the peer has gone away.
    pub fn send(&self, message: Message) -> Result<(), TransportError> {
        let method = message.method().unwrap_or("response").to_owned();
        self.outgoing
            .send(message)
            .map_err(|_| TransportError::Send { method })
    }

    /// Receives the next message, or `None` once the peer has gone away.
    pub async fn recv(&mut self) -> Option<Message> {
        self.incoming.recv().await
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        UnboundedSender<Message>,
        UnboundedReceiver<Message>,
        Subscription,
    ) {
        (self.outgoing, self.incoming, self.close_hook)
    }
}

/// Establishes connections to the language server.
///
/// Called once for the shared connection in multi-root mode and once per root
/// otherwise.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the server cannot be reached.
    async fn connect(&self) -> Result<Channel, TransportError>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::protocol::Notification;

    #[rstest]
    #[tokio::test]
    async fn paired_channels_deliver_in_both_directions() {
        let (mut client, mut server) = Channel::pair();

        client
            .send(Notification::new("initialized", None).into())
            .expect("send to server");
        server
            .send(Notification::new("window/logMessage", None).into())
            .expect("send to client");

        assert_eq!(
            server.recv().await.and_then(|m| m.method().map(str::to_owned)),
            Some(String::from("initialized"))
        );
        assert_eq!(
            client.recv().await.and_then(|m| m.method().map(str::to_owned)),
            Some(String::from("window/logMessage"))
        );
    }

    #[rstest]
    fn send_fails_once_peer_is_dropped() {
        let (client, server) = Channel::pair();
        drop(server);

        let error = client
            .send(Notification::new("exit", None).into())
            .expect_err("peer is gone");

        assert!(matches!(error, TransportError::Send { method } if method == "exit"));
    }
}
