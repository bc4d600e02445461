//! A live JSON-RPC connection to one language server.
//!
//! A background reader task routes incoming messages: responses complete the
//! matching pending request, notifications fan out to observers in arrival
//! order, and server requests are answered by the registered handler (or with
//! a "method not found" error when none exists). Closing the connection is
//! monotonic and fails every outstanding request.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispose::Subscription;
use crate::errors::{ClientError, TransportError};
use crate::lock;
use crate::protocol::{Message, Notification, Request, RequestId, Response};
use crate::transport::Channel;

pub(crate) const CONNECTION_TARGET: &str = "weft_lsp_client::connection";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type RequestHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, ClientError>> + Send + Sync>;

struct PendingRequest {
    method: String,
    reply: oneshot::Sender<Result<Value, ClientError>>,
}

struct Inner {
    id: u64,
    next_request_id: AtomicI64,
    outgoing: Mutex<Option<UnboundedSender<Message>>>,
    incoming: Mutex<Option<UnboundedReceiver<Message>>>,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    observers: Mutex<HashMap<String, Vec<UnboundedSender<Value>>>>,
    handlers: Mutex<HashMap<String, RequestHandler>>,
    close_hook: Mutex<Option<Subscription>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: watch::Sender<bool>,
}

/// Cloneable handle to a JSON-RPC connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Wraps a connected channel. Call [`Connection::start`] once observers
    /// are in place.
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        let (outgoing, incoming, close_hook) = channel.into_parts();
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                next_request_id: AtomicI64::new(1),
                outgoing: Mutex::new(Some(outgoing)),
                incoming: Mutex::new(Some(incoming)),
                pending: Mutex::new(HashMap::new()),
                observers: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                close_hook: Mutex::new(Some(close_hook)),
                reader: Mutex::new(None),
                closed,
            }),
        }
    }

    /// Process-unique identifier used in log events.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Starts routing incoming messages.
    ///
    /// Observers registered before this call see every notification. Calling
    /// it again, or after close, has no effect. Must run inside a Tokio
    /// runtime.
    pub fn start(&self) {
        if self.is_closed() {
            return;
        }
        let Some(mut incoming) = lock(&self.inner.incoming).take() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let reader = tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                Self { inner }.dispatch(message);
            }
            if let Some(inner) = weak.upgrade() {
                debug!(
                    target: CONNECTION_TARGET,
                    connection = inner.id,
                    "language server closed the transport"
                );
                Self { inner }.close();
            }
        });
        *lock(&self.inner.reader) = Some(reader);
    }

    /// Sends a request and waits for its raw result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] if the connection is or
    /// becomes closed before a response arrives, [`ClientError::Server`] for
    /// error responses, and [`ClientError::Transport`] when sending fails.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = RequestId::Number(self.inner.next_request_id.fetch_add(1, Ordering::Relaxed));
        let (reply, response) = oneshot::channel();
        {
            let mut pending = lock(&self.inner.pending);
            if self.is_closed() {
                return Err(ClientError::ConnectionClosed);
            }
            pending.insert(
                id.clone(),
                PendingRequest {
                    method: method.to_owned(),
                    reply,
                },
            );
        }
        debug!(
            target: CONNECTION_TARGET,
            connection = self.inner.id,
            id = %id,
            method,
            "sending request"
        );
        if let Err(error) = self.send(Request::new(id.clone(), method, Some(params)).into()) {
            lock(&self.inner.pending).remove(&id);
            return Err(error);
        }
        response
            .await
            .unwrap_or(Err(ClientError::ConnectionClosed))
    }

    /// Sends a typed request.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Codec`] when parameters or the result do not
    /// match `R`, and the errors of [`Connection::request`].
    pub async fn send_request<R>(&self, params: R::Params) -> Result<R::Result, ClientError>
    where
        R: lsp_types::request::Request,
    {
        let encoded =
            serde_json::to_value(params).map_err(|source| ClientError::codec(R::METHOD, source))?;
        let result = self.request(R::METHOD, encoded).await?;
        serde_json::from_value(result).map_err(|source| ClientError::codec(R::METHOD, source))
    }

    /// Sends a raw notification.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] after close and
    /// [`ClientError::Transport`] when the peer has gone away.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), ClientError> {
        debug!(
            target: CONNECTION_TARGET,
            connection = self.inner.id,
            method,
            "sending notification"
        );
        self.send(Notification::new(method, Some(params)).into())
    }

    /// Sends a typed notification.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Codec`] when the parameters fail to serialise and
    /// the errors of [`Connection::notify`].
    pub fn send_notification<N>(&self, params: N::Params) -> Result<(), ClientError>
    where
        N: lsp_types::notification::Notification,
    {
        let encoded =
            serde_json::to_value(params).map_err(|source| ClientError::codec(N::METHOD, source))?;
        self.notify(N::METHOD, encoded)
    }

    /// Observes raw notification parameters for `method`.
    ///
    /// The stream yields in arrival order and ends when the connection
    /// closes. Observing a closed connection yields an empty stream.
    #[must_use]
    pub fn observe_notification(&self, method: &str) -> NotificationStream {
        let (sender, receiver) = unbounded_channel();
        let mut observers = lock(&self.inner.observers);
        if !self.is_closed() {
            observers.entry(method.to_owned()).or_default().push(sender);
        }
        NotificationStream { receiver }
    }

    /// Observes typed notifications, dropping payloads that fail to decode.
    #[must_use]
    pub fn observe<N>(&self) -> BoxStream<'static, N::Params>
    where
        N: lsp_types::notification::Notification + 'static,
    {
        self.observe_notification(N::METHOD)
            .filter_map(|params| {
                let decoded = serde_json::from_value::<N::Params>(params);
                async move {
                    decoded
                        .map_err(|error| {
                            warn!(
                                target: CONNECTION_TARGET,
                                method = N::METHOD,
                                %error,
                                "dropping malformed notification"
                            );
                        })
                        .ok()
                }
            })
            .boxed()
    }

    /// Installs the handler for a server-to-client request, replacing any
    /// previous handler for the same method.
    pub fn set_request_handler<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ClientError>> + Send + 'static,
    {
        let handler: RequestHandler = Arc::new(move |params| handler(params).boxed());
        let mut handlers = lock(&self.inner.handlers);
        if self.is_closed() {
            return;
        }
        if handlers.insert(method.to_owned(), handler).is_some() {
            debug!(
                target: CONNECTION_TARGET,
                connection = self.inner.id,
                method,
                "replaced request handler"
            );
        }
    }

    /// Installs a typed handler for a server-to-client request.
    pub fn on_request<R, F, Fut>(&self, handler: F)
    where
        R: lsp_types::request::Request + 'static,
        F: Fn(R::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Result, ClientError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.set_request_handler(R::METHOD, move |params| {
            let handler = Arc::clone(&handler);
            async move {
                let decoded = decode_params::<R::Params>(R::METHOD, params)?;
                let result = handler(decoded).await?;
                serde_json::to_value(result).map_err(|source| ClientError::codec(R::METHOD, source))
            }
        });
    }

    /// Returns `true` once the connection has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once the connection has closed.
    ///
    /// The future does not keep the connection alive; it also resolves when
    /// every handle has been dropped.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.inner.closed.subscribe();
        async move {
            drop(receiver.wait_for(|closed| *closed).await);
        }
    }

    /// Closes the connection.
    ///
    /// The first call fails pending requests, ends every observer stream,
    /// stops the reader and runs the channel's close hook. Later calls do
    /// nothing.
    pub fn close(&self) {
        let pending = {
            let mut pending = lock(&self.inner.pending);
            if self.inner.closed.send_replace(true) {
                return;
            }
            std::mem::take(&mut *pending)
        };
        for (id, request) in pending {
            if request.reply.send(Err(ClientError::ConnectionClosed)).is_err() {
                debug!(
                    target: CONNECTION_TARGET,
                    connection = self.inner.id,
                    id = %id,
                    method = %request.method,
                    "pending request was already abandoned"
                );
            }
        }
        lock(&self.inner.observers).clear();
        lock(&self.inner.handlers).clear();
        lock(&self.inner.outgoing).take();
        if let Some(reader) = lock(&self.inner.reader).take() {
            reader.abort();
        }
        let hook = lock(&self.inner.close_hook).take();
        if let Some(hook) = hook {
            hook.unsubscribe();
        }
        info!(
            target: CONNECTION_TARGET,
            connection = self.inner.id,
            "connection closed"
        );
    }

    fn send(&self, message: Message) -> Result<(), ClientError> {
        let outgoing = lock(&self.inner.outgoing);
        let Some(sender) = outgoing.as_ref() else {
            return Err(ClientError::ConnectionClosed);
        };
        let method = message.method().unwrap_or("response").to_owned();
        sender
            .send(message)
            .map_err(|_| TransportError::Send { method }.into())
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Response(response) => self.complete(response),
            Message::Notification(notification) => self.publish(notification),
            Message::Request(request) => self.answer(request),
        }
    }

    fn complete(&self, response: Response) {
        let Some(id) = response.id else {
            warn!(
                target: CONNECTION_TARGET,
                connection = self.inner.id,
                error = ?response.error,
                "dropping response without id"
            );
            return;
        };
        let Some(pending) = lock(&self.inner.pending).remove(&id) else {
            warn!(
                target: CONNECTION_TARGET,
                connection = self.inner.id,
                id = %id,
                "dropping response for unknown request"
            );
            return;
        };
        let result = match response.error {
            Some(error) => Err(ClientError::Server {
                method: pending.method.clone(),
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        if pending.reply.send(result).is_err() {
            debug!(
                target: CONNECTION_TARGET,
                connection = self.inner.id,
                method = %pending.method,
                "request was abandoned before its response arrived"
            );
        }
    }

    fn publish(&self, notification: Notification) {
        let params = notification.params.unwrap_or(Value::Null);
        let mut observers = lock(&self.inner.observers);
        let Some(subscribers) = observers.get_mut(&notification.method) else {
            debug!(
                target: CONNECTION_TARGET,
                connection = self.inner.id,
                method = %notification.method,
                "no observer for notification"
            );
            return;
        };
        subscribers.retain(|subscriber| subscriber.send(params.clone()).is_ok());
    }

    fn answer(&self, request: Request) {
        let handler = lock(&self.inner.handlers).get(&request.method).cloned();
        let Some(handler) = handler else {
            warn!(
                target: CONNECTION_TARGET,
                connection = self.inner.id,
                method = %request.method,
                "no handler for server request"
            );
            let error = ClientError::UnhandledServerRequest {
                method: request.method,
            };
            self.reply(Response::failure(request.id, error.to_response_error()));
            return;
        };
        let connection = self.clone();
        tokio::spawn(async move {
            let response = match handler(request.params).await {
                Ok(result) => Response::success(request.id, result),
                Err(error) => {
                    warn!(
                        target: CONNECTION_TARGET,
                        connection = connection.inner.id,
                        method = %request.method,
                        %error,
                        "server request handler failed"
                    );
                    Response::failure(request.id, error.to_response_error())
                }
            };
            connection.reply(response);
        });
    }

    fn reply(&self, response: Response) {
        if let Err(error) = self.send(response.into()) {
            debug!(
                target: CONNECTION_TARGET,
                connection = self.inner.id,
                %error,
                "failed to answer server request"
            );
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Raw notification parameters for one method, in arrival order.
#[derive(Debug)]
pub struct NotificationStream {
    receiver: UnboundedReceiver<Value>,
}

impl Stream for NotificationStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

fn decode_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> Result<T, ClientError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|source| ClientError::codec(method, source))
}
