//! Scripted in-process language server speaking over a [`Channel`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;

use crate::dispose::Subscription;
use crate::errors::TransportError;
use crate::lock;
use crate::protocol::{Message, Notification, Request, RequestId, Response, ResponseError};
use crate::transport::{Channel, Connector};

/// Behaviour shared by every server a [`FakeConnector`] starts.
#[derive(Debug, Clone, Default)]
pub struct ServerScript {
    /// `capabilities` returned from `initialize`.
    pub capabilities: Value,
    /// Results keyed by request method; unknown methods answer `null`.
    pub responses: HashMap<String, Value>,
    /// When set, `initialize` fails with this message.
    pub initialize_error: Option<String>,
    /// When set, `initialize` is never answered.
    pub stall_initialize: bool,
}

impl ServerScript {
    /// Script advertising the given capabilities.
    pub fn with_capabilities(capabilities: Value) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    /// Adds a canned result for `method`.
    pub fn respond(mut self, method: &str, result: Value) -> Self {
        self.responses.insert(method.to_owned(), result);
        self
    }

    /// Script whose servers never answer `initialize`.
    pub fn stalled() -> Self {
        Self {
            stall_initialize: true,
            ..Self::default()
        }
    }

    fn answer(&self, request: &Request) -> Option<Response> {
        if request.method == "initialize" {
            if self.stall_initialize {
                return None;
            }
            let response = match &self.initialize_error {
                Some(message) => Response::failure(
                    request.id.clone(),
                    ResponseError::new(ResponseError::INTERNAL_ERROR, message.clone()),
                ),
                None => Response::success(
                    request.id.clone(),
                    json!({
                        "capabilities": self.capabilities,
                        "serverInfo": {"name": "fake-server"}
                    }),
                ),
            };
            return Some(response);
        }
        let result = self
            .responses
            .get(&request.method)
            .cloned()
            .unwrap_or(Value::Null);
        Some(Response::success(request.id.clone(), result))
    }
}

struct ServerState {
    outgoing: Mutex<Option<UnboundedSender<Message>>>,
    received: Mutex<Vec<Message>>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Response>>>,
    next_id: AtomicI64,
    transport_closed: AtomicBool,
    close_hook_calls: Arc<AtomicUsize>,
}

/// Test handle onto one running fake server.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// Sends a notification to the client.
    pub fn notify(&self, method: &str, params: Value) {
        self.send(Notification::new(method, Some(params)).into());
    }

    /// Sends a request to the client and waits for its response.
    pub async fn request(&self, method: &str, params: Value) -> Response {
        let id = RequestId::String(format!(
            "server-{}",
            self.state.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        let (reply, response) = oneshot::channel();
        lock(&self.state.pending).insert(id.clone(), reply);
        self.send(Request::new(id, method, Some(params)).into());
        response.await.expect("client should answer server request")
    }

    /// Closes the server's side of the transport.
    pub fn disconnect(&self) {
        lock(&self.state.outgoing).take();
    }

    /// Every message the server has received, in order.
    pub fn received(&self) -> Vec<Message> {
        lock(&self.state.received).clone()
    }

    /// Parameters of every request received for `method`.
    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter_map(|message| match message {
                Message::Request(request) if request.method == method => {
                    Some(request.params.unwrap_or(Value::Null))
                }
                _ => None,
            })
            .collect()
    }

    /// Parameters of every notification received for `method`.
    pub fn notifications(&self, method: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter_map(|message| match message {
                Message::Notification(notification) if notification.method == method => {
                    Some(notification.params.unwrap_or(Value::Null))
                }
                _ => None,
            })
            .collect()
    }

    /// Methods of every received message, in order.
    pub fn methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|message| message.method().map(str::to_owned))
            .collect()
    }

    /// Parameters of the `initialize` request.
    pub fn initialize_params(&self) -> Value {
        self.requests("initialize")
            .into_iter()
            .next()
            .expect("server should have been initialised")
    }

    /// Returns `true` once the client has dropped its end of the transport.
    pub fn transport_closed(&self) -> bool {
        self.state.transport_closed.load(Ordering::SeqCst)
    }

    /// How many times the channel's close hook ran.
    pub fn close_hook_calls(&self) -> usize {
        self.state.close_hook_calls.load(Ordering::SeqCst)
    }

    fn send(&self, message: Message) {
        if let Some(sender) = lock(&self.state.outgoing).as_ref() {
            drop(sender.send(message));
        }
    }
}

/// Starts a fake server and returns the client's end of its channel.
pub fn spawn_server(script: ServerScript) -> (Channel, ServerHandle) {
    let (to_server, incoming) = unbounded_channel();
    let (to_client, from_server) = unbounded_channel();
    let close_hook_calls = Arc::new(AtomicUsize::new(0));
    let state = Arc::new(ServerState {
        outgoing: Mutex::new(Some(to_client)),
        received: Mutex::new(Vec::new()),
        pending: Mutex::new(HashMap::new()),
        next_id: AtomicI64::new(1),
        transport_closed: AtomicBool::new(false),
        close_hook_calls: Arc::clone(&close_hook_calls),
    });
    let handle = ServerHandle {
        state: Arc::clone(&state),
    };
    tokio::spawn(serve(state, script, incoming));
    let channel = Channel::new(to_server, from_server).with_close_hook(Subscription::new(
        move || {
            close_hook_calls.fetch_add(1, Ordering::SeqCst);
        },
    ));
    (channel, handle)
}

async fn serve(state: Arc<ServerState>, script: ServerScript, mut incoming: UnboundedReceiver<Message>) {
    let handle = ServerHandle {
        state: Arc::clone(&state),
    };
    while let Some(message) = incoming.recv().await {
        lock(&state.received).push(message.clone());
        match message {
            Message::Request(request) => {
                if let Some(response) = script.answer(&request) {
                    handle.send(response.into());
                }
            }
            Message::Response(response) => {
                let waiting = response
                    .id
                    .as_ref()
                    .and_then(|id| lock(&state.pending).remove(id));
                if let Some(reply) = waiting {
                    drop(reply.send(response));
                }
            }
            Message::Notification(_) => {}
        }
    }
    state.transport_closed.store(true, Ordering::SeqCst);
}

#[derive(Default)]
struct ConnectorState {
    script: Mutex<ServerScript>,
    servers: Mutex<Vec<ServerHandle>>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

/// Connector starting a fresh [`ServerScript`] server per connection.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<ConnectorState>,
}

impl FakeConnector {
    /// Connector whose servers follow `script`.
    pub fn new(script: ServerScript) -> Self {
        let connector = Self::default();
        *lock(&connector.state.script) = script;
        connector
    }

    /// Replaces the script used by later connections.
    pub fn set_script(&self, script: ServerScript) {
        *lock(&self.state.script) = script;
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next(&self, count: usize) {
        self.state.failures.store(count, Ordering::SeqCst);
    }

    /// Servers started so far, in connection order.
    pub fn servers(&self) -> Vec<ServerHandle> {
        lock(&self.state.servers).clone()
    }

    /// The `index`-th server started.
    pub fn server(&self, index: usize) -> ServerHandle {
        self.servers()
            .get(index)
            .cloned()
            .expect("server should have been started")
    }

    /// Number of connection attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// The server whose `initialize` named `root` as its root URI.
    pub fn server_for_root(&self, root: &str) -> Option<ServerHandle> {
        self.servers().into_iter().find(|server| {
            server
                .requests("initialize")
                .first()
                .and_then(|params| params.get("rootUri"))
                .and_then(Value::as_str)
                == Some(root)
        })
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Channel, TransportError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .state
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if failing {
            return Err(TransportError::connect("connection refused"));
        }
        let script = lock(&self.state.script).clone();
        let (channel, handle) = spawn_server(script);
        lock(&self.state.servers).push(handle);
        Ok(channel)
    }
}
