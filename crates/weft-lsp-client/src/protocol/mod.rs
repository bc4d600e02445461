//! Wire-level protocol types.

mod message;
mod progress;

pub use message::{
    JSONRPC_VERSION, Message, Notification, Request, RequestId, Response, ResponseError,
};
pub use progress::{WindowProgress, WindowProgressParams};
