//! Error types surfaced by the LSP client.

use std::error::Error;

use thiserror::Error;

use crate::protocol::ResponseError;

/// Failures raised by the transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Establishing the connection failed.
    #[error("failed to connect to language server: {message}")]
    Connect {
        /// Description of the failure.
        message: String,
        /// Underlying cause, when the transport reported one.
        #[source]
        source: Option<Box<dyn Error + Send + Sync>>,
    },

    /// The outgoing half of the channel was already closed.
    #[error("failed to send '{method}': transport is closed")]
    Send {
        /// Method of the message that could not be sent.
        method: String,
    },
}

impl TransportError {
    /// Builds a connect failure without an underlying source.
    #[must_use]
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
            source: None,
        }
    }

    /// Builds a connect failure wrapping an underlying source.
    #[must_use]
    pub fn connect_with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::Connect {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// A URI could not be converted between the host and server namespaces.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// The value is not a parsable absolute URI.
    #[error("invalid URI '{value}': {source}")]
    InvalidUri {
        /// Text that failed to parse.
        value: String,
        /// Parser failure.
        #[source]
        source: url::ParseError,
    },

    /// The URI parsed but cannot be represented as a protocol URI.
    #[error("URI '{value}' is not a valid protocol URI")]
    Protocol {
        /// Offending URI text.
        value: String,
    },

    /// A custom conversion function refused the URI.
    #[error("URI '{uri}' cannot be expressed in the target namespace")]
    Unmappable {
        /// Offending URI text.
        uri: String,
    },
}

impl ConversionError {
    pub(crate) fn invalid(value: &str, source: url::ParseError) -> Self {
        Self::InvalidUri {
            value: value.to_owned(),
            source,
        }
    }
}

/// Failure reported by a host collaborator.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HostError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl HostError {
    /// Builds an error without an underlying source.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error that wraps an underlying source.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Human-friendly description without the optional source.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Errors returned by the client, its connections and its providers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connecting or sending failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A URI could not be rewritten; aborts the containing request only.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The request was issued after, or was pending during, teardown.
    #[error("connection to the language server is closed")]
    ConnectionClosed,

    /// The server answered with a JSON-RPC error.
    #[error("language server failed '{method}' with code {code}: {message}")]
    Server {
        /// Method of the failed request.
        method: String,
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the server.
        message: String,
    },

    /// Parameters or results did not match the expected shape.
    #[error("failed to encode or decode '{method}': {source}")]
    Codec {
        /// Method whose payload failed to (de)serialise.
        method: String,
        /// Underlying serde failure.
        #[source]
        source: serde_json::Error,
    },

    /// The server invoked a method the client has no handler for.
    #[error("no handler registered for server request '{method}'")]
    UnhandledServerRequest {
        /// Method the server invoked.
        method: String,
    },

    /// A host collaborator failed.
    #[error("host collaborator failed: {0}")]
    Host(#[from] HostError),
}

impl ClientError {
    pub(crate) fn codec(method: &str, source: serde_json::Error) -> Self {
        Self::Codec {
            method: method.to_owned(),
            source,
        }
    }

    /// Maps the error onto the JSON-RPC error object sent back to the server.
    #[must_use]
    pub fn to_response_error(&self) -> ResponseError {
        let code = match self {
            Self::UnhandledServerRequest { .. } => ResponseError::METHOD_NOT_FOUND,
            Self::Codec { .. } => ResponseError::INVALID_PARAMS,
            _ => ResponseError::INTERNAL_ERROR,
        };
        ResponseError::new(code, self.to_string())
    }
}
