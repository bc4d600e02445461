//! Unit, integration and behavioural tests for the LSP client.

mod support;
