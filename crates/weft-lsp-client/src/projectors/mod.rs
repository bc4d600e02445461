//! Projections of server notifications onto host state.

mod diagnostics;
mod log;
mod progress;

pub(crate) use diagnostics::DiagnosticsProjector;
pub(crate) use log::forward_log_messages;
pub(crate) use progress::ProgressProjector;
