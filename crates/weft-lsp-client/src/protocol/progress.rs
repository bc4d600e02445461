//! The legacy `window/progress` notification.
//!
//! Servers such as older `tsserver` bridges report progress through this
//! pre-standard notification rather than `$/progress`. It is not part of
//! `lsp-types`, so the notification type is declared here.

use lsp_types::notification::Notification;
use serde::{Deserialize, Serialize};

/// Marker type for `window/progress`.
#[derive(Debug)]
pub enum WindowProgress {}

impl Notification for WindowProgress {
    type Params = WindowProgressParams;
    const METHOD: &'static str = "window/progress";
}

/// Parameters of `window/progress`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowProgressParams {
    /// Token grouping notifications that belong to one operation.
    pub id: String,
    /// Title shown when the operation starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form status text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Completion in the range `0..=100`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    /// Set on the final notification of the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

impl WindowProgressParams {
    /// Returns `true` for the final notification of an operation.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }

    /// Returns `true` when the notification carries a status update.
    #[must_use]
    pub fn has_update(&self) -> bool {
        self.percentage.is_some() || self.message.is_some()
    }
}
