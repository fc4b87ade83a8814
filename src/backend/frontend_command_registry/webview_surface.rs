use tauri::{AppHandle, Emitter, Manager};

use crate::backend::change_notification_broadcast::{ChangeNotice, UiSurface, WatcherStateNotice};
use crate::backend::common::constants::{FLOW_CHANGE_EVENT, FLOW_WATCHER_STATE_EVENT};

/// A webview window that listens for flow notifications.
pub(crate) struct WebviewSurface {
    app: AppHandle,
    label: String,
}

impl WebviewSurface {
    pub(crate) fn new(app: AppHandle, label: impl Into<String>) -> Self {
        Self {
            app,
            label: label.into(),
        }
    }
}

impl UiSurface for WebviewSurface {
    fn surface_id(&self) -> &str {
        &self.label
    }

    fn is_alive(&self) -> bool {
        self.app.get_webview_window(&self.label).is_some()
    }

    fn deliver(&self, notice: &ChangeNotice) -> Result<(), String> {
        self.app
            .emit_to(self.label.as_str(), FLOW_CHANGE_EVENT, notice)
            .map_err(|error| format!("Failed to emit {FLOW_CHANGE_EVENT} to {}: {error}", self.label))
    }

    fn deliver_watcher_state(&self, notice: &WatcherStateNotice) -> Result<(), String> {
        self.app
            .emit_to(self.label.as_str(), FLOW_WATCHER_STATE_EVENT, notice)
            .map_err(|error| {
                format!("Failed to emit {FLOW_WATCHER_STATE_EVENT} to {}: {error}", self.label)
            })
    }
}
