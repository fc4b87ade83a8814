use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::backend::directory_watch_pipeline::{ChangeCategory, ChangeEvent, WatcherState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotice {
    pub workspace_root: String,
    pub category: ChangeCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub emitted_at: String,
}

impl ChangeNotice {
    pub fn new(workspace_root: impl Into<String>, change: ChangeEvent) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            category: change.category,
            id: change.id,
            emitted_at: now_iso(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStateNotice {
    pub workspace_root: String,
    pub state: WatcherState,
    pub emitted_at: String,
}

impl WatcherStateNotice {
    pub fn new(workspace_root: impl Into<String>, state: WatcherState) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            state,
            emitted_at: now_iso(),
        }
    }
}

/// A UI view that wants change notifications for one workspace.
pub trait UiSurface: Send + Sync {
    fn surface_id(&self) -> &str;

    /// `false` once the surface is torn down; it is pruned on next use.
    fn is_alive(&self) -> bool;

    fn deliver(&self, notice: &ChangeNotice) -> Result<(), String>;

    fn deliver_watcher_state(&self, _notice: &WatcherStateNotice) -> Result<(), String> {
        Ok(())
    }
}

/// Registry of UI surfaces per workspace key, fanning notifications out to
/// every live one.
#[derive(Default)]
pub struct NotificationBroadcaster {
    surfaces: Mutex<HashMap<String, Vec<Arc<dyn UiSurface>>>>,
}

impl NotificationBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `surface` for `workspace_key`, replacing an earlier
    /// registration with the same surface id.
    pub fn register(&self, workspace_key: &str, surface: Arc<dyn UiSurface>) {
        let mut surfaces = self.surfaces();
        let registered = surfaces.entry(workspace_key.to_string()).or_default();
        registered.retain(|existing| existing.surface_id() != surface.surface_id());
        debug!(workspace = %workspace_key, surface = surface.surface_id(), "registered ui surface");
        registered.push(surface);
    }

    pub fn unregister(&self, workspace_key: &str, surface_id: &str) -> bool {
        let mut surfaces = self.surfaces();
        let Some(registered) = surfaces.get_mut(workspace_key) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|existing| existing.surface_id() != surface_id);
        let removed = registered.len() != before;
        if registered.is_empty() {
            surfaces.remove(workspace_key);
        }
        removed
    }

    pub fn unregister_workspace(&self, workspace_key: &str) {
        if let Some(removed) = self.surfaces().remove(workspace_key) {
            debug!(workspace = %workspace_key, surfaces = removed.len(), "unregistered ui surfaces");
        }
    }

    /// Delivers `notice` once to each live surface of `workspace_key` and
    /// returns how many accepted it. Torn-down surfaces are pruned.
    pub fn broadcast(&self, workspace_key: &str, notice: &ChangeNotice) -> usize {
        let targets = self.live_surfaces(workspace_key);
        let mut delivered = 0;
        for surface in targets {
            match surface.deliver(notice) {
                Ok(()) => delivered += 1,
                Err(error) => warn!(
                    workspace = %workspace_key,
                    surface = surface.surface_id(),
                    %error,
                    "failed to deliver change notification"
                ),
            }
        }
        delivered
    }

    pub fn broadcast_watcher_state(&self, workspace_key: &str, notice: &WatcherStateNotice) -> usize {
        let targets = self.live_surfaces(workspace_key);
        let mut delivered = 0;
        for surface in targets {
            match surface.deliver_watcher_state(notice) {
                Ok(()) => delivered += 1,
                Err(error) => warn!(
                    workspace = %workspace_key,
                    surface = surface.surface_id(),
                    %error,
                    "failed to deliver watcher state"
                ),
            }
        }
        delivered
    }

    pub fn surface_count(&self, workspace_key: &str) -> usize {
        self.surfaces()
            .get(workspace_key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Prunes dead surfaces and snapshots the rest so delivery runs without
    /// holding the registry lock.
    fn live_surfaces(&self, workspace_key: &str) -> Vec<Arc<dyn UiSurface>> {
        let mut surfaces = self.surfaces();
        let Some(registered) = surfaces.get_mut(workspace_key) else {
            return Vec::new();
        };

        registered.retain(|surface| {
            let alive = surface.is_alive();
            if !alive {
                debug!(workspace = %workspace_key, surface = surface.surface_id(), "pruned torn-down ui surface");
            }
            alive
        });
        let live = registered.clone();
        if registered.is_empty() {
            surfaces.remove(workspace_key);
        }
        live
    }

    fn surfaces(&self) -> MutexGuard<'_, HashMap<String, Vec<Arc<dyn UiSurface>>>> {
        match self.surfaces.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingSurface {
        id: String,
        alive: AtomicBool,
        received: Mutex<Vec<ChangeNotice>>,
    }

    impl RecordingSurface {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                alive: AtomicBool::new(true),
                received: Mutex::new(Vec::new()),
            })
        }

        fn received(&self) -> Vec<ChangeNotice> {
            self.received.lock().unwrap().clone()
        }
    }

    impl UiSurface for RecordingSurface {
        fn surface_id(&self) -> &str {
            &self.id
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn deliver(&self, notice: &ChangeNotice) -> Result<(), String> {
            self.received.lock().unwrap().push(notice.clone());
            Ok(())
        }
    }

    struct FailingSurface;

    impl UiSurface for FailingSurface {
        fn surface_id(&self) -> &str {
            "failing"
        }

        fn is_alive(&self) -> bool {
            true
        }

        fn deliver(&self, _notice: &ChangeNotice) -> Result<(), String> {
            Err("window closed mid-delivery".to_string())
        }
    }

    fn task_notice() -> ChangeNotice {
        ChangeNotice::new(
            "/work/demo",
            ChangeEvent {
                category: ChangeCategory::Task,
                id: Some("fn-1.2".to_string()),
            },
        )
    }

    #[test]
    fn delivers_once_to_each_live_surface() {
        let broadcaster = NotificationBroadcaster::new();
        let board = RecordingSurface::new("board");
        let detail = RecordingSurface::new("detail");
        broadcaster.register("/work/demo", board.clone());
        broadcaster.register("/work/demo", detail.clone());

        let notice = task_notice();
        assert_eq!(broadcaster.broadcast("/work/demo", &notice), 2);
        assert_eq!(board.received(), vec![notice.clone()]);
        assert_eq!(detail.received(), vec![notice]);
    }

    #[test]
    fn prunes_torn_down_surfaces_silently() {
        let broadcaster = NotificationBroadcaster::new();
        let board = RecordingSurface::new("board");
        let closed = RecordingSurface::new("closed");
        broadcaster.register("/work/demo", board.clone());
        broadcaster.register("/work/demo", closed.clone());
        closed.alive.store(false, Ordering::SeqCst);

        assert_eq!(broadcaster.broadcast("/work/demo", &task_notice()), 1);
        assert!(closed.received().is_empty());
        assert_eq!(broadcaster.surface_count("/work/demo"), 1);
    }

    #[test]
    fn routes_by_workspace() {
        let broadcaster = NotificationBroadcaster::new();
        let other = RecordingSurface::new("board");
        broadcaster.register("/work/other", other.clone());

        assert_eq!(broadcaster.broadcast("/work/demo", &task_notice()), 0);
        assert!(other.received().is_empty());
    }

    #[test]
    fn re_registering_a_surface_does_not_duplicate_delivery() {
        let broadcaster = NotificationBroadcaster::new();
        let board = RecordingSurface::new("board");
        broadcaster.register("/work/demo", board.clone());
        broadcaster.register("/work/demo", board.clone());

        broadcaster.broadcast("/work/demo", &task_notice());
        assert_eq!(board.received().len(), 1);
        assert!(broadcaster.unregister("/work/demo", "board"));
        assert_eq!(broadcaster.surface_count("/work/demo"), 0);
    }

    #[test]
    fn delivery_failures_do_not_block_other_surfaces() {
        let broadcaster = NotificationBroadcaster::new();
        let board = RecordingSurface::new("board");
        broadcaster.register("/work/demo", Arc::new(FailingSurface));
        broadcaster.register("/work/demo", board.clone());

        assert_eq!(broadcaster.broadcast("/work/demo", &task_notice()), 1);
        assert_eq!(board.received().len(), 1);
    }

    #[test]
    fn notice_serializes_for_the_ui() {
        let notice = task_notice();
        let value = serde_json::to_value(&notice).unwrap();
        assert_eq!(value["workspaceRoot"], "/work/demo");
        assert_eq!(value["category"], "task");
        assert_eq!(value["id"], "fn-1.2");
        let emitted_at = value["emittedAt"].as_str().unwrap();
        assert!(emitted_at.contains('T') && emitted_at.ends_with('Z'));
    }
}
