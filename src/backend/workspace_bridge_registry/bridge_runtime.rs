use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::change_notification_broadcast::{
    ChangeNotice, NotificationBroadcaster, UiSurface, WatcherStateNotice,
};
use crate::backend::common::errors::CommandResult;
use crate::backend::common::settings::BridgeSettings;
use crate::backend::directory_watch_pipeline::{
    ChangeEvent, ChangeHandler, DirectoryWatcher, WatchSettings, WatcherState,
};
use crate::backend::flow_binary_resolution::{BinaryResolver, BinaryStatus};
use crate::backend::flow_command_execution::{
    CommandExecutor, ExecutorLimits, FlowCommand, ResponseShape,
};
use crate::backend::retry_circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::backend::write_serialization_queue::{PendingWrite, WriteSerializer};
use crate::workspace::{flow_dir, validate_workspace_root_path, workspace_root_key};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedWorkspace {
    pub workspace_root: String,
    pub watcher_state: WatcherState,
}

struct WorkspaceEntry {
    root: PathBuf,
    watcher: DirectoryWatcher,
    state_forwarder: JoinHandle<()>,
}

impl WorkspaceEntry {
    fn shut_down(mut self) {
        self.watcher.stop();
        self.state_forwarder.abort();
    }
}

/// Everything the UI needs to talk to flowctl for a set of open workspaces:
/// command execution, the per-workspace write queue, retry bookkeeping and
/// change notifications.
pub struct FlowBridge {
    settings: BridgeSettings,
    executor: CommandExecutor,
    serializer: WriteSerializer,
    breaker: Arc<CircuitBreaker>,
    broadcaster: Arc<NotificationBroadcaster>,
    workspaces: Mutex<HashMap<String, WorkspaceEntry>>,
}

impl FlowBridge {
    pub fn new(settings: BridgeSettings) -> Self {
        Self::with_resolver(settings, Arc::new(BinaryResolver::new()))
    }

    pub fn with_resolver(settings: BridgeSettings, resolver: Arc<BinaryResolver>) -> Self {
        let settings = settings.normalized();
        Self {
            executor: CommandExecutor::new(resolver, ExecutorLimits::from(&settings)),
            serializer: WriteSerializer::new(),
            breaker: Arc::new(CircuitBreaker::new(settings.breaker_threshold)),
            broadcaster: Arc::new(NotificationBroadcaster::new()),
            workspaces: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn broadcaster(&self) -> &Arc<NotificationBroadcaster> {
        &self.broadcaster
    }

    /// Starts watching `<workspace_root>/.flow`. Reopening a workspace
    /// replaces its watcher. Must be called from within a Tokio runtime.
    pub fn open_workspace(&self, workspace_root: &str) -> Result<OpenedWorkspace, String> {
        let root = validate_workspace_root_path(workspace_root)?;
        let key = workspace_root_key(&root);

        if let Some(previous) = self.entries().remove(&key) {
            debug!(workspace = %key, "replacing existing workspace watcher");
            previous.shut_down();
        }

        let mut watcher = DirectoryWatcher::new(flow_dir(&root), WatchSettings::from(&self.settings));
        watcher.start(change_handler(self.broadcaster.clone(), key.clone()));
        let watcher_state = watcher.state();
        let state_forwarder = tokio::spawn(forward_watcher_state(
            watcher.subscribe(),
            self.broadcaster.clone(),
            key.clone(),
        ));

        self.entries().insert(
            key.clone(),
            WorkspaceEntry {
                root,
                watcher,
                state_forwarder,
            },
        );
        info!(workspace = %key, state = ?watcher_state, "opened workspace");

        Ok(OpenedWorkspace {
            workspace_root: key,
            watcher_state,
        })
    }

    /// Stops the watcher and write queue for `workspace_root` and forgets
    /// its cached binary and UI surfaces. Returns `false` when it was not open.
    pub fn close_workspace(&self, workspace_root: &Path) -> bool {
        let key = workspace_root_key(workspace_root);
        let Some(entry) = self.entries().remove(&key) else {
            return false;
        };

        let root = entry.root.clone();
        entry.shut_down();
        self.serializer.close(&key);
        self.executor.resolver().invalidate(&root);
        self.broadcaster.unregister_workspace(&key);
        info!(workspace = %key, "closed workspace");
        true
    }

    pub fn open_workspaces(&self) -> Vec<String> {
        let mut keys = self.entries().keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }

    pub fn register_surface(&self, workspace_root: &Path, surface: Arc<dyn UiSurface>) {
        self.broadcaster
            .register(&workspace_root_key(workspace_root), surface);
    }

    pub fn unregister_surface(&self, workspace_root: &Path, surface_id: &str) -> bool {
        self.broadcaster
            .unregister(&workspace_root_key(workspace_root), surface_id)
    }

    /// Runs a non-mutating command immediately.
    pub async fn read(
        &self,
        workspace_root: &Path,
        command: FlowCommand,
        shape: ResponseShape,
    ) -> CommandResult {
        let result = self.executor.execute(workspace_root, &command, &shape).await;
        record_outcome(&self.breaker, &command.category, &result);
        result
    }

    /// Queues a mutating command behind earlier writes for the same workspace.
    pub fn write(
        &self,
        workspace_root: &Path,
        command: FlowCommand,
        shape: ResponseShape,
    ) -> PendingWrite {
        let key = workspace_root_key(workspace_root);
        let root = workspace_root.to_path_buf();
        let executor = self.executor.clone();
        let breaker = self.breaker.clone();
        let label = command.category.clone();

        self.serializer.enqueue(&key, label, async move {
            let result = executor.execute(&root, &command, &shape).await;
            record_outcome(&breaker, &command.category, &result);
            result
        })
    }

    /// Queues a write nobody waits for. Failures are logged only.
    pub fn submit_detached(&self, workspace_root: &Path, command: FlowCommand, shape: ResponseShape) {
        let category = command.category.clone();
        let workspace = workspace_root.display().to_string();
        let pending = self.write(workspace_root, command, shape);
        tokio::spawn(async move {
            if let Err(error) = pending.await {
                warn!(%workspace, %category, kind = error.kind(), %error, "detached write failed");
            }
        });
    }

    pub fn auto_retry_allowed(&self, category: &str) -> bool {
        !self.breaker.is_open(category)
    }

    /// User-initiated retry. Ignores the breaker; success closes it.
    pub async fn manual_retry(
        &self,
        workspace_root: &Path,
        command: FlowCommand,
        shape: ResponseShape,
        mutating: bool,
    ) -> CommandResult {
        debug!(category = %command.category, mutating, "manual retry");
        if mutating {
            self.write(workspace_root, command, shape).await
        } else {
            self.read(workspace_root, command, shape).await
        }
    }

    pub fn breaker_status(&self, category: &str) -> BreakerSnapshot {
        self.breaker.snapshot(category)
    }

    pub fn binary_status(&self, workspace_root: &Path) -> BinaryStatus {
        self.executor.resolver().status(workspace_root)
    }

    pub fn watcher_state(&self, workspace_root: &Path) -> Option<WatcherState> {
        self.entries()
            .get(&workspace_root_key(workspace_root))
            .map(|entry| entry.watcher.state())
    }

    pub fn subscribe_watcher_state(
        &self,
        workspace_root: &Path,
    ) -> Option<watch::Receiver<WatcherState>> {
        self.entries()
            .get(&workspace_root_key(workspace_root))
            .map(|entry| entry.watcher.subscribe())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, WorkspaceEntry>> {
        match self.workspaces.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for FlowBridge {
    fn drop(&mut self) {
        for (_, entry) in self.entries().drain() {
            entry.shut_down();
        }
    }
}

fn record_outcome(breaker: &CircuitBreaker, category: &str, result: &CommandResult) {
    match result {
        Ok(_) => breaker.reset(category),
        Err(_) => {
            breaker.record_failure(category);
        }
    }
}

fn change_handler(broadcaster: Arc<NotificationBroadcaster>, workspace_key: String) -> ChangeHandler {
    Arc::new(move |change: ChangeEvent| {
        let notice = ChangeNotice::new(workspace_key.clone(), change);
        let delivered = broadcaster.broadcast(&workspace_key, &notice);
        debug!(
            workspace = %workspace_key,
            category = notice.category.as_str(),
            id = notice.id.as_deref().unwrap_or(""),
            delivered,
            "broadcast change"
        );
    })
}

async fn forward_watcher_state(
    mut states: watch::Receiver<WatcherState>,
    broadcaster: Arc<NotificationBroadcaster>,
    workspace_key: String,
) {
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        broadcaster.broadcast_watcher_state(&workspace_key, &WatcherStateNotice::new(workspace_key.clone(), state));
    }
}
