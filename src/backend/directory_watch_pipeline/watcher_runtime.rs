use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::change_classifier::{classify, ChangeEvent};
use super::debounce_router::DebounceRouter;
use crate::backend::common::constants::MAX_ENUMERATED_WATCH_DIRECTORIES;
use crate::backend::common::settings::{BridgeSettings, RecursiveWatchStrategy};
use crate::workspace::relative_change_key;

/// Debounce key for the synthetic notification sent on promotion. Real change
/// keys are never empty.
const PROMOTION_KEY: &str = "";

pub type ChangeHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

type RawEvent = (u64, notify::Result<Event>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WatcherState {
    Uninitialized,
    WatchingTarget,
    WatchingParent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub debounce_window: Duration,
    pub poll_interval: Duration,
    pub strategy: RecursiveWatchStrategy,
    pub enumerated_depth: usize,
}

impl From<&BridgeSettings> for WatchSettings {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            debounce_window: settings.debounce_window(),
            poll_interval: settings.parent_poll_interval(),
            strategy: settings.recursive_watch,
            enumerated_depth: settings.enumerated_watch_depth,
        }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self::from(&BridgeSettings::default())
    }
}

struct RunningWatch {
    task: JoinHandle<()>,
    control: Arc<WatchControl>,
}

/// Shared between a watcher and its loop task. `stop` flips `active` and
/// drops the OS handle itself, without waiting for the task to be polled.
struct WatchControl {
    active: AtomicBool,
    handle: Mutex<Option<ActiveHandle>>,
}

impl WatchControl {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            handle: Mutex::new(None),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn handle(&self) -> MutexGuard<'_, Option<ActiveHandle>> {
        match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stores `handle` as the open watch; a stopped loop drops it instead.
    fn install(&self, handle: ActiveHandle) -> bool {
        let mut slot = self.handle();
        if !self.is_active() {
            return false;
        }
        *slot = Some(handle);
        true
    }

    fn close(&self) -> Option<ActiveHandle> {
        self.handle().take()
    }

    fn has_handle(&self) -> bool {
        self.handle().is_some()
    }

    fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        drop(self.close());
    }
}

/// Watches one directory that may not exist yet. While it is missing the
/// parent is watched instead, and the watcher promotes itself back as soon
/// as the directory reappears. At most one OS watch handle is open.
pub struct DirectoryWatcher {
    target: PathBuf,
    settings: WatchSettings,
    state_tx: watch::Sender<WatcherState>,
    debounce: Arc<DebounceRouter>,
    running: Option<RunningWatch>,
}

impl DirectoryWatcher {
    pub fn new(target: impl Into<PathBuf>, settings: WatchSettings) -> Self {
        let (state_tx, _) = watch::channel(WatcherState::Uninitialized);
        let debounce = Arc::new(DebounceRouter::new(settings.debounce_window));
        Self {
            target: target.into(),
            settings,
            state_tx,
            debounce,
            running: None,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn state(&self) -> WatcherState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatcherState> {
        self.state_tx.subscribe()
    }

    /// Begins watching and routes classified, debounced changes to `handler`.
    /// Restarts cleanly when already running. Must be called from within a
    /// Tokio runtime.
    pub fn start(&mut self, handler: ChangeHandler) {
        self.stop();

        let control = Arc::new(WatchControl::new());
        let (mut watch_loop, raw_rx) = WatchLoop::new(
            self.target.clone(),
            self.settings.clone(),
            self.state_tx.clone(),
            self.debounce.clone(),
            handler,
            control.clone(),
        );
        watch_loop.initialize();

        let task = tokio::spawn(watch_loop.run(raw_rx));
        self.running = Some(RunningWatch { task, control });
    }

    /// Closes the open handle and drops pending notifications.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.control.shutdown();
        running.task.abort();
        self.debounce.cancel_all();
        if self.state_tx.send_replace(WatcherState::Uninitialized) != WatcherState::Uninitialized {
            info!(dir = %self.target.display(), "stopped directory watcher");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ActiveHandle {
    watcher: RecommendedWatcher,
    watched: HashSet<PathBuf>,
}

struct WatchLoop {
    target: PathBuf,
    canonical_target: Option<PathBuf>,
    parent: PathBuf,
    settings: WatchSettings,
    raw_tx: mpsc::UnboundedSender<RawEvent>,
    generation: u64,
    state_tx: watch::Sender<WatcherState>,
    debounce: Arc<DebounceRouter>,
    handler: ChangeHandler,
    control: Arc<WatchControl>,
}

impl WatchLoop {
    fn new(
        target: PathBuf,
        settings: WatchSettings,
        state_tx: watch::Sender<WatcherState>,
        debounce: Arc<DebounceRouter>,
        handler: ChangeHandler,
        control: Arc<WatchControl>,
    ) -> (Self, mpsc::UnboundedReceiver<RawEvent>) {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watch_loop = Self {
            parent: parent_of(&target),
            target,
            canonical_target: None,
            settings,
            raw_tx,
            generation: 0,
            state_tx,
            debounce,
            handler,
            control,
        };
        (watch_loop, raw_rx)
    }

    fn initialize(&mut self) {
        if self.target.is_dir() {
            self.enter_target();
        } else {
            self.watch_parent();
        }
    }

    async fn run(mut self, mut raw_rx: mpsc::UnboundedReceiver<RawEvent>) {
        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        loop {
            tokio::select! {
                Some((generation, result)) = raw_rx.recv() => {
                    if generation != self.generation {
                        continue;
                    }
                    match result {
                        Ok(event) => self.handle_event(event),
                        Err(error) => self.handle_error(error),
                    }
                }
                _ = poll.tick() => self.poll_target(),
            }
        }
    }

    fn state(&self) -> WatcherState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: WatcherState) {
        let mut previous = None;
        self.state_tx.send_if_modified(|state| {
            // Checked under the channel lock: once stopped, Uninitialized sticks.
            if !self.control.is_active() || *state == next {
                return false;
            }
            previous = Some(std::mem::replace(state, next));
            true
        });

        if let Some(previous) = previous {
            info!(
                dir = %self.target.display(),
                from = ?previous,
                to = ?next,
                "directory watcher state changed"
            );
        }
    }

    fn handle_event(&mut self, event: Event) {
        match self.state() {
            WatcherState::WatchingTarget => self.handle_target_event(event),
            WatcherState::WatchingParent => self.handle_parent_event(event),
            WatcherState::Uninitialized => {}
        }
    }

    fn handle_target_event(&mut self, event: Event) {
        if is_content_change(&event.kind) {
            let created = matches!(event.kind, EventKind::Create(_));
            for path in &event.paths {
                let Some(key) = self.relative_key(path) else {
                    continue;
                };
                if created && self.settings.strategy == RecursiveWatchStrategy::Enumerated && path.is_dir() {
                    self.watch_new_directory(path, &key);
                }
                self.route(key);
            }
        }

        if !self.target.is_dir() {
            self.fall_back_to_parent("watched directory disappeared");
        }
    }

    fn handle_parent_event(&mut self, event: Event) {
        if !is_content_change(&event.kind) {
            return;
        }
        let names_target = event
            .paths
            .iter()
            .any(|path| path.file_name().is_some() && path.file_name() == self.target.file_name());
        if names_target && self.target.is_dir() {
            self.promote();
        }
    }

    fn handle_error(&mut self, error: notify::Error) {
        match self.state() {
            WatcherState::WatchingTarget => {
                warn!(dir = %self.target.display(), %error, "directory watch failed");
                self.fall_back_to_parent("watch handle reported an error");
            }
            WatcherState::WatchingParent => {
                warn!(parent = %self.parent.display(), %error, "parent watch failed; reopening");
                self.watch_parent();
            }
            WatcherState::Uninitialized => {}
        }
    }

    /// Safety net for platforms that drop create/delete events.
    fn poll_target(&mut self) {
        match self.state() {
            WatcherState::WatchingTarget if !self.target.is_dir() => {
                self.fall_back_to_parent("watched directory missing on poll");
            }
            WatcherState::WatchingParent if self.target.is_dir() => self.promote(),
            WatcherState::WatchingParent if !self.control.has_handle() => self.watch_parent(),
            _ => {}
        }
    }

    fn route(&self, key: String) {
        let Some(change) = classify(&key) else {
            return;
        };
        self.dispatch(key, change);
    }

    fn dispatch(&self, key: String, change: ChangeEvent) {
        let handler = self.handler.clone();
        let control = self.control.clone();
        self.debounce.on_event(key, move || {
            if control.is_active() {
                handler(change);
            }
        });
    }

    fn promote(&mut self) {
        if !self.target.is_dir() {
            return;
        }
        if self.enter_target() {
            self.dispatch(PROMOTION_KEY.to_string(), ChangeEvent::config());
        }
    }

    /// Opens the target watch, landing on the parent watch when the directory
    /// vanished after its existence check.
    fn enter_target(&mut self) -> bool {
        match self.open_target() {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    dir = %self.target.display(),
                    %error,
                    "failed to watch directory; watching parent instead"
                );
                self.watch_parent();
                false
            }
        }
    }

    fn fall_back_to_parent(&mut self, reason: &str) {
        debug!(dir = %self.target.display(), reason, "falling back to parent watch");
        self.watch_parent();
    }

    fn watch_parent(&mut self) {
        self.close();
        self.set_state(WatcherState::WatchingParent);
        match self.open_parent() {
            Ok(handle) => {
                self.control.install(handle);
            }
            Err(error) => warn!(
                parent = %self.parent.display(),
                %error,
                "failed to watch parent directory; relying on polling"
            ),
        }
    }

    fn open_target(&mut self) -> notify::Result<()> {
        self.close();
        let mut watcher = self.new_os_watcher()?;
        let watched = match self.settings.strategy {
            RecursiveWatchStrategy::Native => {
                watcher.watch(&self.target, RecursiveMode::Recursive)?;
                HashSet::from([self.target.clone()])
            }
            RecursiveWatchStrategy::Enumerated => self.watch_enumerated(&mut watcher)?,
        };
        self.canonical_target = self.target.canonicalize().ok();
        self.control.install(ActiveHandle { watcher, watched });
        self.set_state(WatcherState::WatchingTarget);
        Ok(())
    }

    fn open_parent(&mut self) -> notify::Result<ActiveHandle> {
        let mut watcher = self.new_os_watcher()?;
        watcher.watch(&self.parent, RecursiveMode::NonRecursive)?;
        Ok(ActiveHandle {
            watcher,
            watched: HashSet::from([self.parent.clone()]),
        })
    }

    fn new_os_watcher(&mut self) -> notify::Result<RecommendedWatcher> {
        self.generation += 1;
        let generation = self.generation;
        let raw_tx = self.raw_tx.clone();
        notify::recommended_watcher(move |result: notify::Result<Event>| {
            let _ = raw_tx.send((generation, result));
        })
    }

    fn watch_enumerated(&self, watcher: &mut RecommendedWatcher) -> notify::Result<HashSet<PathBuf>> {
        watcher.watch(&self.target, RecursiveMode::NonRecursive)?;
        let mut watched = HashSet::from([self.target.clone()]);

        let directories = WalkDir::new(&self.target)
            .min_depth(1)
            .max_depth(self.settings.enumerated_depth)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_dir());
        for entry in directories {
            if watched.len() >= MAX_ENUMERATED_WATCH_DIRECTORIES {
                warn!(
                    dir = %self.target.display(),
                    limit = MAX_ENUMERATED_WATCH_DIRECTORIES,
                    "too many directories to enumerate; deeper changes will be missed"
                );
                break;
            }
            match watcher.watch(entry.path(), RecursiveMode::NonRecursive) {
                Ok(()) => {
                    watched.insert(entry.into_path());
                }
                Err(error) => debug!(path = %entry.path().display(), %error, "skipped directory watch"),
            }
        }

        Ok(watched)
    }

    fn watch_new_directory(&mut self, path: &Path, key: &str) {
        if key.split('/').count() > self.settings.enumerated_depth {
            return;
        }
        let mut slot = self.control.handle();
        let Some(handle) = slot.as_mut() else {
            return;
        };
        if handle.watched.contains(path) || handle.watched.len() >= MAX_ENUMERATED_WATCH_DIRECTORIES {
            return;
        }
        match handle.watcher.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => {
                handle.watched.insert(path.to_path_buf());
            }
            Err(error) => debug!(path = %path.display(), %error, "failed to watch new directory"),
        }
    }

    fn relative_key(&self, path: &Path) -> Option<String> {
        relative_change_key(&self.target, path).or_else(|| {
            self.canonical_target
                .as_deref()
                .and_then(|canonical| relative_change_key(canonical, path))
        })
    }

    fn close(&mut self) {
        if let Some(handle) = self.control.close() {
            debug!(paths = handle.watched.len(), "closing watch handle");
        }
    }
}

/// Access events (opens, reads, close-after-read) never change content.
fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn parent_of(target: &Path) -> PathBuf {
    target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::directory_watch_pipeline::ChangeCategory;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_settings(strategy: RecursiveWatchStrategy) -> WatchSettings {
        WatchSettings {
            debounce_window: Duration::from_millis(30),
            poll_interval: Duration::from_millis(50),
            strategy,
            enumerated_depth: 4,
        }
    }

    fn recorder() -> (ChangeHandler, Arc<Mutex<Vec<ChangeEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let handler: ChangeHandler = Arc::new(move |change| sink.lock().unwrap().push(change));
        (handler, events)
    }

    async fn wait_for_state(watcher: &DirectoryWatcher, expected: WatcherState) {
        let mut states = watcher.subscribe();
        tokio::time::timeout(WAIT, states.wait_for(|state| *state == expected))
            .await
            .unwrap_or_else(|_| panic!("watcher never reached {expected:?}"))
            .unwrap();
    }

    async fn wait_for_event(events: &Arc<Mutex<Vec<ChangeEvent>>>, expected: &ChangeEvent) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            if events.lock().unwrap().contains(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("never observed {expected:?}; saw {:?}", events.lock().unwrap());
    }

    async fn quiesce() {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    fn task_change(id: &str) -> ChangeEvent {
        ChangeEvent {
            category: ChangeCategory::Task,
            id: Some(id.to_string()),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn watches_target_and_classifies_changes() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join(".flow");
        fs::create_dir_all(target.join("tasks")).unwrap();
        fs::create_dir_all(target.join("bin")).unwrap();

        let mut watcher = DirectoryWatcher::new(&target, fast_settings(RecursiveWatchStrategy::Native));
        let (handler, events) = recorder();
        watcher.start(handler);
        assert_eq!(watcher.state(), WatcherState::WatchingTarget);

        fs::write(target.join("bin").join("flowctl"), "#!/bin/sh\n").unwrap();
        fs::write(target.join("tasks").join("fn-1.2.json"), "{}").unwrap();

        wait_for_event(&events, &task_change("fn-1.2")).await;
        quiesce().await;
        let seen = events.lock().unwrap().clone();
        assert!(seen.iter().all(|change| change.category == ChangeCategory::Task));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn burst_of_writes_to_one_file_notifies_once() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join(".flow");
        fs::create_dir_all(target.join("tasks")).unwrap();

        let mut watcher = DirectoryWatcher::new(&target, fast_settings(RecursiveWatchStrategy::Native));
        let (handler, events) = recorder();
        watcher.start(handler);

        let file = target.join("tasks").join("fn-4.1.json");
        for attempt in 0..5 {
            fs::write(&file, format!("{{\"attempt\": {attempt}}}")).unwrap();
        }

        wait_for_event(&events, &task_change("fn-4.1")).await;
        quiesce().await;
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reading_files_and_listing_directories_is_silent() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join(".flow");
        fs::create_dir_all(target.join("tasks")).unwrap();
        fs::write(target.join("tasks").join("fn-1.1.json"), "{}").unwrap();
        fs::write(target.join("config.json"), "{}").unwrap();

        let mut watcher = DirectoryWatcher::new(&target, fast_settings(RecursiveWatchStrategy::Native));
        let (handler, events) = recorder();
        watcher.start(handler);
        quiesce().await;
        events.lock().unwrap().clear();

        fs::read_to_string(target.join("tasks").join("fn-1.1.json")).unwrap();
        fs::read_to_string(target.join("config.json")).unwrap();
        let listed = fs::read_dir(target.join("tasks")).unwrap().count();
        assert_eq!(listed, 1);

        quiesce().await;
        assert_eq!(*events.lock().unwrap(), Vec::<ChangeEvent>::new());
        assert_eq!(watcher.state(), WatcherState::WatchingTarget);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn starts_on_parent_and_promotes_when_directory_appears() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join(".flow");

        let mut watcher = DirectoryWatcher::new(&target, fast_settings(RecursiveWatchStrategy::Native));
        let (handler, events) = recorder();
        watcher.start(handler);
        assert_eq!(watcher.state(), WatcherState::WatchingParent);

        fs::create_dir_all(&target).unwrap();
        wait_for_state(&watcher, WatcherState::WatchingTarget).await;
        wait_for_event(&events, &ChangeEvent::config()).await;
        quiesce().await;
        assert_eq!(*events.lock().unwrap(), vec![ChangeEvent::config()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn survives_delete_and_recreate() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join(".flow");
        fs::create_dir_all(target.join("epics")).unwrap();
        fs::write(target.join("epics").join("fn-1.json"), "{}").unwrap();

        let mut watcher = DirectoryWatcher::new(&target, fast_settings(RecursiveWatchStrategy::Native));
        let (handler, events) = recorder();
        watcher.start(handler);
        assert_eq!(watcher.state(), WatcherState::WatchingTarget);

        fs::remove_dir_all(&target).unwrap();
        wait_for_state(&watcher, WatcherState::WatchingParent).await;
        quiesce().await;
        events.lock().unwrap().clear();

        fs::create_dir_all(&target).unwrap();
        wait_for_state(&watcher, WatcherState::WatchingTarget).await;
        wait_for_event(&events, &ChangeEvent::config()).await;
        quiesce().await;
        assert_eq!(*events.lock().unwrap(), vec![ChangeEvent::config()]);

        fs::create_dir_all(target.join("tasks")).unwrap();
        fs::write(target.join("tasks").join("fn-1.3.md"), "notes").unwrap();
        wait_for_event(&events, &task_change("fn-1.3")).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn enumerated_strategy_sees_existing_and_new_directories() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join(".flow");
        fs::create_dir_all(target.join("epics")).unwrap();

        let mut watcher =
            DirectoryWatcher::new(&target, fast_settings(RecursiveWatchStrategy::Enumerated));
        let (handler, events) = recorder();
        watcher.start(handler);
        assert_eq!(watcher.state(), WatcherState::WatchingTarget);

        fs::write(target.join("epics").join("fn-2.json"), "{}").unwrap();
        wait_for_event(
            &events,
            &ChangeEvent {
                category: ChangeCategory::Epic,
                id: Some("fn-2".to_string()),
            },
        )
        .await;

        fs::create_dir_all(target.join("tasks")).unwrap();
        quiesce().await;
        fs::write(target.join("tasks").join("fn-2.1.json"), "{}").unwrap();
        wait_for_event(&events, &task_change("fn-2.1")).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_silences_pending_and_future_changes() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join(".flow");
        fs::create_dir_all(target.join("tasks")).unwrap();

        let mut watcher = DirectoryWatcher::new(&target, fast_settings(RecursiveWatchStrategy::Native));
        let (handler, events) = recorder();
        watcher.start(handler);

        fs::write(target.join("tasks").join("fn-5.1.json"), "{}").unwrap();
        watcher.stop();
        assert_eq!(watcher.state(), WatcherState::Uninitialized);
        assert!(!watcher.is_running());

        fs::write(target.join("tasks").join("fn-5.2.json"), "{}").unwrap();
        quiesce().await;
        assert!(events.lock().unwrap().is_empty());
    }

    fn detached_loop(target: PathBuf, strategy: RecursiveWatchStrategy) -> (
        WatchLoop,
        watch::Sender<WatcherState>,
        Arc<WatchControl>,
        Arc<Mutex<Vec<ChangeEvent>>>,
    ) {
        let (state_tx, _) = watch::channel(WatcherState::Uninitialized);
        let control = Arc::new(WatchControl::new());
        let (handler, events) = recorder();
        let (watch_loop, _raw_rx) = WatchLoop::new(
            target,
            fast_settings(strategy),
            state_tx.clone(),
            Arc::new(DebounceRouter::new(Duration::from_millis(30))),
            handler,
            control.clone(),
        );
        (watch_loop, state_tx, control, events)
    }

    #[test]
    fn directory_vanishing_before_the_watch_call_lands_on_parent() {
        for strategy in [RecursiveWatchStrategy::Native, RecursiveWatchStrategy::Enumerated] {
            let root = tempfile::tempdir().unwrap();
            let target = root.path().join(".flow");
            fs::create_dir_all(&target).unwrap();
            assert!(target.is_dir());
            fs::remove_dir_all(&target).unwrap();

            let (mut watch_loop, state_tx, control, events) = detached_loop(target, strategy);
            assert!(!watch_loop.enter_target());
            assert_eq!(*state_tx.borrow(), WatcherState::WatchingParent);
            assert!(control.has_handle());
            assert!(events.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn stopped_loop_cannot_reopen_a_handle_or_change_state() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join(".flow");
        fs::create_dir_all(&target).unwrap();

        let (mut watch_loop, state_tx, control, _events) =
            detached_loop(target, RecursiveWatchStrategy::Native);
        watch_loop.initialize();
        assert_eq!(*state_tx.borrow(), WatcherState::WatchingTarget);
        assert!(control.has_handle());

        control.shutdown();
        state_tx.send_replace(WatcherState::Uninitialized);
        assert!(!control.has_handle());

        watch_loop.fall_back_to_parent("late event from an unwinding loop");
        watch_loop.promote();
        assert_eq!(*state_tx.borrow(), WatcherState::Uninitialized);
        assert!(!control.has_handle());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_and_restart_close_the_previous_handle_immediately() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join(".flow");
        fs::create_dir_all(&target).unwrap();

        let mut watcher = DirectoryWatcher::new(&target, fast_settings(RecursiveWatchStrategy::Native));
        let (handler, _events) = recorder();
        watcher.start(handler.clone());
        let first = watcher.running.as_ref().unwrap().control.clone();
        assert!(first.has_handle());

        watcher.start(handler);
        assert!(!first.has_handle());
        let second = watcher.running.as_ref().unwrap().control.clone();
        assert!(second.has_handle());
        assert_eq!(watcher.state(), WatcherState::WatchingTarget);

        watcher.stop();
        assert!(!second.has_handle());
        assert_eq!(watcher.state(), WatcherState::Uninitialized);
    }
}
