mod change_classifier;
mod debounce_router;
mod watcher_runtime;

pub use change_classifier::{classify, ChangeCategory, ChangeEvent};
pub use debounce_router::DebounceRouter;
pub use watcher_runtime::{ChangeHandler, DirectoryWatcher, WatchSettings, WatcherState};
