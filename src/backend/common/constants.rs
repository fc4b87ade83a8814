use std::time::Duration;

pub(crate) const FLOW_DIR_NAME: &str = ".flow";
pub(crate) const FLOWCTL_BINARY_NAME: &str = "flowctl";
pub(crate) const FLOWCTL_BIN_ENV: &str = "FLOWCTL_BIN";
pub(crate) const FLOWCTL_JSON_FLAG: &str = "--json";
pub(crate) const WORKSPACE_BINARY_OVERRIDE: [&str; 3] = [FLOW_DIR_NAME, "bin", FLOWCTL_BINARY_NAME];

pub(crate) const EPIC_STORAGE_DIRS: [&str; 2] = ["epics", "specs"];
pub(crate) const TASK_STORAGE_DIR: &str = "tasks";
pub(crate) const BINARY_STORAGE_DIR: &str = "bin";
pub(crate) const RECOGNIZED_ID_SUFFIXES: [&str; 2] = [".json", ".md"];

pub(crate) const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;
pub(crate) const DEFAULT_SNIPPET_LIMIT_BYTES: usize = 500;
pub(crate) const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);
pub(crate) const DEFAULT_BREAKER_THRESHOLD: u32 = 3;
pub(crate) const DEFAULT_PARENT_POLL_INTERVAL: Duration = Duration::from_millis(1800);
pub(crate) const DEFAULT_ENUMERATED_WATCH_DEPTH: usize = 4;

pub(crate) const MIN_COMMAND_TIMEOUT_MS: u64 = 100;
pub(crate) const MAX_COMMAND_TIMEOUT_MS: u64 = 120_000;
pub(crate) const MIN_OUTPUT_LIMIT_BYTES: usize = 4 * 1024;
pub(crate) const MAX_OUTPUT_LIMIT_BYTES: usize = 16 * 1024 * 1024;
pub(crate) const MIN_DEBOUNCE_MS: u64 = 10;
pub(crate) const MAX_DEBOUNCE_MS: u64 = 5_000;
pub(crate) const MIN_BREAKER_THRESHOLD: u32 = 1;
pub(crate) const MAX_BREAKER_THRESHOLD: u32 = 20;
pub(crate) const MIN_PARENT_POLL_MS: u64 = 50;
pub(crate) const MAX_PARENT_POLL_MS: u64 = 60_000;
pub(crate) const MAX_ENUMERATED_WATCH_DEPTH: usize = 16;
pub(crate) const MAX_ENUMERATED_WATCH_DIRECTORIES: usize = 2500;

pub(crate) const OUTPUT_READ_CHUNK_BYTES: usize = 8 * 1024;
pub(crate) const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

pub const FLOW_CHANGE_EVENT: &str = "flow-change";
pub const FLOW_WATCHER_STATE_EVENT: &str = "flow-watcher-state";
