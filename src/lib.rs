//! Bridge between the Flow desktop UI and the file-backed `flowctl` CLI.
//!
//! Commands run through [`FlowBridge`]: reads go straight to
//! [`CommandExecutor`], writes are serialized per workspace, and every
//! outcome feeds the per-category [`CircuitBreaker`]. Changes under a
//! workspace's `.flow/` directory are watched, debounced, classified and
//! fanned out to registered [`UiSurface`]s.

mod backend;
mod workspace;

pub use backend::change_notification_broadcast::{
    ChangeNotice, NotificationBroadcaster, UiSurface, WatcherStateNotice,
};
pub use backend::common::constants::{FLOW_CHANGE_EVENT, FLOW_WATCHER_STATE_EVENT};
pub use backend::common::errors::{BridgeError, CommandResult, RecoveryAffordance, ShapeViolation};
pub use backend::common::settings::{ensure_bridge_settings, BridgeSettings, RecursiveWatchStrategy};
pub use backend::directory_watch_pipeline::{
    classify, ChangeCategory, ChangeEvent, ChangeHandler, DebounceRouter, DirectoryWatcher,
    WatchSettings, WatcherState,
};
pub use backend::flow_binary_resolution::{
    BinaryResolution, BinaryResolver, BinarySource, BinaryStatus,
};
pub use backend::flow_command_execution::{
    validate_response, CommandExecutor, ExecutorLimits, FlowCommand, ResponseShape,
};
pub use backend::retry_circuit_breaker::{BreakerSnapshot, CircuitBreaker};
pub use backend::workspace_bridge_registry::{FlowBridge, OpenedWorkspace};
pub use backend::write_serialization_queue::{PendingWrite, WriteSerializer};

#[cfg(feature = "desktop")]
pub use backend::frontend_command_registry::run;
