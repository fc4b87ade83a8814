pub mod change_notification_broadcast;
pub mod common;
pub mod directory_watch_pipeline;
pub mod flow_binary_resolution;
pub mod flow_command_execution;
#[cfg(feature = "desktop")]
pub(crate) mod frontend_command_registry;
pub mod retry_circuit_breaker;
pub mod workspace_bridge_registry;
pub mod write_serialization_queue;
