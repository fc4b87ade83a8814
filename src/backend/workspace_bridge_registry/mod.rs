mod bridge_runtime;

pub use bridge_runtime::{FlowBridge, OpenedWorkspace};
