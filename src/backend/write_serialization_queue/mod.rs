mod queue_runtime;

pub use queue_runtime::{PendingWrite, WriteSerializer};
