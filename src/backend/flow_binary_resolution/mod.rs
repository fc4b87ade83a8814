mod resolver_runtime;

pub(crate) use resolver_runtime::workspace_binary_override;
pub use resolver_runtime::{BinaryResolution, BinaryResolver, BinarySource, BinaryStatus};
