mod executor_runtime;
mod response_validation;

pub use executor_runtime::{CommandExecutor, ExecutorLimits, FlowCommand};
pub use response_validation::{validate_response, ResponseShape};
