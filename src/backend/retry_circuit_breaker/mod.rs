mod breaker_runtime;

pub use breaker_runtime::{BreakerSnapshot, CircuitBreaker};
