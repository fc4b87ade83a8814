use serde::Serialize;
use thiserror::Error;

/// Outcome of a single flowctl invocation, as seen by every bridge caller.
pub type CommandResult = Result<serde_json::Value, BridgeError>;

/// One field-level mismatch between parsed flowctl output and the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeViolation {
    /// JSON pointer into the parsed output (`""` is the document root).
    pub path: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BridgeError {
    #[error("flowctl could not be started from {binary}: {message}")]
    BinaryNotFound { binary: String, message: String },

    #[error("flowctl did not finish within {timeout_ms} ms and was terminated")]
    Timeout { timeout_ms: u64 },

    #[error("flowctl exited unsuccessfully ({}): {stderr}", describe_exit_code(.exit_code))]
    NonZeroExit {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("flowctl output is not valid JSON: {message}")]
    MalformedOutput { message: String, snippet: String },

    #[error("flowctl output did not match the expected shape ({} violations)", .violations.len())]
    SchemaViolation { violations: Vec<ShapeViolation> },
}

/// What the UI offers next to a surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryAffordance {
    InstallBinary,
    Retry,
    InspectOutput,
}

impl BridgeError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BinaryNotFound { .. } => "binaryNotFound",
            Self::Timeout { .. } => "timeout",
            Self::NonZeroExit { .. } => "nonZeroExit",
            Self::MalformedOutput { .. } => "malformedOutput",
            Self::SchemaViolation { .. } => "schemaViolation",
        }
    }

    pub fn recovery(&self) -> RecoveryAffordance {
        match self {
            Self::BinaryNotFound { .. } => RecoveryAffordance::InstallBinary,
            Self::Timeout { .. } | Self::NonZeroExit { .. } => RecoveryAffordance::Retry,
            Self::MalformedOutput { .. } | Self::SchemaViolation { .. } => {
                RecoveryAffordance::InspectOutput
            }
        }
    }

    pub(crate) fn aborted_write(label: &str) -> Self {
        Self::NonZeroExit {
            exit_code: None,
            stderr: format!("write operation \"{label}\" stopped before producing a result"),
        }
    }
}

fn describe_exit_code(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn serializes_with_kind_tag_and_camel_case_fields() {
        let error = BridgeError::NonZeroExit {
            exit_code: Some(2),
            stderr: "epic not found".to_string(),
        };
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "kind": "nonZeroExit",
                "exitCode": 2,
                "stderr": "epic not found"
            })
        );
    }

    #[test]
    fn maps_kinds_to_recovery_affordances() {
        let missing = BridgeError::BinaryNotFound {
            binary: "flowctl".to_string(),
            message: "No such file or directory".to_string(),
        };
        assert_eq!(missing.recovery(), RecoveryAffordance::InstallBinary);
        assert_eq!(
            BridgeError::Timeout { timeout_ms: 10 }.recovery(),
            RecoveryAffordance::Retry
        );
        assert_eq!(
            BridgeError::SchemaViolation { violations: Vec::new() }.recovery(),
            RecoveryAffordance::InspectOutput
        );
    }

    #[test]
    fn describes_signal_termination() {
        let error = BridgeError::NonZeroExit {
            exit_code: None,
            stderr: "killed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "flowctl exited unsuccessfully (terminated by signal): killed"
        );
    }
}
