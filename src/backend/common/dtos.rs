use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::backend::common::errors::{BridgeError, CommandResult, RecoveryAffordance};
use crate::backend::common::settings::BridgeSettings;
use crate::backend::directory_watch_pipeline::WatcherState;
use crate::backend::flow_binary_resolution::BinaryStatus;
use crate::backend::flow_command_execution::{FlowCommand, ResponseShape};
use crate::backend::retry_circuit_breaker::BreakerSnapshot;
use crate::workspace::{normalize_category, validate_flowctl_args, validate_workspace_root_path};

pub(crate) fn request_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WorkspaceRootPayload {
    pub(crate) workspace_root: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FlowCommandPayload {
    pub(crate) workspace_root: String,
    pub(crate) category: String,
    pub(crate) args: Vec<String>,
    pub(crate) stdin: Option<String>,
    pub(crate) timeout_ms: Option<u64>,
    /// JSON schema the parsed output must satisfy. Any JSON is accepted when absent.
    pub(crate) schema: Option<Value>,
    #[serde(default)]
    pub(crate) mutating: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BreakerStatusPayload {
    pub(crate) category: String,
}

/// A command payload that passed validation.
#[derive(Debug, Clone)]
pub(crate) struct FlowRequest {
    pub(crate) workspace_root: PathBuf,
    pub(crate) command: FlowCommand,
    pub(crate) shape: ResponseShape,
    pub(crate) mutating: bool,
}

impl FlowCommandPayload {
    pub(crate) fn into_request(self) -> Result<FlowRequest, String> {
        let workspace_root = validate_workspace_root_path(&self.workspace_root)?;
        let category = normalize_category(&self.category)?;
        let args = validate_flowctl_args(&self.args)?;
        let shape = match self.schema {
            Some(schema) => ResponseShape::from_schema(schema)?,
            None => ResponseShape::any(),
        };

        let mut command = FlowCommand::new(category, args);
        if let Some(timeout_ms) = self.timeout_ms {
            if timeout_ms == 0 {
                return Err("timeoutMs must be greater than zero.".to_string());
            }
            command = command.with_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(stdin) = self.stdin {
            command = command.with_stdin(stdin);
        }

        Ok(FlowRequest {
            workspace_root,
            command,
            shape,
            mutating: self.mutating,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FlowCommandResponse {
    pub(crate) request_id: String,
    pub(crate) ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) failure: Option<BridgeError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) recovery: Option<RecoveryAffordance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) auto_retry_allowed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl FlowCommandResponse {
    pub(crate) fn from_result(
        request_id: String,
        category: String,
        result: CommandResult,
        auto_retry_allowed: bool,
    ) -> Self {
        match result {
            Ok(data) => Self {
                request_id,
                ok: true,
                category: Some(category),
                data: Some(data),
                failure: None,
                recovery: None,
                auto_retry_allowed: Some(auto_retry_allowed),
                error: None,
            },
            Err(failure) => Self {
                request_id,
                ok: false,
                category: Some(category),
                data: None,
                recovery: Some(failure.recovery()),
                error: Some(failure.to_string()),
                failure: Some(failure),
                auto_retry_allowed: Some(auto_retry_allowed),
            },
        }
    }

    /// The payload never reached flowctl.
    pub(crate) fn rejected(request_id: String, error: String) -> Self {
        Self {
            request_id,
            ok: false,
            category: None,
            data: None,
            failure: None,
            recovery: None,
            auto_retry_allowed: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WorkspaceOpenResponse {
    pub(crate) request_id: String,
    pub(crate) ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) workspace_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) watcher_state: Option<WatcherState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) cancelled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WorkspaceCloseResponse {
    pub(crate) request_id: String,
    pub(crate) ok: bool,
    pub(crate) closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AckResponse {
    pub(crate) request_id: String,
    pub(crate) ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BreakerStatusResponse {
    pub(crate) request_id: String,
    pub(crate) ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) breaker: Option<BreakerSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BinaryStatusResponse {
    pub(crate) request_id: String,
    pub(crate) ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) status: Option<BinaryStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SettingsResponse {
    pub(crate) request_id: String,
    pub(crate) ok: bool,
    pub(crate) settings: BridgeSettings,
}
