use std::path::Path;
use tauri::{AppHandle, Manager};

use crate::backend::common::dtos::{
    request_id, AckResponse, BinaryStatusResponse, BreakerStatusPayload, BreakerStatusResponse,
    FlowCommandPayload, FlowCommandResponse, SettingsResponse, WorkspaceRootPayload,
};
use crate::backend::workspace_bridge_registry::FlowBridge;
use crate::workspace::{normalize_category, validate_workspace_root_path};

#[tauri::command]
pub(crate) async fn flow_read(app: AppHandle, payload: FlowCommandPayload) -> FlowCommandResponse {
    let request_id = request_id();
    let request = match payload.into_request() {
        Ok(request) => request,
        Err(error) => return FlowCommandResponse::rejected(request_id, error),
    };

    let bridge = app.state::<FlowBridge>();
    let category = request.command.category.clone();
    let result = bridge
        .read(&request.workspace_root, request.command, request.shape)
        .await;
    let auto_retry_allowed = bridge.auto_retry_allowed(&category);
    FlowCommandResponse::from_result(request_id, category, result, auto_retry_allowed)
}

#[tauri::command]
pub(crate) async fn flow_write(app: AppHandle, payload: FlowCommandPayload) -> FlowCommandResponse {
    let request_id = request_id();
    let request = match payload.into_request() {
        Ok(request) => request,
        Err(error) => return FlowCommandResponse::rejected(request_id, error),
    };

    let bridge = app.state::<FlowBridge>();
    let category = request.command.category.clone();
    let result = bridge
        .write(&request.workspace_root, request.command, request.shape)
        .await;
    let auto_retry_allowed = bridge.auto_retry_allowed(&category);
    FlowCommandResponse::from_result(request_id, category, result, auto_retry_allowed)
}

#[tauri::command]
pub(crate) async fn flow_write_detached(app: AppHandle, payload: FlowCommandPayload) -> AckResponse {
    let request_id = request_id();
    match payload.into_request() {
        Ok(request) => {
            let bridge = app.state::<FlowBridge>();
            bridge.submit_detached(&request.workspace_root, request.command, request.shape);
            AckResponse {
                request_id,
                ok: true,
                error: None,
            }
        }
        Err(error) => AckResponse {
            request_id,
            ok: false,
            error: Some(error),
        },
    }
}

/// Re-issues a failed command on the user's behalf, even when automatic
/// retries for its category are suspended.
#[tauri::command]
pub(crate) async fn flow_manual_retry(
    app: AppHandle,
    payload: FlowCommandPayload,
) -> FlowCommandResponse {
    let request_id = request_id();
    let request = match payload.into_request() {
        Ok(request) => request,
        Err(error) => return FlowCommandResponse::rejected(request_id, error),
    };

    let bridge = app.state::<FlowBridge>();
    let category = request.command.category.clone();
    let result = bridge
        .manual_retry(
            &request.workspace_root,
            request.command,
            request.shape,
            request.mutating,
        )
        .await;
    let auto_retry_allowed = bridge.auto_retry_allowed(&category);
    FlowCommandResponse::from_result(request_id, category, result, auto_retry_allowed)
}

#[tauri::command]
pub(crate) fn flow_breaker_status(
    app: AppHandle,
    payload: BreakerStatusPayload,
) -> BreakerStatusResponse {
    let request_id = request_id();
    match normalize_category(&payload.category) {
        Ok(category) => BreakerStatusResponse {
            request_id,
            ok: true,
            breaker: Some(app.state::<FlowBridge>().breaker_status(&category)),
            error: None,
        },
        Err(error) => BreakerStatusResponse {
            request_id,
            ok: false,
            breaker: None,
            error: Some(error),
        },
    }
}

#[tauri::command]
pub(crate) fn flow_binary_status(
    app: AppHandle,
    payload: WorkspaceRootPayload,
) -> BinaryStatusResponse {
    let request_id = request_id();
    match validate_workspace_root_path(&payload.workspace_root) {
        Ok(root) => BinaryStatusResponse {
            request_id,
            ok: true,
            status: Some(app.state::<FlowBridge>().binary_status(Path::new(&root))),
            error: None,
        },
        Err(error) => BinaryStatusResponse {
            request_id,
            ok: false,
            status: None,
            error: Some(error),
        },
    }
}

#[tauri::command]
pub(crate) fn flow_settings_get(app: AppHandle) -> SettingsResponse {
    SettingsResponse {
        request_id: request_id(),
        ok: true,
        settings: app.state::<FlowBridge>().settings().clone(),
    }
}
