use std::path::Path;
use std::sync::Arc;
use tauri::{AppHandle, Manager, WebviewWindow};

use super::webview_surface::WebviewSurface;
use crate::backend::common::dtos::{
    request_id, AckResponse, WorkspaceCloseResponse, WorkspaceOpenResponse, WorkspaceRootPayload,
};
use crate::backend::workspace_bridge_registry::FlowBridge;
use crate::workspace::validate_workspace_root_path;

fn open_response(request_id: String, bridge: &FlowBridge, workspace_root: &str) -> WorkspaceOpenResponse {
    match bridge.open_workspace(workspace_root) {
        Ok(opened) => WorkspaceOpenResponse {
            request_id,
            ok: true,
            workspace_root: Some(opened.workspace_root),
            watcher_state: Some(opened.watcher_state),
            cancelled: None,
            error: None,
        },
        Err(error) => WorkspaceOpenResponse {
            request_id,
            ok: false,
            workspace_root: None,
            watcher_state: None,
            cancelled: None,
            error: Some(error),
        },
    }
}

#[tauri::command]
pub(crate) async fn flow_workspace_open(
    app: AppHandle,
    payload: WorkspaceRootPayload,
) -> WorkspaceOpenResponse {
    let bridge = app.state::<FlowBridge>();
    open_response(request_id(), &bridge, &payload.workspace_root)
}

#[tauri::command]
pub(crate) fn flow_workspace_pick_and_open(app: AppHandle) -> WorkspaceOpenResponse {
    let request_id = request_id();
    let picked = rfd::FileDialog::new().pick_folder();
    let Some(selected) = picked else {
        return WorkspaceOpenResponse {
            request_id,
            ok: false,
            workspace_root: None,
            watcher_state: None,
            cancelled: Some(true),
            error: None,
        };
    };

    let workspace_root = selected.display().to_string();
    // The watcher spawns tasks, so opening has to happen on the async runtime.
    tauri::async_runtime::block_on(async move {
        let bridge = app.state::<FlowBridge>();
        open_response(request_id, &bridge, &workspace_root)
    })
}

#[tauri::command]
pub(crate) fn flow_workspace_close(
    app: AppHandle,
    payload: WorkspaceRootPayload,
) -> WorkspaceCloseResponse {
    let request_id = request_id();
    let bridge = app.state::<FlowBridge>();
    let closed = bridge.close_workspace(Path::new(payload.workspace_root.trim()));
    WorkspaceCloseResponse {
        request_id,
        ok: true,
        closed,
        error: None,
    }
}

/// Subscribes the calling window to change notifications for a workspace.
#[tauri::command]
pub(crate) fn flow_surface_register(
    app: AppHandle,
    window: WebviewWindow,
    payload: WorkspaceRootPayload,
) -> AckResponse {
    let request_id = request_id();
    let root = match validate_workspace_root_path(&payload.workspace_root) {
        Ok(root) => root,
        Err(error) => {
            return AckResponse {
                request_id,
                ok: false,
                error: Some(error),
            }
        }
    };

    let bridge = app.state::<FlowBridge>();
    let surface = WebviewSurface::new(app.clone(), window.label());
    bridge.register_surface(&root, Arc::new(surface));

    AckResponse {
        request_id,
        ok: true,
        error: None,
    }
}
