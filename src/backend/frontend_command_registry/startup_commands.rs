use std::fs;
use tauri::{AppHandle, Manager};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use super::{flow_commands, workspace_commands};
use crate::backend::common::settings::{ensure_bridge_settings, BridgeSettings};
use crate::backend::workspace_bridge_registry::FlowBridge;

const BRIDGE_SETTINGS_FILE: &str = "bridge-settings.json";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_bridge_settings(app: &AppHandle) -> BridgeSettings {
    let loaded = app
        .path()
        .app_data_dir()
        .map_err(|error| format!("Failed to resolve app data directory: {error}"))
        .and_then(|dir| {
            fs::create_dir_all(&dir)
                .map_err(|error| format!("Failed to create {}: {error}", dir.display()))?;
            ensure_bridge_settings(&dir.join(BRIDGE_SETTINGS_FILE))
        });

    match loaded {
        Ok(settings) => settings,
        Err(error) => {
            warn!(%error, "using default bridge settings");
            BridgeSettings::default()
        }
    }
}

pub fn run() {
    init_tracing();

    tauri::Builder::default()
        .setup(|app| {
            let settings = load_bridge_settings(app.handle());
            let bridge = FlowBridge::new(settings);

            if let Ok(current_dir) = std::env::current_dir() {
                let status = bridge.binary_status(&current_dir);
                if status.has_issue {
                    warn!(
                        configured = status.configured_path.as_deref().unwrap_or("<unset>"),
                        "FLOWCTL_BIN is invalid and may break flowctl command execution"
                    );
                }
            }

            app.manage(bridge);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            workspace_commands::flow_workspace_open,
            workspace_commands::flow_workspace_pick_and_open,
            workspace_commands::flow_workspace_close,
            workspace_commands::flow_surface_register,
            flow_commands::flow_read,
            flow_commands::flow_write,
            flow_commands::flow_write_detached,
            flow_commands::flow_manual_retry,
            flow_commands::flow_breaker_status,
            flow_commands::flow_binary_status,
            flow_commands::flow_settings_get
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
