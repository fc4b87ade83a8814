mod flow_commands;
mod startup_commands;
mod webview_surface;
mod workspace_commands;

pub use startup_commands::run;
