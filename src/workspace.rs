use std::path::{Component, Path, PathBuf};

use crate::backend::common::constants::FLOW_DIR_NAME;

pub(crate) fn validate_workspace_root_path(workspace_root: &str) -> Result<PathBuf, String> {
    let root = PathBuf::from(workspace_root.trim());
    if !root.is_absolute() {
        return Err("workspaceRoot must be an absolute path.".to_string());
    }

    if !root.is_dir() {
        return Err(format!(
            "workspaceRoot \"{}\" is not an existing, accessible directory.",
            root.display()
        ));
    }

    Ok(root)
}

/// Stable map key for a workspace root; falls back to the raw path when the
/// root cannot be canonicalized (e.g. it was deleted).
pub(crate) fn workspace_root_key(workspace_root: &Path) -> String {
    workspace_root
        .canonicalize()
        .unwrap_or_else(|_| workspace_root.to_path_buf())
        .display()
        .to_string()
}

pub(crate) fn flow_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join(FLOW_DIR_NAME)
}

/// Renders `path` relative to `base` with forward slashes. Returns `None` for
/// `base` itself and for paths outside of it.
pub(crate) fn relative_change_key(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(value) => parts.push(value.to_string_lossy().to_string()),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if parts.is_empty() {
        return None;
    }

    Some(parts.join("/"))
}

#[cfg(feature = "desktop")]
pub(crate) fn validate_flowctl_args(args: &[String]) -> Result<Vec<String>, String> {
    if args.is_empty() {
        return Err("args must include at least one flowctl subcommand.".to_string());
    }
    if args.len() > 64 {
        return Err("args is too large (max 64 entries).".to_string());
    }

    for arg in args {
        if arg.contains('\0') {
            return Err("args entries must not contain NUL bytes.".to_string());
        }
    }

    Ok(args.to_vec())
}

#[cfg(feature = "desktop")]
pub(crate) fn normalize_category(value: &str) -> Result<String, String> {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        return Err("category must be a non-empty string.".to_string());
    }
    if !normalized
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err("category contains unsupported characters.".to_string());
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_workspace_root() {
        assert!(validate_workspace_root_path("projects/demo").is_err());
    }

    #[test]
    fn renders_nested_change_keys_with_forward_slashes() {
        let base = Path::new("/work/demo/.flow");
        assert_eq!(
            relative_change_key(base, &base.join("tasks").join("fn-1.2.json")),
            Some("tasks/fn-1.2.json".to_string())
        );
        assert_eq!(relative_change_key(base, base), None);
        assert_eq!(relative_change_key(base, Path::new("/work/demo/README.md")), None);
    }

    #[cfg(feature = "desktop")]
    #[test]
    fn rejects_empty_or_nul_args() {
        assert!(validate_flowctl_args(&[]).is_err());
        assert!(validate_flowctl_args(&["show\0".to_string()]).is_err());
        assert_eq!(
            validate_flowctl_args(&["epics".to_string()]),
            Ok(vec!["epics".to_string()])
        );
    }

    #[cfg(feature = "desktop")]
    #[test]
    fn normalizes_category_case_and_spacing() {
        assert_eq!(normalize_category("  Task "), Ok("task".to_string()));
        assert!(normalize_category("a b").is_err());
    }
}
