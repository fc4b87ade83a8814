use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::backend::common::constants::{
    FLOWCTL_BINARY_NAME, FLOWCTL_BIN_ENV, WORKSPACE_BINARY_OVERRIDE,
};
use crate::workspace::workspace_root_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BinarySource {
    Env,
    Workspace,
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryResolution {
    pub path: PathBuf,
    pub source: BinarySource,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configured_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configured_path_valid: Option<bool>,
    pub has_issue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    pub effective_binary_path: String,
    pub effective_binary_source: BinarySource,
    pub cached: bool,
}

/// Locates flowctl per workspace and memoizes the answer until invalidated.
#[derive(Debug)]
pub struct BinaryResolver {
    binary_name: String,
    cache: Mutex<HashMap<String, BinaryResolution>>,
}

impl Default for BinaryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryResolver {
    pub fn new() -> Self {
        Self::with_binary_name(FLOWCTL_BINARY_NAME)
    }

    /// Uses `binary_name` as the PATH fallback instead of `flowctl`.
    pub fn with_binary_name(binary_name: impl Into<String>) -> Self {
        Self {
            binary_name: binary_name.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, workspace_root: &Path) -> BinaryResolution {
        let key = workspace_root_key(workspace_root);
        if let Some(cached) = self.entries().get(&key) {
            return cached.clone();
        }

        let resolution = self.resolve_uncached(workspace_root);
        debug!(
            workspace = %key,
            binary = %resolution.path.display(),
            source = ?resolution.source,
            "resolved flowctl binary"
        );
        self.entries().insert(key, resolution.clone());
        resolution
    }

    pub fn invalidate(&self, workspace_root: &Path) {
        let key = workspace_root_key(workspace_root);
        if self.entries().remove(&key).is_some() {
            debug!(workspace = %key, "dropped cached flowctl resolution");
        }
    }

    pub fn cached(&self, workspace_root: &Path) -> Option<BinaryResolution> {
        self.entries().get(&workspace_root_key(workspace_root)).cloned()
    }

    pub fn status(&self, workspace_root: &Path) -> BinaryStatus {
        let configured_path = configured_flowctl_bin_path();
        let configured_path_valid = configured_path
            .as_ref()
            .map(|path| is_attempt_ready_executable(Path::new(path)));
        let has_issue = matches!(configured_path_valid, Some(false));
        let issue = has_issue.then(|| {
            format!(
                "{FLOWCTL_BIN_ENV} is set but does not point to an executable file. Unset it to use the workspace or PATH binary."
            )
        });

        let cached = self.cached(workspace_root);
        let effective = cached
            .clone()
            .unwrap_or_else(|| self.resolve_uncached(workspace_root));

        BinaryStatus {
            configured_path,
            configured_path_valid,
            has_issue,
            issue,
            effective_binary_path: effective.path.display().to_string(),
            effective_binary_source: effective.source,
            cached: cached.is_some(),
        }
    }

    fn resolve_uncached(&self, workspace_root: &Path) -> BinaryResolution {
        if let Some(from_env) = configured_flowctl_bin_path() {
            return BinaryResolution {
                path: PathBuf::from(from_env),
                source: BinarySource::Env,
            };
        }

        let local = workspace_binary_override(workspace_root);
        if local.is_file() {
            return BinaryResolution {
                path: local,
                source: BinarySource::Workspace,
            };
        }

        // Bare name: the OS searches PATH at spawn time.
        BinaryResolution {
            path: PathBuf::from(&self.binary_name),
            source: BinarySource::Path,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, BinaryResolution>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub(crate) fn workspace_binary_override(workspace_root: &Path) -> PathBuf {
    WORKSPACE_BINARY_OVERRIDE
        .iter()
        .fold(workspace_root.to_path_buf(), |path, part| path.join(part))
}

fn configured_flowctl_bin_path() -> Option<String> {
    std::env::var(FLOWCTL_BIN_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn is_attempt_ready_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::metadata(path)
            .map(|metadata| metadata.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        fs::metadata(path).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install_override(workspace_root: &Path) -> PathBuf {
        let binary = workspace_binary_override(workspace_root);
        fs::create_dir_all(binary.parent().unwrap()).unwrap();
        fs::write(&binary, "#!/bin/sh\necho '{}'\n").unwrap();
        binary
    }

    #[test]
    fn falls_back_to_bare_name_without_override() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BinaryResolver::with_binary_name("flowctl-test-missing");
        let resolution = resolver.resolve(dir.path());
        assert_eq!(resolution.source, BinarySource::Path);
        assert_eq!(resolution.path, PathBuf::from("flowctl-test-missing"));
    }

    #[test]
    fn prefers_workspace_override() {
        let dir = tempfile::tempdir().unwrap();
        let binary = install_override(dir.path());
        let resolver = BinaryResolver::new();
        let resolution = resolver.resolve(dir.path());
        assert_eq!(resolution.source, BinarySource::Workspace);
        assert_eq!(resolution.path, binary);
    }

    #[test]
    fn memoizes_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BinaryResolver::with_binary_name("flowctl-test-missing");
        assert_eq!(resolver.resolve(dir.path()).source, BinarySource::Path);

        install_override(dir.path());
        assert_eq!(resolver.resolve(dir.path()).source, BinarySource::Path);

        resolver.invalidate(dir.path());
        assert!(resolver.cached(dir.path()).is_none());
        assert_eq!(resolver.resolve(dir.path()).source, BinarySource::Workspace);
    }

    #[test]
    fn status_reports_uncached_effective_binary() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BinaryResolver::with_binary_name("flowctl-test-missing");
        let status = resolver.status(dir.path());
        assert!(!status.cached);
        assert_eq!(status.effective_binary_source, BinarySource::Path);
        assert!(resolver.cached(dir.path()).is_none());
    }
}
