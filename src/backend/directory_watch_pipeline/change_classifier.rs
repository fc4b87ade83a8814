use serde::Serialize;

use crate::backend::common::constants::{
    BINARY_STORAGE_DIR, EPIC_STORAGE_DIRS, RECOGNIZED_ID_SUFFIXES, TASK_STORAGE_DIR,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeCategory {
    Epic,
    Task,
    Config,
}

impl ChangeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::Task => "task",
            Self::Config => "config",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub category: ChangeCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ChangeEvent {
    pub fn config() -> Self {
        Self {
            category: ChangeCategory::Config,
            id: None,
        }
    }
}

/// Maps a path relative to `.flow/` to the change it represents, or `None`
/// when consumers should not hear about it.
pub fn classify(relative_path: &str) -> Option<ChangeEvent> {
    let normalized = relative_path.replace('\\', "/");
    let trimmed = normalized.trim_start_matches("./").trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    // Top-level entries, storage directories included, only signal a broad reload.
    let Some((first, rest)) = trimmed.split_once('/') else {
        if trimmed == BINARY_STORAGE_DIR {
            return None;
        }
        return Some(ChangeEvent::config());
    };

    if EPIC_STORAGE_DIRS.contains(&first) {
        return Some(ChangeEvent {
            category: ChangeCategory::Epic,
            id: identifier_from(rest),
        });
    }

    if first == TASK_STORAGE_DIR {
        return Some(ChangeEvent {
            category: ChangeCategory::Task,
            id: identifier_from(rest),
        });
    }

    if first == BINARY_STORAGE_DIR {
        return None;
    }

    Some(ChangeEvent::config())
}

/// Drops only a trailing recognized suffix: ids such as `fn-1.2` contain dots.
fn identifier_from(rest: &str) -> Option<String> {
    let file_name = rest.rsplit('/').find(|segment| !segment.is_empty())?;
    let id = RECOGNIZED_ID_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .unwrap_or(file_name);

    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}
