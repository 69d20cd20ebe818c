//! File persistence for the pending message queue.
//!
//! The queue is stored as a single JSON document mapping
//! `username -> [message objects]`. All writes are atomic:
//! serialize → write tmp → fsync → rename. If any step fails, the
//! original file is untouched.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::Path;

use jimchat_protocol::ChatMessage;
use jimchat_types::{JimError, Result};

/// The queue map as it lives in memory and on disk.
pub(crate) type QueueMap = HashMap<String, VecDeque<ChatMessage>>;

/// Loads the queue map from `path`.
///
/// A missing or empty file yields an empty map; a file that exists but
/// does not parse is an error.
pub(crate) fn load(path: &Path) -> Result<QueueMap> {
    if !path.exists() {
        return Ok(QueueMap::new());
    }

    let raw = fs::read(path).map_err(|e| JimError::StorageError {
        reason: format!("failed to read queue file: {e}"),
    })?;

    if raw.is_empty() {
        return Ok(QueueMap::new());
    }

    serde_json::from_slice(&raw).map_err(|e| JimError::StorageError {
        reason: format!("failed to parse queue file: {e}"),
    })
}

/// Saves the queue map to `path` atomically.
pub(crate) fn save(path: &Path, entries: &QueueMap) -> Result<()> {
    let raw = serde_json::to_vec_pretty(entries).map_err(|e| JimError::StorageError {
        reason: format!("failed to serialize queue: {e}"),
    })?;

    let tmp_path = tmp_path(path)?;

    {
        let mut file = fs::File::create(&tmp_path).map_err(|e| JimError::StorageError {
            reason: format!("failed to create temp queue file: {e}"),
        })?;

        file.write_all(&raw).map_err(|e| JimError::StorageError {
            reason: format!("failed to write temp queue file: {e}"),
        })?;

        file.sync_all().map_err(|e| JimError::StorageError {
            reason: format!("failed to fsync temp queue file: {e}"),
        })?;
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        JimError::StorageError {
            reason: format!("failed to rename temp queue file: {e}"),
        }
    })?;

    Ok(())
}

/// Generates a temporary file path in the same directory as `path`,
/// creating the directory if needed.
fn tmp_path(path: &Path) -> Result<std::path::PathBuf> {
    let parent = path.parent().ok_or_else(|| JimError::StorageError {
        reason: "queue file path has no parent directory".into(),
    })?;

    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| JimError::StorageError {
            reason: format!("failed to create queue file directory: {e}"),
        })?;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("pending.json");

    Ok(parent.join(format!(".{}.tmp", file_name)))
}
