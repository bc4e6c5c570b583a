//! Sandboxed filesystem tool.
//!
//! Part of the core contract, not an illustrative tool body: its path-
//! validation invariants are load-bearing. Construction takes a base
//! directory (must already exist), a writes-permitted flag, and a maximum
//! file size for read/write.
//!
//! Validation runs, in this order, before every operation:
//! 1. reject any path containing a `..` segment,
//! 2. reject any path whose canonicalized form does not have the
//!    canonicalized base directory as a strict prefix,
//! 3. for read/write, reject files larger than the configured maximum.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::message::ToolValue;
use crate::tool::{ParamType, Tool, ToolParameter, ToolSchema};

const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub enum FileSystemError {
    PathTraversal(String),
    NotFound(String),
    IsDirectory(String),
    NotADirectory(String),
    FileTooLarge { path: String, size: u64, max: u64 },
    PermissionDenied(String),
    Io(String),
}

impl fmt::Display for FileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSystemError::PathTraversal(msg) => write!(f, "path escapes sandbox: {}", msg),
            FileSystemError::NotFound(msg) => write!(f, "not found: {}", msg),
            FileSystemError::IsDirectory(msg) => write!(f, "is a directory: {}", msg),
            FileSystemError::NotADirectory(msg) => write!(f, "not a directory: {}", msg),
            FileSystemError::FileTooLarge { path, size, max } => write!(
                f,
                "file too large: {} is {} bytes, max is {} bytes",
                path, size, max
            ),
            FileSystemError::PermissionDenied(msg) => write!(f, "permission denied: {}", msg),
            FileSystemError::Io(msg) => write!(f, "io error: {}", msg),
        }
    }
}

impl std::error::Error for FileSystemError {}

impl From<FileSystemError> for AgentError {
    fn from(err: FileSystemError) -> Self {
        match err {
            FileSystemError::PathTraversal(msg) => AgentError::InvalidArgument(msg),
            FileSystemError::NotFound(msg) => AgentError::NotFound(msg),
            FileSystemError::IsDirectory(msg) | FileSystemError::NotADirectory(msg) => {
                AgentError::InvalidArgument(msg)
            }
            FileSystemError::FileTooLarge { path, size, max } => AgentError::InvalidArgument(
                format!("{} is {} bytes, max is {} bytes", path, size, max),
            ),
            FileSystemError::PermissionDenied(msg) => AgentError::PermissionDenied(msg),
            FileSystemError::Io(msg) => AgentError::ProviderError {
                status: None,
                message: msg,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub is_directory: bool,
    pub modified: String,
}

#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
}

/// Filesystem tool whose every operation is confined to a base directory.
pub struct FileSystemTool {
    base: PathBuf,
    writes_enabled: bool,
    max_file_size: u64,
}

impl FileSystemTool {
    /// Construct a sandbox rooted at `base`. `base` must already exist as a
    /// directory; construction fails otherwise.
    pub fn new(base: impl Into<PathBuf>, writes_enabled: bool) -> Result<Self, FileSystemError> {
        let base = base.into();
        if !base.is_dir() {
            return Err(FileSystemError::NotFound(format!(
                "base directory does not exist: {}",
                base.display()
            )));
        }
        Ok(Self {
            base,
            writes_enabled,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        })
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Validation step 1 + 2: reject traversal segments, then resolve and
    /// require the canonicalized base as a strict prefix.
    fn resolve(&self, path: &str) -> Result<PathBuf, FileSystemError> {
        let requested = PathBuf::from(path);

        // Step 1: any `..` segment is rejected outright, before anything else.
        if requested.components().any(|c| c == Component::ParentDir) {
            return Err(FileSystemError::PathTraversal(path.to_string()));
        }

        let mut joined = self.base.clone();
        for component in requested.components() {
            match component {
                Component::Normal(c) => joined.push(c),
                Component::RootDir | Component::Prefix(_) => {
                    // An embedded absolute path joined with `.push` would
                    // replace `joined` outright; reject rather than allow it
                    // to escape the base.
                    return Err(FileSystemError::PathTraversal(path.to_string()));
                }
                Component::CurDir | Component::ParentDir => {}
            }
        }

        let base_canonical = self
            .base
            .canonicalize()
            .map_err(|e| FileSystemError::Io(e.to_string()))?;

        // Step 2: canonicalize (resolving symlinks) and require strict
        // prefix. For a not-yet-existing path (e.g. a write target),
        // canonicalize the nearest existing ancestor and reattach the
        // remaining suffix, so a symlinked parent directory can't be used
        // to escape the sandbox before the file itself is created.
        let canonical = if joined.exists() {
            joined
                .canonicalize()
                .map_err(|e| FileSystemError::Io(e.to_string()))?
        } else {
            let mut ancestor = joined.as_path();
            let mut suffix = PathBuf::new();
            loop {
                if ancestor.exists() {
                    break;
                }
                if let Some(name) = ancestor.file_name() {
                    suffix = Path::new(name).join(suffix);
                }
                ancestor = ancestor.parent().ok_or_else(|| {
                    FileSystemError::PathTraversal(path.to_string())
                })?;
            }
            let canonical_ancestor = ancestor
                .canonicalize()
                .map_err(|e| FileSystemError::Io(e.to_string()))?;
            canonical_ancestor.join(suffix)
        };

        if !canonical.starts_with(&base_canonical) {
            return Err(FileSystemError::PathTraversal(path.to_string()));
        }

        Ok(canonical)
    }

    fn require_writes(&self) -> Result<(), FileSystemError> {
        if !self.writes_enabled {
            return Err(FileSystemError::PermissionDenied(
                "writes are disabled on this filesystem tool".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn read(&self, path: &str) -> Result<String, FileSystemError> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(FileSystemError::NotFound(path.to_string()));
        }
        if resolved.is_dir() {
            return Err(FileSystemError::IsDirectory(path.to_string()));
        }
        let meta = fs::metadata(&resolved)
            .await
            .map_err(|e| FileSystemError::Io(e.to_string()))?;
        if meta.len() > self.max_file_size {
            return Err(FileSystemError::FileTooLarge {
                path: path.to_string(),
                size: meta.len(),
                max: self.max_file_size,
            });
        }
        fs::read_to_string(&resolved)
            .await
            .map_err(|e| FileSystemError::Io(e.to_string()))
    }

    pub async fn write(&self, path: &str, content: &str) -> Result<(), FileSystemError> {
        self.require_writes()?;
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(FileSystemError::IsDirectory(path.to_string()));
        }
        if content.len() as u64 > self.max_file_size {
            return Err(FileSystemError::FileTooLarge {
                path: path.to_string(),
                size: content.len() as u64,
                max: self.max_file_size,
            });
        }
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FileSystemError::Io(e.to_string()))?;
            if let Ok(base_canonical) = self.base.canonicalize() {
                set_owner_traverse_ancestors(&resolved, &base_canonical).await;
            }
        }
        fs::write(&resolved, content)
            .await
            .map_err(|e| FileSystemError::Io(e.to_string()))?;
        set_owner_rw(&resolved).await;
        Ok(())
    }

    pub async fn append(&self, path: &str, content: &str) -> Result<(), FileSystemError> {
        self.require_writes()?;
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(FileSystemError::IsDirectory(path.to_string()));
        }
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FileSystemError::Io(e.to_string()))?;
            if let Ok(base_canonical) = self.base.canonicalize() {
                set_owner_traverse_ancestors(&resolved, &base_canonical).await;
            }
        }
        let existing = fs::metadata(&resolved).await.map(|m| m.len()).unwrap_or(0);
        if existing + content.len() as u64 > self.max_file_size {
            return Err(FileSystemError::FileTooLarge {
                path: path.to_string(),
                size: existing + content.len() as u64,
                max: self.max_file_size,
            });
        }
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&resolved)
            .await
            .map_err(|e| FileSystemError::Io(e.to_string()))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| FileSystemError::Io(e.to_string()))?;
        set_owner_rw(&resolved).await;
        Ok(())
    }

    pub async fn list(&self, path: &str) -> Result<Vec<DirectoryEntry>, FileSystemError> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(FileSystemError::NotFound(path.to_string()));
        }
        if !resolved.is_dir() {
            return Err(FileSystemError::NotADirectory(path.to_string()));
        }
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&resolved)
            .await
            .map_err(|e| FileSystemError::Io(e.to_string()))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| FileSystemError::Io(e.to_string()))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| FileSystemError::Io(e.to_string()))?;
            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_directory: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        Ok(entries)
    }

    pub async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(resolved) => resolved.exists(),
            Err(_) => false,
        }
    }

    pub async fn delete(&self, path: &str) -> Result<(), FileSystemError> {
        self.require_writes()?;
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(FileSystemError::NotFound(path.to_string()));
        }
        if resolved.is_dir() {
            return Err(FileSystemError::IsDirectory(path.to_string()));
        }
        fs::remove_file(&resolved)
            .await
            .map_err(|e| FileSystemError::Io(e.to_string()))
    }

    pub async fn info(&self, path: &str) -> Result<FileMetadata, FileSystemError> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(FileSystemError::NotFound(path.to_string()));
        }
        let meta = fs::metadata(&resolved)
            .await
            .map_err(|e| FileSystemError::Io(e.to_string()))?;
        let modified = meta
            .modified()
            .ok()
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(FileMetadata {
            name: resolved
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: path.to_string(),
            size: meta.len(),
            is_directory: meta.is_dir(),
            modified,
        })
    }
}

#[cfg(unix)]
async fn set_owner_rw(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await;
}

#[cfg(not(unix))]
async fn set_owner_rw(_path: &Path) {}

/// Chmod every ancestor of `leaf` (exclusive) up to and including `stop_at`
/// to owner-traverse (0700). Used after `create_dir_all` implicitly makes
/// directories to satisfy a write/append path.
#[cfg(unix)]
async fn set_owner_traverse_ancestors(leaf: &Path, stop_at: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut dir = leaf;
    while let Some(parent) = dir.parent() {
        let _ = fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)).await;
        if parent == stop_at {
            break;
        }
        dir = parent;
    }
}

#[cfg(not(unix))]
async fn set_owner_traverse_ancestors(_leaf: &Path, _stop_at: &Path) {}

#[async_trait]
impl Tool for FileSystemTool {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "read, write, append, list, check existence of, delete, and inspect files under a sandboxed base directory"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(self.name(), self.description())
            .with_parameter(
                ToolParameter::new("operation", ParamType::String, "one of read/write/append/list/exists/delete/info")
                    .required(),
            )
            .with_parameter(ToolParameter::new("path", ParamType::String, "path relative to the sandbox base").required())
            .with_parameter(ToolParameter::new("content", ParamType::String, "content for write/append"))
    }

    async fn execute(
        &self,
        args: HashMap<String, ToolValue>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, AgentError> {
        if cancellation.is_some_and(|t| t.is_cancelled()) {
            return Err(AgentError::Cancelled);
        }
        let operation = args
            .get("operation")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::ValidationError("missing `operation`".to_string()))?;
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::ValidationError("missing `path`".to_string()))?;

        match operation {
            "read" => self.read(path).await.map_err(AgentError::from),
            "write" => {
                let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");
                self.write(path, content).await.map_err(AgentError::from)?;
                Ok("ok".to_string())
            }
            "append" => {
                let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");
                self.append(path, content).await.map_err(AgentError::from)?;
                Ok("ok".to_string())
            }
            "list" => {
                let entries = self.list(path).await.map_err(AgentError::from)?;
                Ok(serde_json::to_string(
                    &entries
                        .into_iter()
                        .map(|e| serde_json::json!({"name": e.name, "is_directory": e.is_directory, "size": e.size}))
                        .collect::<Vec<_>>(),
                )
                .unwrap_or_default())
            }
            "exists" => Ok(self.exists(path).await.to_string()),
            "delete" => {
                self.delete(path).await.map_err(AgentError::from)?;
                Ok("ok".to_string())
            }
            "info" => {
                let meta = self.info(path).await.map_err(AgentError::from)?;
                Ok(serde_json::json!({
                    "name": meta.name,
                    "path": meta.path,
                    "size": meta.size,
                    "is_directory": meta.is_directory,
                    "modified": meta.modified,
                })
                .to_string())
            }
            other => Err(AgentError::InvalidArgument(format!(
                "unknown filesystem operation `{}`",
                other
            ))),
        }
    }
}
