use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;

use concierge_core::config::ToolsConfig;

use crate::planner::FILE_MANAGER;
use crate::tools::{Capability, CapabilityResult, ToolArguments};

pub const MAX_READ_BYTES: usize = 50_000;

/// Reads and writes files, but only below one of the allowed directories.
pub struct FileManager {
    enabled: bool,
    allowed_dirs: Vec<PathBuf>,
    io_timeout: Duration,
}

impl FileManager {
    pub fn new(enabled: bool, allowed_dirs: Vec<PathBuf>, io_timeout: Duration) -> Self {
        // Symlinked roots (e.g. /tmp on some systems) are compared by their real path.
        let allowed_dirs = allowed_dirs
            .into_iter()
            .map(|dir| std::fs::canonicalize(&dir).unwrap_or_else(|_| normalize(&dir)))
            .collect();
        Self { enabled, allowed_dirs, io_timeout }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(
            config.file_manager_enabled,
            config.file_allowed_dirs.clone(),
            Duration::from_secs(config.file_io_timeout_secs),
        )
    }

    pub fn allowed_dirs(&self) -> &[PathBuf] {
        &self.allowed_dirs
    }

    /// Resolves `path` against the filesystem and returns it only if it
    /// lands inside an allowed directory.
    pub async fn sandboxed(&self, path: &Path) -> Option<PathBuf> {
        let resolved = resolve(path).await?;
        self.allowed_dirs.iter().any(|dir| resolved.starts_with(dir)).then_some(resolved)
    }

    fn access_denied(&self) -> CapabilityResult {
        let allowed = self
            .allowed_dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        CapabilityResult::failure(format!("access denied; allowed directories: {allowed}"))
    }

    async fn with_timeout<T>(
        &self,
        operation: impl Future<Output = io::Result<T>>,
    ) -> io::Result<T> {
        tokio::time::timeout(self.io_timeout, operation).await.unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("file operation timed out after {}s", self.io_timeout.as_secs()),
            ))
        })
    }

    async fn read(&self, path: &Path) -> CapabilityResult {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return CapabilityResult::failure(format!("file not found: {}", path.display()));
            }
            Err(error) => return CapabilityResult::failure(error.to_string()),
        };
        if !metadata.is_file() {
            return CapabilityResult::failure(format!("not a file: {}", path.display()));
        }

        let read = self.with_timeout(async {
            let file = fs::File::open(path).await?;
            let mut buffer = Vec::with_capacity(MAX_READ_BYTES.min(metadata.len() as usize) + 1);
            file.take(MAX_READ_BYTES as u64 + 1).read_to_end(&mut buffer).await?;
            Ok(buffer)
        });
        let mut bytes = match read.await {
            Ok(bytes) => bytes,
            Err(error) => return CapabilityResult::failure(error.to_string()),
        };

        let truncated = bytes.len() > MAX_READ_BYTES;
        bytes.truncate(MAX_READ_BYTES);
        let byte_count = bytes.len();

        let text = match decode(bytes, truncated) {
            Some(text) if truncated => {
                format!("{text}\n\n[Truncated at {MAX_READ_BYTES} bytes]")
            }
            Some(text) => text,
            None => format!("[Binary file: {byte_count} bytes]"),
        };

        CapabilityResult::success(text)
            .with_extra("bytes", json!(byte_count))
            .with_extra("truncated", json!(truncated))
    }

    async fn write(&self, path: &Path, content: &str) -> CapabilityResult {
        let written = self.with_timeout(async {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(path, content.as_bytes()).await
        });

        match written.await {
            Ok(()) => CapabilityResult::success(format!(
                "Written {} characters to {}",
                content.chars().count(),
                path.display()
            )),
            Err(error) => CapabilityResult::failure(error.to_string()),
        }
    }
}

/// UTF-8 text, or `None` for binary content. A multi-byte character cut in
/// half by truncation is dropped rather than treated as binary.
fn decode(bytes: Vec<u8>, truncated: bool) -> Option<String> {
    match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(error) if truncated && error.utf8_error().error_len().is_none() => {
            let valid_up_to = error.utf8_error().valid_up_to();
            let mut bytes = error.into_bytes();
            bytes.truncate(valid_up_to);
            String::from_utf8(bytes).ok()
        }
        Err(_) => None,
    }
}

/// Canonical form of `path`. For paths that do not exist yet the nearest
/// existing ancestor is canonicalized and the rest appended; `..` in that
/// remainder is refused.
async fn resolve(path: &Path) -> Option<PathBuf> {
    if let Ok(canonical) = fs::canonicalize(path).await {
        return Some(canonical);
    }

    let mut existing = path.to_path_buf();
    let mut remainder = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(&existing).await {
            let mut resolved = canonical;
            for component in remainder.iter().rev() {
                resolved.push(component);
            }
            return Some(resolved);
        }

        let name = existing.file_name()?.to_os_string();
        if name == ".." {
            return None;
        }
        remainder.push(name);
        if !existing.pop() {
            return None;
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[async_trait]
impl Capability for FileManager {
    fn name(&self) -> &str {
        FILE_MANAGER
    }

    fn description(&self) -> &str {
        "Read or write a file within the allowed directories."
    }

    fn is_available(&self) -> bool {
        self.enabled && !self.allowed_dirs.is_empty()
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<CapabilityResult> {
        let argument = |key: &str| arguments.get(key).and_then(|value| value.as_str());

        let path = argument("path").map(str::trim).unwrap_or_default();
        if path.is_empty() {
            return Ok(CapabilityResult::failure("no file path provided"));
        }
        let action = argument("action").unwrap_or("read");

        let Some(target) = self.sandboxed(Path::new(path)).await else {
            debug!(
                event_name = "capability.file_manager.denied",
                action,
                "path outside allowed directories"
            );
            return Ok(self.access_denied());
        };

        Ok(match action {
            "read" => self.read(&target).await,
            "write" => self.write(&target, argument("content").unwrap_or_default()).await,
            other => CapabilityResult::failure(format!("unknown action: {other}")),
        })
    }
}
