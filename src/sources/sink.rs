//! Export sink implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::{ExportSink, SinkError};

/// Writes export artifacts as files into a directory.
#[derive(Debug, Clone)]
pub struct FileExportSink {
    directory: PathBuf,
}

impl FileExportSink {
    /// Creates a sink writing into `directory`, created on first write.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// The directory artifacts are written to.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl ExportSink for FileExportSink {
    async fn write(&self, file_name: &str, bytes: &[u8]) -> Result<(), SinkError> {
        if file_name.is_empty() || file_name.contains(['/', '\\']) || file_name.starts_with('.') {
            return Err(SinkError {
                message: format!("refusing to write unsafe file name '{}'", file_name),
            });
        }

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| SinkError {
                message: format!("cannot create {}: {}", self.directory.display(), e),
            })?;

        let path = self.directory.join(file_name);
        tokio::fs::write(&path, bytes).await.map_err(|e| SinkError {
            message: format!("cannot write {}: {}", path.display(), e),
        })?;

        info!(path = %path.display(), bytes = bytes.len(), "Wrote export artifact");
        Ok(())
    }
}

/// Keeps export artifacts in memory.
#[derive(Debug, Default)]
pub struct MemoryExportSink {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryExportSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bytes written under `file_name`.
    pub async fn get(&self, file_name: &str) -> Option<Vec<u8>> {
        self.files.lock().await.get(file_name).cloned()
    }
}

#[async_trait]
impl ExportSink for MemoryExportSink {
    async fn write(&self, file_name: &str, bytes: &[u8]) -> Result<(), SinkError> {
        self.files
            .lock()
            .await
            .insert(file_name.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_sink_writes_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileExportSink::new(dir.path().join("exports"));
        sink.write("payroll.csv", b"a,b\n").await.unwrap();
        let written = std::fs::read(dir.path().join("exports").join("payroll.csv")).unwrap();
        assert_eq!(written, b"a,b\n");
    }

    #[tokio::test]
    async fn test_file_sink_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileExportSink::new(dir.path());
        assert!(sink.write("../escape.csv", b"x").await.is_err());
        assert!(sink.write(".hidden", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_sink_round_trip() {
        let sink = MemoryExportSink::new();
        assert!(sink.get("out.json").await.is_none());
        sink.write("out.json", b"{}").await.unwrap();
        assert_eq!(sink.get("out.json").await.unwrap(), b"{}");
    }
}
