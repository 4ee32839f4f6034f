//! Read-only corpus listings backed by a directory tree.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::types::RagError;

/// One document visible in the corpus right now.
#[derive(Debug, Clone)]
pub struct CorpusDocument {
    /// Stable identifier: the `/`-separated path relative to the corpus root.
    pub id: String,
    /// Absolute location on disk.
    pub path: PathBuf,
}

/// Directory-backed corpus source.
///
/// The corpus is read-only to this subsystem; listing and reading are the
/// only operations. Document ids are relative paths normalized to `/`
/// separators so the same corpus produces the same ids on every platform.
#[derive(Debug, Clone)]
pub struct DirectoryCorpus {
    root: PathBuf,
}

impl DirectoryCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists every regular file under the root, sorted by id.
    ///
    /// Sorting keeps run output reproducible; processing order itself
    /// carries no guarantees.
    pub async fn list(&self) -> Result<Vec<CorpusDocument>, RagError> {
        let mut pending = vec![self.root.clone()];
        let mut documents = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let Some(id) = relative_id(&self.root, &path) else {
                        continue;
                    };
                    documents.push(CorpusDocument { id, path });
                }
            }
        }

        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    /// Reads the raw bytes behind a listed document.
    pub async fn read(&self, document: &CorpusDocument) -> Result<Vec<u8>, RagError> {
        Ok(fs::read(&document.path).await?)
    }
}

fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_str()?.to_string());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
