//! Remote filesystem transport - the interface the scan pipeline consumes
//!
//! The coordinator only needs two operations: an extension-filtered
//! recursive walk yielding file metadata, and a text read. Connection
//! setup and teardown belong to the concrete transport (constructor and
//! `Drop`), so an SFTP-backed session plugs in behind the same trait.

use std::path::Path;

use walkdir::WalkDir;

use crate::Result;

/// Metadata for one remote file, as reported by the transport
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
    pub atime: i64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

/// A connected remote filesystem session
pub trait RemoteFs {
    /// Recursively list files under `root` whose extension (with leading
    /// dot, case-insensitive) is in `extensions`. Hidden entries are
    /// skipped and unreadable subdirectories are silently ignored.
    fn walk(
        &mut self,
        root: &str,
        extensions: &[String],
        max_depth: Option<usize>,
    ) -> Result<Vec<FileMeta>>;

    /// Read a file as text. Invalid UTF-8 sequences are replaced with the
    /// standard replacement character, never an error.
    fn read(&mut self, path: &str) -> Result<String>;
}

/// Local filesystem transport
#[derive(Debug, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

impl RemoteFs for LocalFs {
    fn walk(
        &mut self,
        root: &str,
        extensions: &[String],
        max_depth: Option<usize>,
    ) -> Result<Vec<FileMeta>> {
        let extensions: Vec<String> = extensions.iter().map(|e| e.to_lowercase()).collect();

        let mut walker = WalkDir::new(root);
        if let Some(depth) = max_depth {
            walker = walker.max_depth(depth);
        }

        let mut results = Vec::new();
        let entries = walker
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
            .filter_map(|e| e.ok());

        for entry in entries {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = match entry.path().extension().and_then(|s| s.to_str()) {
                Some(ext) => format!(".{}", ext.to_lowercase()),
                None => continue,
            };
            if !extensions.contains(&ext) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            results.push(file_meta(
                entry.path().to_string_lossy().into_owned(),
                &metadata,
            ));
        }

        Ok(results)
    }

    fn read(&mut self, path: &str) -> Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(unix)]
fn file_meta(path: String, metadata: &std::fs::Metadata) -> FileMeta {
    use std::os::unix::fs::MetadataExt;
    FileMeta {
        path,
        size: metadata.len(),
        mtime: metadata.mtime(),
        atime: metadata.atime(),
        uid: metadata.uid(),
        gid: metadata.gid(),
        mode: metadata.mode(),
    }
}

#[cfg(not(unix))]
fn file_meta(path: String, metadata: &std::fs::Metadata) -> FileMeta {
    use std::time::UNIX_EPOCH;
    let secs = |t: std::io::Result<std::time::SystemTime>| {
        t.ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    };
    FileMeta {
        path,
        size: metadata.len(),
        mtime: secs(metadata.modified()),
        atime: secs(metadata.accessed()),
        uid: 0,
        gid: 0,
        mode: 0,
    }
}
