use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{MediaError, Result};

/// Minimal, async-capable filesystem abstraction used by the watcher, the
/// sweeper and the watchdog.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Check whether a path exists. Permission errors count as missing.
    async fn path_exists(&self, path: &Path) -> bool;

    /// Open a directory for iteration.
    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>>;

    /// Fetch lightweight file metadata.
    async fn metadata(&self, path: &Path) -> Result<FsMetadata>;

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64>;

    async fn remove_file(&self, path: &Path) -> Result<()>;
}

/// Lightweight metadata needed by scanners.
#[derive(Debug, Clone, Copy)]
pub struct FsMetadata {
    pub is_dir: bool,
    pub is_file: bool,
    pub len: u64,
    /// Last modified time if available
    pub modified: Option<SystemTime>,
}

impl FsMetadata {
    /// Modification time in epoch milliseconds, `0` when unknown.
    pub fn modified_ms(&self) -> i64 {
        self.modified.map(epoch_ms).unwrap_or(0)
    }
}

/// Milliseconds since the Unix epoch, `0` for earlier times.
pub fn epoch_ms(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|since| since.as_millis() as i64)
        .unwrap_or(0)
}

/// Async directory iterator (similar to tokio::fs::ReadDir).
#[async_trait]
pub trait ReadDirStream {
    /// Return next entry's path, or None when exhausted.
    async fn next_entry(&mut self) -> Result<Option<PathBuf>>;
}

/// Collect every regular file below `root`, breadth first.
///
/// Unreadable subdirectories are logged and skipped so one bad folder does
/// not hide the rest of the tree.
pub async fn walk_files(fs: &dyn FileSystem, root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut queue = VecDeque::from([root.to_path_buf()]);

    while let Some(dir) = queue.pop_front() {
        let mut entries = match fs.read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if dir == root => return Err(err),
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "Skipping unreadable directory");
                continue;
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            match fs.metadata(&entry).await {
                Ok(md) if md.is_dir => queue.push_back(entry),
                Ok(md) if md.is_file => files.push(entry),
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(path = %entry.display(), error = %err, "Entry vanished during walk");
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Real filesystem implementation backed by tokio::fs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for RealFs {
    async fn path_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>> {
        let rd = tokio::fs::read_dir(path).await?;
        Ok(Box::new(RealReadDir { inner: rd }))
    }

    async fn metadata(&self, path: &Path) -> Result<FsMetadata> {
        let md = tokio::fs::metadata(path).await?;
        Ok(FsMetadata {
            is_dir: md.is_dir(),
            is_file: md.is_file(),
            len: md.len(),
            modified: md.modified().ok(),
        })
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64> {
        Ok(tokio::fs::copy(from, to).await?)
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        Ok(tokio::fs::remove_file(path).await?)
    }
}

struct RealReadDir {
    inner: tokio::fs::ReadDir,
}

#[async_trait]
impl ReadDirStream for RealReadDir {
    async fn next_entry(&mut self) -> Result<Option<PathBuf>> {
        Ok(self.inner.next_entry().await?.map(|entry| entry.path()))
    }
}

/// In-memory filesystem for tests.
/// Note: Paths are treated literally; callers should use consistent absolute or relative paths.
#[derive(Debug, Default)]
pub struct InMemoryFs {
    nodes: RwLock<HashMap<PathBuf, Node>>,
}

#[derive(Debug, Clone)]
enum Node {
    Dir { children: Vec<PathBuf> },
    File { len: u64, modified: SystemTime },
}

fn missing(path: &Path) -> MediaError {
    MediaError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such path: {}", path.display()),
    ))
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir<P: Into<PathBuf>>(&self, path: P) {
        let path = path.into();
        let mut nodes = self.write();
        if nodes.contains_key(&path) {
            return;
        }
        ensure_parent_link(&mut nodes, &path);
        nodes.insert(
            path,
            Node::Dir {
                children: Vec::new(),
            },
        );
    }

    pub fn add_file<P: Into<PathBuf>>(&self, path: P, len: u64) {
        self.add_file_modified(path, len, UNIX_EPOCH);
    }

    pub fn add_file_modified<P: Into<PathBuf>>(&self, path: P, len: u64, modified: SystemTime) {
        let path = path.into();
        let mut nodes = self.write();
        ensure_parent_link(&mut nodes, &path);
        nodes.insert(path, Node::File { len, modified });
    }

    /// Drop a file or an empty directory. Returns false if nothing was there.
    pub fn remove(&self, path: &Path) -> bool {
        let mut nodes = self.write();
        if nodes.remove(path).is_none() {
            return false;
        }
        if let Some(parent) = path.parent()
            && let Some(Node::Dir { children }) = nodes.get_mut(parent)
        {
            children.retain(|child| child != path);
        }
        true
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, Node>> {
        self.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, Node>> {
        self.nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn ensure_parent_link(nodes: &mut HashMap<PathBuf, Node>, path: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    if parent.as_os_str().is_empty() {
        return;
    }
    if !nodes.contains_key(parent) {
        nodes.insert(
            parent.to_path_buf(),
            Node::Dir {
                children: Vec::new(),
            },
        );
        ensure_parent_link(nodes, parent);
    }
    if let Some(Node::Dir { children }) = nodes.get_mut(parent)
        && !children.iter().any(|p| p.as_path() == path)
    {
        children.push(path.to_path_buf());
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn path_exists(&self, path: &Path) -> bool {
        self.read().contains_key(path)
    }

    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>> {
        match self.read().get(path) {
            Some(Node::Dir { children }) => Ok(Box::new(InMemReadDir {
                queue: children.clone().into(),
            })),
            Some(Node::File { .. }) => Err(MediaError::Io(io::Error::other(format!(
                "read_dir on file: {}",
                path.display()
            )))),
            None => Err(missing(path)),
        }
    }

    async fn metadata(&self, path: &Path) -> Result<FsMetadata> {
        match self.read().get(path) {
            Some(Node::Dir { .. }) => Ok(FsMetadata {
                is_dir: true,
                is_file: false,
                len: 0,
                modified: None,
            }),
            Some(Node::File { len, modified }) => Ok(FsMetadata {
                is_dir: false,
                is_file: true,
                len: *len,
                modified: Some(*modified),
            }),
            None => Err(missing(path)),
        }
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64> {
        let len = match self.read().get(from) {
            Some(Node::File { len, .. }) => *len,
            _ => return Err(missing(from)),
        };
        self.add_file_modified(to, len, SystemTime::now());
        Ok(len)
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        if self.remove(path) {
            Ok(())
        } else {
            Err(missing(path))
        }
    }
}

struct InMemReadDir {
    queue: VecDeque<PathBuf>,
}

#[async_trait]
impl ReadDirStream for InMemReadDir {
    async fn next_entry(&mut self) -> Result<Option<PathBuf>> {
        Ok(self.queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn walk_lists_nested_files_only() {
        let fs = InMemoryFs::new();
        fs.add_file("/media/a.mov", 10);
        fs.add_file("/media/show/ep01.mov", 20);
        fs.add_dir("/media/empty");

        let files = walk_files(&fs, Path::new("/media")).await.unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("/media/a.mov"),
                PathBuf::from("/media/show/ep01.mov")
            ]
        );
    }

    #[tokio::test]
    async fn walk_of_missing_root_fails() {
        let fs = InMemoryFs::new();
        assert!(walk_files(&fs, Path::new("/nowhere")).await.is_err());
    }

    #[tokio::test]
    async fn copy_and_remove_update_listing() {
        let fs = InMemoryFs::new();
        fs.add_file("/media/watchdog.mov", 5);
        fs.copy_file(Path::new("/media/watchdog.mov"), Path::new("/media/copy.mov"))
            .await
            .unwrap();
        assert!(fs.path_exists(Path::new("/media/copy.mov")).await);

        fs.remove_file(Path::new("/media/copy.mov")).await.unwrap();
        assert!(!fs.path_exists(Path::new("/media/copy.mov")).await);
        assert_eq!(
            walk_files(&fs, Path::new("/media")).await.unwrap(),
            vec![PathBuf::from("/media/watchdog.mov")]
        );
    }

    #[tokio::test]
    async fn real_fs_reports_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mov");
        tokio::fs::write(&file, b"abc").await.unwrap();

        let md = RealFs.metadata(&file).await.unwrap();
        assert!(md.is_file);
        assert_eq!(md.len, 3);
        assert!(md.modified_ms() > 0);
    }
}
