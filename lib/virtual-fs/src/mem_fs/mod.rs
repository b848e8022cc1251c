//! In-memory backend.
//!
//! Used for the `flash0:`/`ms0:` fixtures in tests and as the writable layer
//! in front of read-only images.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    FileMode, FileOpenFlags, Vfs, VfsEntry, VfsError, VfsErrorKind, VfsResult, VfsStat,
};

/// Largest file a memory backend will grow to (the FAT32 limit).
pub const MAX_FILE_SIZE: u64 = u32::MAX as u64;

#[derive(Debug, Clone)]
enum NodeKind {
    File(Vec<u8>),
    Directory,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    created: SystemTime,
    accessed: SystemTime,
    modified: SystemTime,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        let now = SystemTime::now();
        Self {
            kind,
            created: now,
            accessed: now,
            modified: now,
        }
    }

    fn stat(&self, path: &str) -> VfsStat {
        let (size, is_directory) = match &self.kind {
            NodeKind::File(data) => (data.len() as u64, false),
            NodeKind::Directory => (0, true),
        };
        VfsStat {
            name: Some(file_name(path).to_string()),
            size,
            is_directory,
            time_creation: self.created,
            time_last_access: self.accessed,
            time_last_modification: self.modified,
            dependent_data0: None,
            dependent_data1: None,
        }
    }
}

type Nodes = Arc<RwLock<BTreeMap<String, Node>>>;

/// Filesystem held entirely in memory. Cloning shares the contents.
#[derive(Debug, Clone)]
pub struct MemoryVfs {
    name: String,
    nodes: Nodes,
}

impl MemoryVfs {
    pub fn new(name: impl Into<String>) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(String::new(), Node::new(NodeKind::Directory));
        Self {
            name: name.into(),
            nodes: Arc::new(RwLock::new(nodes)),
        }
    }

    /// Creates `path` and any missing parent directories.
    pub fn create_dir_all(&self, path: &str) -> VfsResult<()> {
        let path = normalize(path);
        let mut nodes = self.nodes.write();
        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(component);
            match nodes.get(&current).map(|node| &node.kind) {
                Some(NodeKind::Directory) => {}
                Some(NodeKind::File(_)) => {
                    return Err(VfsError::new(
                        VfsErrorKind::NotADirectory,
                        "memory_vfs.create_dir_all",
                    ));
                }
                None => {
                    nodes.insert(current.clone(), Node::new(NodeKind::Directory));
                }
            }
        }
        Ok(())
    }

    /// Stores `data` at `path`, creating parent directories as needed.
    pub fn insert_file(&self, path: &str, data: impl Into<Vec<u8>>) -> VfsResult<()> {
        let path = normalize(path);
        self.create_dir_all(parent(&path))?;
        let mut nodes = self.nodes.write();
        if let Some(Node {
            kind: NodeKind::Directory,
            ..
        }) = nodes.get(&path)
        {
            return Err(VfsError::new(
                VfsErrorKind::IsADirectory,
                "memory_vfs.insert_file",
            ));
        }
        nodes.insert(path, Node::new(NodeKind::File(data.into())));
        Ok(())
    }
}

#[async_trait]
impl Vfs for MemoryVfs {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(
        &self,
        path: &str,
        flags: FileOpenFlags,
        _mode: FileMode,
    ) -> VfsResult<Box<dyn VfsEntry>> {
        let path = normalize(path);
        let mut nodes = self.nodes.write();

        if let Some(node) = nodes.get_mut(&path) {
            if flags.contains(FileOpenFlags::CREATE | FileOpenFlags::EXCL) {
                return Err(VfsError::new(
                    VfsErrorKind::AlreadyExists,
                    "memory_vfs.open",
                ));
            }
            match node.kind {
                NodeKind::Directory if flags.wants_write() => {
                    return Err(VfsError::new(VfsErrorKind::IsADirectory, "memory_vfs.open"));
                }
                NodeKind::Directory => {}
                NodeKind::File(_) => {
                    if flags.contains(FileOpenFlags::TRUNCATE) && flags.wants_write() {
                        node.kind = NodeKind::File(Vec::new());
                        node.modified = SystemTime::now();
                    }
                }
            }
        } else if flags.contains(FileOpenFlags::CREATE) {
            match nodes.get(parent(&path)).map(|node| &node.kind) {
                Some(NodeKind::Directory) => {}
                Some(NodeKind::File(_)) => {
                    return Err(VfsError::new(
                        VfsErrorKind::NotADirectory,
                        "memory_vfs.open",
                    ));
                }
                None => {
                    return Err(VfsError::new(VfsErrorKind::NotFound, "memory_vfs.open"));
                }
            }
            nodes.insert(path.clone(), Node::new(NodeKind::File(Vec::new())));
        } else {
            return Err(VfsError::new(VfsErrorKind::NotFound, "memory_vfs.open"));
        }

        Ok(Box::new(MemoryEntry {
            nodes: self.nodes.clone(),
            path,
            flags,
        }))
    }

    async fn get_stat(&self, path: &str) -> VfsResult<VfsStat> {
        let path = normalize(path);
        self.nodes
            .read()
            .get(&path)
            .map(|node| node.stat(&path))
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "memory_vfs.get_stat"))
    }

    async fn delete(&self, path: &str) -> VfsResult<()> {
        let path = normalize(path);
        let mut nodes = self.nodes.write();
        match nodes.get(&path).map(|node| &node.kind) {
            Some(NodeKind::File(_)) => {
                nodes.remove(&path);
                Ok(())
            }
            Some(NodeKind::Directory) => Err(VfsError::new(
                VfsErrorKind::IsADirectory,
                "memory_vfs.delete",
            )),
            None => Err(VfsError::new(VfsErrorKind::NotFound, "memory_vfs.delete")),
        }
    }
}

#[derive(Debug)]
struct MemoryEntry {
    nodes: Nodes,
    path: String,
    flags: FileOpenFlags,
}

impl MemoryEntry {
    fn missing(&self, operation: &'static str) -> VfsError {
        VfsError::new(VfsErrorKind::NotFound, operation)
    }
}

#[async_trait]
impl VfsEntry for MemoryEntry {
    fn stat(&self) -> VfsStat {
        self.nodes
            .read()
            .get(&self.path)
            .map(|node| node.stat(&self.path))
            .unwrap_or_else(|| {
                VfsStat::new(
                    Some(file_name(&self.path).to_string()),
                    0,
                    false,
                    SystemTime::UNIX_EPOCH,
                )
            })
    }

    async fn read_chunk(&self, offset: u64, length: usize) -> VfsResult<Bytes> {
        if !self.flags.contains(FileOpenFlags::READ) {
            return Err(VfsError::new(
                VfsErrorKind::PermissionDenied,
                "memory_entry.read_chunk",
            ));
        }
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(&self.path)
            .ok_or_else(|| self.missing("memory_entry.read_chunk"))?;
        let NodeKind::File(data) = &node.kind else {
            return Err(VfsError::new(
                VfsErrorKind::IsADirectory,
                "memory_entry.read_chunk",
            ));
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(length).min(data.len());
        let chunk = Bytes::copy_from_slice(&data[start..end]);
        node.accessed = SystemTime::now();
        Ok(chunk)
    }

    async fn write_chunk(&self, offset: u64, bytes: &[u8]) -> VfsResult<usize> {
        if !self.flags.intersects(FileOpenFlags::WRITE | FileOpenFlags::APPEND) {
            return Err(VfsError::new(
                VfsErrorKind::PermissionDenied,
                "memory_entry.write_chunk",
            ));
        }
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(&self.path)
            .ok_or_else(|| self.missing("memory_entry.write_chunk"))?;
        let NodeKind::File(data) = &mut node.kind else {
            return Err(VfsError::new(
                VfsErrorKind::IsADirectory,
                "memory_entry.write_chunk",
            ));
        };
        let start = if self.flags.contains(FileOpenFlags::APPEND) {
            data.len() as u64
        } else {
            offset
        };
        let end = start
            .checked_add(bytes.len() as u64)
            .filter(|end| *end <= MAX_FILE_SIZE)
            .ok_or_else(|| VfsError::new(VfsErrorKind::InvalidInput, "memory_entry.write_chunk"))?;
        let (start, end) = (start as usize, end as usize);
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        node.modified = SystemTime::now();
        Ok(bytes.len())
    }

    async fn enumerate(&self) -> VfsResult<Vec<VfsStat>> {
        let nodes = self.nodes.read();
        match nodes.get(&self.path).map(|node| &node.kind) {
            Some(NodeKind::Directory) => {}
            Some(NodeKind::File(_)) => {
                return Err(VfsError::new(
                    VfsErrorKind::NotADirectory,
                    "memory_entry.enumerate",
                ));
            }
            None => return Err(self.missing("memory_entry.enumerate")),
        }
        Ok(nodes
            .iter()
            .filter(|(path, _)| !path.is_empty() && parent(path) == self.path)
            .map(|(path, node)| node.stat(path))
            .collect())
    }
}

/// Strips the device prefix, empty components and `.`.
fn normalize(path: &str) -> String {
    let path = match path.split_once(':') {
        Some((_device, rest)) => rest,
        None => path,
    };
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VfsExt;
    use pretty_assertions::assert_eq;

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize("ms0:/PSP//GAME/./x"), "PSP/GAME/x");
        assert_eq!(normalize("/"), "");
        assert_eq!(parent("PSP/GAME"), "PSP");
        assert_eq!(parent("PSP"), "");
        assert_eq!(file_name("PSP/GAME"), "GAME");
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let fs = MemoryVfs::new("ms0");
        fs.create_dir_all("/PSP/SAVEDATA").unwrap();

        let written = fs.write_all("ms0:/PSP/SAVEDATA/DATA.BIN", b"hello").await.unwrap();
        assert_eq!(written, 5);
        assert_eq!(
            fs.read_all("/PSP/SAVEDATA/DATA.BIN").await.unwrap(),
            Bytes::from_static(b"hello")
        );

        // Truncating write replaces the contents.
        fs.write_all("/PSP/SAVEDATA/DATA.BIN", b"hi").await.unwrap();
        assert_eq!(fs.get_stat("/PSP/SAVEDATA/DATA.BIN").await.unwrap().size, 2);
    }

    #[tokio::test]
    async fn open_semantics() {
        let fs = MemoryVfs::new("ms0");
        fs.insert_file("a/b.txt", b"abc".to_vec()).unwrap();

        let err = fs.open("missing", FileOpenFlags::READ, 0).await.unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::NotFound);

        let err = fs
            .open("a/b.txt", FileOpenFlags::CREATE | FileOpenFlags::EXCL | FileOpenFlags::WRITE, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::AlreadyExists);

        let err = fs
            .open("nope/c.txt", FileOpenFlags::CREATE | FileOpenFlags::WRITE, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::NotFound);

        let err = fs.open("a", FileOpenFlags::WRITE, 0).await.unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::IsADirectory);

        let read_only = fs.open("a/b.txt", FileOpenFlags::READ, 0).await.unwrap();
        assert_eq!(
            read_only.write_chunk(0, b"x").await.unwrap_err().kind(),
            VfsErrorKind::PermissionDenied
        );

        let appender = fs
            .open("a/b.txt", FileOpenFlags::APPEND | FileOpenFlags::READ, 0)
            .await
            .unwrap();
        appender.write_chunk(0, b"de").await.unwrap();
        assert_eq!(appender.read_all().await.unwrap(), Bytes::from_static(b"abcde"));
    }

    #[tokio::test]
    async fn writes_past_the_size_limit_are_rejected() {
        let fs = MemoryVfs::new("ms0");
        fs.insert_file("save.bin", b"abc".to_vec()).unwrap();
        let entry = fs.open("save.bin", FileOpenFlags::WRITE, 0).await.unwrap();

        for offset in [u64::MAX, u64::MAX - 1, 1 << 40, MAX_FILE_SIZE] {
            assert_eq!(
                entry.write_chunk(offset, b"ab").await.unwrap_err().kind(),
                VfsErrorKind::InvalidInput
            );
        }
        assert_eq!(entry.stat().size, 3);

        assert_eq!(entry.write_chunk(5, b"de").await.unwrap(), 2);
        assert_eq!(
            fs.read_all("save.bin").await.unwrap(),
            Bytes::from_static(b"abc\0\0de")
        );
    }

    #[tokio::test]
    async fn directories_enumerate_their_children() {
        let fs = MemoryVfs::new("flash0");
        fs.insert_file("kd/audio.prx", vec![0; 16]).unwrap();
        fs.insert_file("kd/ata.prx", vec![0; 8]).unwrap();
        fs.insert_file("kd/resource/x.rsc", vec![0; 4]).unwrap();

        let dir = fs.open_directory("flash0:/kd").await.unwrap();
        assert!(dir.is_directory());
        let mut names: Vec<_> = dir
            .enumerate()
            .await
            .unwrap()
            .into_iter()
            .map(|stat| (stat.name.unwrap(), stat.is_directory))
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                ("ata.prx".to_string(), false),
                ("audio.prx".to_string(), false),
                ("resource".to_string(), true),
            ]
        );
    }

    #[tokio::test]
    async fn delete_and_exists() {
        let fs = MemoryVfs::new("ms0");
        fs.insert_file("x", b"1".to_vec()).unwrap();
        assert!(fs.exists("x").await);
        fs.delete("x").await.unwrap();
        assert!(!fs.exists("x").await);
        assert_eq!(fs.delete("x").await.unwrap_err().kind(), VfsErrorKind::NotFound);
        assert_eq!(fs.delete("/").await.unwrap_err().kind(), VfsErrorKind::IsADirectory);
    }

    #[tokio::test]
    async fn devctl_is_not_provided() {
        let fs = MemoryVfs::new("ms0");
        let mut out = [0u8; 4];
        let err = fs.devctl(0x0202_5806, &[], &mut out).await.unwrap_err();
        assert!(err.is_contract_violation());
        assert_eq!(err.context(), "ms0.devctl");
    }
}
