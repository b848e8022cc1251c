//! Asynchronous virtual filesystem used by the HLE IO modules.
//!
//! Backends implement [`Vfs`] and hand out opened resources as
//! [`VfsEntry`] trait objects. [`ProxyVfs`] chains several backends the way
//! the guest OS searches its mount points: first success wins.

use std::borrow::Cow;
use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use pspemu_async::AsyncError;
use thiserror::Error;

mod flags;
pub mod mem_fs;
mod proxy_fs;
mod stream;

pub use crate::flags::{FileMode, FileOpenFlags, DEFAULT_FILE_MODE};
pub use crate::mem_fs::MemoryVfs;
pub use crate::proxy_fs::ProxyVfs;
pub use crate::stream::{AsyncStream, MemoryStream, VfsEntryStream};

pub type VfsResult<T> = Result<T, VfsError>;

/// Snapshot of a file or directory's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsStat {
    pub name: Option<String>,
    pub size: u64,
    pub is_directory: bool,
    pub time_creation: SystemTime,
    pub time_last_access: SystemTime,
    pub time_last_modification: SystemTime,
    /// Backend-dependent, surfaced verbatim in the guest's stat private words.
    pub dependent_data0: Option<u32>,
    pub dependent_data1: Option<u32>,
}

impl VfsStat {
    /// A stat with all three timestamps set to `time`.
    pub fn new(name: Option<String>, size: u64, is_directory: bool, time: SystemTime) -> Self {
        Self {
            name,
            size,
            is_directory,
            time_creation: time,
            time_last_access: time,
            time_last_modification: time,
            dependent_data0: None,
            dependent_data1: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum VfsErrorKind {
    #[error("entry not found")]
    NotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("invalid input")]
    InvalidInput,
    #[error("permission denied")]
    PermissionDenied,
    #[error("unsupported request")]
    NotSupported,
    #[error("io error")]
    Io,
    /// A backend is missing an operation it was expected to provide.
    #[error("operation not implemented by this backend")]
    NotImplemented,
}

/// Error type for filesystem operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{context}: {kind}")]
pub struct VfsError {
    kind: VfsErrorKind,
    context: Cow<'static, str>,
}

impl VfsError {
    pub fn new(kind: VfsErrorKind, context: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }

    /// The error a backend produces for an operation it does not provide.
    ///
    /// This is an integration bug on the host side, so it is logged loudly
    /// and never mapped to a guest error code.
    pub fn not_implemented(backend: &str, operation: &'static str) -> Self {
        tracing::error!(backend, operation, "filesystem backend is missing an operation");
        Self::new(
            VfsErrorKind::NotImplemented,
            format!("{backend}.{operation}"),
        )
    }

    pub fn kind(&self) -> VfsErrorKind {
        self.kind
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn is_contract_violation(&self) -> bool {
        self.kind == VfsErrorKind::NotImplemented
    }

    /// The `SCE_ERROR_ERRNO_*` value guest code sees for this failure.
    pub fn guest_code(&self) -> Option<i32> {
        let errno: u32 = match self.kind {
            VfsErrorKind::NotFound => 2,
            VfsErrorKind::Io => 5,
            VfsErrorKind::PermissionDenied => 13,
            VfsErrorKind::AlreadyExists => 17,
            VfsErrorKind::NotADirectory => 20,
            VfsErrorKind::IsADirectory => 21,
            VfsErrorKind::InvalidInput => 22,
            VfsErrorKind::NotSupported => 134,
            VfsErrorKind::NotImplemented => return None,
        };
        Some((0x8001_0000 | errno) as i32)
    }
}

impl From<VfsError> for AsyncError {
    fn from(err: VfsError) -> Self {
        match err.guest_code() {
            Some(code) => AsyncError::failed(code, err.to_string()),
            None => AsyncError::Defect(err.to_string()),
        }
    }
}

/// A mounted filesystem backend.
///
/// `open` is the one operation every backend must provide. The remaining
/// primitives either derive from it (`get_stat`, `open_directory`) or report
/// [`VfsErrorKind::NotImplemented`] naming the backend.
#[async_trait]
pub trait Vfs: fmt::Debug + Send + Sync {
    /// Identifies the backend in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn open(
        &self,
        path: &str,
        flags: FileOpenFlags,
        mode: FileMode,
    ) -> VfsResult<Box<dyn VfsEntry>>;

    async fn get_stat(&self, path: &str) -> VfsResult<VfsStat> {
        let entry = self
            .open(path, FileOpenFlags::READ, DEFAULT_FILE_MODE)
            .await?;
        let stat = entry.stat();
        entry.close().await?;
        Ok(stat)
    }

    async fn delete(&self, path: &str) -> VfsResult<()> {
        let _ = path;
        Err(VfsError::not_implemented(self.name(), "delete"))
    }

    async fn open_directory(&self, path: &str) -> VfsResult<Box<dyn VfsEntry>> {
        self.open(path, FileOpenFlags::READ, DEFAULT_FILE_MODE)
            .await
    }

    async fn devctl(&self, command: u32, input: &[u8], output: &mut [u8]) -> VfsResult<i32> {
        let _ = (command, input, output);
        Err(VfsError::not_implemented(self.name(), "devctl"))
    }
}

/// Conveniences derived from the [`Vfs`] primitives.
///
/// Implemented for every backend; backends cannot override them.
#[async_trait]
pub trait VfsExt: Vfs {
    async fn read_all(&self, path: &str) -> VfsResult<Bytes> {
        let entry = self
            .open(path, FileOpenFlags::READ, DEFAULT_FILE_MODE)
            .await?;
        let data = entry.read_all().await;
        entry.close().await?;
        data
    }

    async fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<usize> {
        let flags = FileOpenFlags::CREATE | FileOpenFlags::TRUNCATE | FileOpenFlags::WRITE;
        let entry = self.open(path, flags, DEFAULT_FILE_MODE).await?;
        let written = entry.write_all(data).await;
        entry.close().await?;
        written
    }

    /// Any failure, including a backend defect, reads as "does not exist".
    async fn exists(&self, path: &str) -> bool {
        match self.get_stat(path).await {
            Ok(_) => true,
            Err(err) => {
                tracing::trace!(path, error = %err, "treating stat failure as missing entry");
                false
            }
        }
    }
}

impl<T> VfsExt for T where T: Vfs + ?Sized {}

/// An opened file or directory.
///
/// Owned by whoever opened it and closed by that owner. `close` is a no-op
/// unless a backend holds resources; calling it again is harmless.
#[async_trait]
pub trait VfsEntry: fmt::Debug + Send + Sync {
    fn stat(&self) -> VfsStat;

    fn is_directory(&self) -> bool {
        self.stat().is_directory
    }

    fn size(&self) -> u64 {
        self.stat().size
    }

    async fn read_chunk(&self, offset: u64, length: usize) -> VfsResult<Bytes> {
        let _ = (offset, length);
        Err(VfsError::not_implemented(
            std::any::type_name::<Self>(),
            "read_chunk",
        ))
    }

    async fn write_chunk(&self, offset: u64, data: &[u8]) -> VfsResult<usize> {
        let _ = (offset, data);
        Err(VfsError::not_implemented(
            std::any::type_name::<Self>(),
            "write_chunk",
        ))
    }

    async fn enumerate(&self) -> VfsResult<Vec<VfsStat>> {
        Err(VfsError::not_implemented(
            std::any::type_name::<Self>(),
            "enumerate",
        ))
    }

    async fn read_all(&self) -> VfsResult<Bytes> {
        let size = usize::try_from(self.size())
            .map_err(|_| VfsError::new(VfsErrorKind::InvalidInput, "vfs_entry.read_all"))?;
        self.read_chunk(0, size).await
    }

    async fn write_all(&self, data: &[u8]) -> VfsResult<usize> {
        self.write_chunk(0, data).await
    }

    async fn close(&self) -> VfsResult<()> {
        Ok(())
    }
}
