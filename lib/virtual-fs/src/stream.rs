//! Entries backed by a seekable byte stream.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{VfsEntry, VfsError, VfsErrorKind, VfsResult, VfsStat};

/// A readable, seekable byte source that knows its own metadata.
#[async_trait]
pub trait AsyncStream: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> u64;
    fn date(&self) -> SystemTime;

    /// Reads up to `length` bytes at `offset`. Short reads happen at the end
    /// of the stream.
    async fn read_chunk(&self, offset: u64, length: usize) -> VfsResult<Bytes>;
}

/// An immutable in-memory stream.
#[derive(Debug, Clone)]
pub struct MemoryStream {
    name: String,
    data: Bytes,
    date: SystemTime,
}

impl MemoryStream {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::with_date(name, data, SystemTime::now())
    }

    pub fn with_date(name: impl Into<String>, data: impl Into<Bytes>, date: SystemTime) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            date,
        }
    }
}

#[async_trait]
impl AsyncStream for MemoryStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn date(&self) -> SystemTime {
        self.date
    }

    async fn read_chunk(&self, offset: u64, length: usize) -> VfsResult<Bytes> {
        let start = usize::try_from(offset)
            .map_err(|_| VfsError::new(VfsErrorKind::InvalidInput, "memory_stream.read_chunk"))?;
        if start > self.data.len() {
            return Ok(Bytes::new());
        }
        let end = start.saturating_add(length).min(self.data.len());
        Ok(self.data.slice(start..end))
    }
}

/// A read-only [`VfsEntry`] over an [`AsyncStream`].
///
/// Name, size and timestamps come from the stream itself.
#[derive(Debug, Clone)]
pub struct VfsEntryStream {
    stream: Arc<dyn AsyncStream>,
}

impl VfsEntryStream {
    pub fn new(stream: Arc<dyn AsyncStream>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl VfsEntry for VfsEntryStream {
    fn stat(&self) -> VfsStat {
        VfsStat::new(
            Some(self.stream.name().to_string()),
            self.stream.size(),
            false,
            self.stream.date(),
        )
    }

    fn size(&self) -> u64 {
        self.stream.size()
    }

    async fn read_chunk(&self, offset: u64, length: usize) -> VfsResult<Bytes> {
        self.stream.read_chunk(offset, length).await
    }
}
