//! Ordered fallback across several backends.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{FileMode, FileOpenFlags, Vfs, VfsEntry, VfsError, VfsErrorKind, VfsResult, VfsStat};

/// Tries each child in order and returns the first success.
///
/// When every child fails, the failure of the last child is returned. Later
/// children are never touched once one has succeeded. This is how the guest
/// OS searches its mount points, so the order is the caller's to choose.
#[derive(Debug, Clone)]
pub struct ProxyVfs {
    children: Vec<Arc<dyn Vfs>>,
}

impl ProxyVfs {
    /// Fails with [`VfsErrorKind::InvalidInput`] when `children` is empty.
    pub fn new(children: Vec<Arc<dyn Vfs>>) -> VfsResult<Self> {
        if children.is_empty() {
            return Err(VfsError::new(
                VfsErrorKind::InvalidInput,
                "proxy_vfs.new: at least one backend is required",
            ));
        }
        Ok(Self { children })
    }

    pub fn children(&self) -> &[Arc<dyn Vfs>] {
        &self.children
    }
}

/// Runs `$call` against each child until one succeeds.
macro_rules! fallback_chain {
    ($self:ident, $operation:literal, |$vfs:ident| $call:expr) => {{
        let mut outcome = Err(VfsError::new(VfsErrorKind::NotFound, $operation));
        for (index, $vfs) in $self.children.iter().enumerate() {
            outcome = $call.await;
            match &outcome {
                Ok(_) => break,
                Err(err) => tracing::trace!(
                    operation = $operation,
                    index,
                    backend = $vfs.name(),
                    error = %err,
                    "backend failed, falling back",
                ),
            }
        }
        outcome
    }};
}

#[async_trait]
impl Vfs for ProxyVfs {
    fn name(&self) -> &str {
        "ProxyVfs"
    }

    async fn open(
        &self,
        path: &str,
        flags: FileOpenFlags,
        mode: FileMode,
    ) -> VfsResult<Box<dyn VfsEntry>> {
        fallback_chain!(self, "proxy_vfs.open", |vfs| vfs.open(path, flags, mode))
    }

    async fn get_stat(&self, path: &str) -> VfsResult<VfsStat> {
        fallback_chain!(self, "proxy_vfs.get_stat", |vfs| vfs.get_stat(path))
    }

    async fn delete(&self, path: &str) -> VfsResult<()> {
        fallback_chain!(self, "proxy_vfs.delete", |vfs| vfs.delete(path))
    }

    async fn open_directory(&self, path: &str) -> VfsResult<Box<dyn VfsEntry>> {
        fallback_chain!(self, "proxy_vfs.open_directory", |vfs| vfs
            .open_directory(path))
    }

    async fn devctl(&self, command: u32, input: &[u8], output: &mut [u8]) -> VfsResult<i32> {
        fallback_chain!(self, "proxy_vfs.devctl", |vfs| vfs.devctl(
            command,
            input,
            &mut *output
        ))
    }
}
