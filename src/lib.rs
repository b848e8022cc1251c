#![deny(unused_imports, unused_variables)]

//! Umbrella crate for the PSP HLE core.

pub use pspemu_async as async_result;
pub use pspemu_cpu as cpu;
pub use pspemu_hle as hle;
pub use pspemu_vfs as vfs;
