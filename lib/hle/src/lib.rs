//! High-level emulation of PSP firmware routines.
//!
//! HLE routines look synchronous to guest code. Routines that have to wait
//! on hardware return an [`HleOutcome::Wait`] and the [`Scheduler`] parks the
//! calling thread until the wrapped result settles. `sceAudio` is the
//! exemplar module.

#[macro_use]
mod macros;

pub mod audio;
mod config;
mod context;
mod errors;
pub mod registry;
pub mod sce_audio;
pub mod scheduler;
mod waiting;

pub use crate::audio::{AudioFormat, Channel, SceAudio};
pub use crate::config::{AudioConfig, ConfigError, HleConfig};
pub use crate::context::HleContext;
pub use crate::errors::SceKernelError;
pub use crate::registry::{HleRegistry, NativeFunction, RegistryError};
pub use crate::scheduler::{Scheduler, SchedulerError, ThreadId, ThreadStatus};
pub use crate::waiting::{AcceptCallbacks, HleOutcome, WaitingDescriptor};
