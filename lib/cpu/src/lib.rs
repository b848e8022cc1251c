//! Guest CPU seam for the HLE core.
//!
//! This crate does not interpret instructions. It owns the architectural
//! state an interpreter works on ([`CpuState`]), the guest RAM view HLE
//! routines marshal pointers through ([`GuestMemory`]), and the [`Interop`]
//! bridge that lets host code call into guest code and get its registers
//! back untouched.

mod executor;
mod interop;
mod memory;
mod registers;

pub use crate::executor::{CpuExecutor, CpuFault};
pub use crate::interop::{Interop, InteropError, INTEROP_RETURN_ADDRESS, MAX_REGISTER_ARGS};
pub use crate::memory::{GuestMemory, MemoryError, USER_RAM_BASE, USER_RAM_SIZE};
pub use crate::registers::{reg, CpuState, Registers, GPR_COUNT};
