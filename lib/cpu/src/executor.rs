use async_trait::async_trait;
use thiserror::Error;

use crate::{CpuState, MemoryError};

/// Faults raised by guest code while an executor is running it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuFault {
    #[error("illegal instruction {opcode:#010x} at {pc:#010x}")]
    IllegalInstruction { pc: u32, opcode: u32 },
    #[error("branch from {pc:#010x} to invalid address {target:#010x}")]
    InvalidBranch { pc: u32, target: u32 },
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("execution aborted: {0}")]
    Aborted(String),
}

/// The instruction interpreter, as seen from the HLE layer.
///
/// Executors run on the scheduler thread and may suspend on HLE calls, so the
/// returned futures are not required to be `Send`.
#[async_trait(?Send)]
pub trait CpuExecutor {
    /// Runs guest code from `state.pc()` until the program counter reaches
    /// `stop_pc` or a fault occurs.
    async fn execute_until(&mut self, state: &mut CpuState, stop_pc: u32) -> Result<(), CpuFault>;
}
