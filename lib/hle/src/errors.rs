use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::waiting::HleOutcome;

/// Kernel error codes guest software compares against.
///
/// The values are part of the firmware ABI. File errors reaching the guest
/// use the `0x8001_xxxx` errno range instead, see
/// [`pspemu_vfs::VfsError::guest_code`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Error, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u32)]
pub enum SceKernelError {
    #[error("illegal argument")]
    IllegalArgument = 0x8002_00D2,
    #[error("illegal address")]
    IllegalAddress = 0x8002_00D3,
    #[error("wait cancelled")]
    WaitCancel = 0x8002_01AA,
    #[error("audio channel not initialized")]
    AudioChannelNotInit = 0x8026_0001,
    #[error("audio channel busy")]
    AudioChannelBusy = 0x8026_0002,
    #[error("invalid audio channel")]
    AudioInvalidChannel = 0x8026_0003,
    #[error("no audio channels available")]
    AudioNoChannelsAvailable = 0x8026_0005,
    #[error("audio sample data size not aligned")]
    AudioOutputSampleDataSizeNotAligned = 0x8026_0006,
    #[error("invalid audio format")]
    AudioInvalidFormat = 0x8026_0007,
}

impl SceKernelError {
    /// The value written to `v0`.
    pub fn code(self) -> i32 {
        u32::from(self) as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::try_from(code as u32).ok()
    }
}

impl From<SceKernelError> for i32 {
    fn from(err: SceKernelError) -> Self {
        err.code()
    }
}

impl From<SceKernelError> for HleOutcome {
    fn from(err: SceKernelError) -> Self {
        HleOutcome::Immediate(err.code())
    }
}
