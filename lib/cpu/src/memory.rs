use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Start of user RAM in the guest address space.
pub const USER_RAM_BASE: u32 = 0x0880_0000;
/// Size of user RAM on a stock console.
pub const USER_RAM_SIZE: usize = 24 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("access of {len} bytes at {address:#010x} is outside guest memory")]
    OutOfBounds { address: u32, len: usize },
}

/// Flat little-endian view of guest user RAM.
pub struct GuestMemory {
    base: u32,
    data: Vec<u8>,
}

impl GuestMemory {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size],
        }
    }

    pub fn user_ram() -> Self {
        Self::new(USER_RAM_BASE, USER_RAM_SIZE)
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn offset(&self, address: u32, len: usize) -> Result<usize, MemoryError> {
        let oob = MemoryError::OutOfBounds { address, len };
        let offset = address.checked_sub(self.base).ok_or(oob)? as usize;
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(offset),
            _ => Err(oob),
        }
    }

    pub fn slice(&self, address: u32, len: usize) -> Result<&[u8], MemoryError> {
        let offset = self.offset(address, len)?;
        Ok(&self.data[offset..offset + len])
    }

    pub fn slice_mut(&mut self, address: u32, len: usize) -> Result<&mut [u8], MemoryError> {
        let offset = self.offset(address, len)?;
        Ok(&mut self.data[offset..offset + len])
    }

    /// Everything from `address` to the end of RAM.
    pub fn tail(&self, address: u32) -> Option<&[u8]> {
        let offset = self.offset(address, 0).ok()?;
        Some(&self.data[offset..])
    }

    pub fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        self.slice_mut(address, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_u32(&self, address: u32) -> Result<u32, MemoryError> {
        Ok(LittleEndian::read_u32(self.slice(address, 4)?))
    }

    pub fn write_u32(&mut self, address: u32, value: u32) -> Result<(), MemoryError> {
        LittleEndian::write_u32(self.slice_mut(address, 4)?, value);
        Ok(())
    }
}

impl std::fmt::Debug for GuestMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestMemory")
            .field("base", &format_args!("{:#010x}", self.base))
            .field("size", &self.data.len())
            .finish()
    }
}
