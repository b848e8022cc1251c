use bitflags::bitflags;

/// Unix permission bits passed through to backends that care.
pub type FileMode = u32;

/// `0777`, what the derived conveniences open with.
pub const DEFAULT_FILE_MODE: FileMode = 0o777;

bitflags! {
    /// `PSP_O_*` open flags as guest code passes them.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FileOpenFlags: u32 {
        const READ = 0x0001;
        const WRITE = 0x0002;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const NO_BLOCK = 0x0004;
        /// Set internally when the open comes from `sceIoDopen`.
        const DIR_OPEN = 0x0008;
        const APPEND = 0x0100;
        const CREATE = 0x0200;
        const TRUNCATE = 0x0400;
        const EXCL = 0x0800;
        const NO_WAIT = 0x8000;

        // Games pass undocumented bits; keep them rather than rejecting the call.
        const _ = !0;
    }
}

impl FileOpenFlags {
    pub fn wants_write(&self) -> bool {
        self.intersects(Self::WRITE | Self::APPEND | Self::CREATE | Self::TRUNCATE)
    }
}
