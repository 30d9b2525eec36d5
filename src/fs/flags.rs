//! Open flags
//!
//! The access mode occupies the two low bits as a selector, the way
//! POSIX encodes `O_RDONLY`/`O_WRONLY`/`O_RDWR`; the remaining flags
//! are independent bits.

use bitflags::bitflags;

use crate::error::ErrorKind;

bitflags! {
    /// Flags accepted by [`SecureFs::open`](crate::fs::SecureFs::open)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open for writing only
        const WRITE_ONLY = 0x1;
        /// Open for reading and writing
        const READ_WRITE = 0x2;
        /// Position every write at the current end of file
        const APPEND     = 0x8;
        /// Create the file if it does not exist
        const CREATE     = 0x40;
        /// With `CREATE`, fail if the file already exists
        const EXCLUSIVE  = 0x80;
        /// Drop the existing contents on open
        const TRUNCATE   = 0x200;
    }
}

impl OpenFlags {
    /// Open for reading only (the zero access encoding)
    pub const READ_ONLY: OpenFlags = OpenFlags::empty();

    const ACCESS_MASK: u32 = 0x3;

    /// Decode the access-mode selector. The `WRITE_ONLY | READ_WRITE`
    /// encoding is meaningless and rejected.
    pub fn access(self) -> Result<Access, ErrorKind> {
        match self.bits() & Self::ACCESS_MASK {
            0x0 => Ok(Access::Read),
            0x1 => Ok(Access::Write),
            0x2 => Ok(Access::ReadWrite),
            _ => Err(ErrorKind::InvalidInput),
        }
    }
}

/// Decoded access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_decoding() {
        assert_eq!(OpenFlags::READ_ONLY.access().unwrap(), Access::Read);
        assert_eq!(OpenFlags::WRITE_ONLY.access().unwrap(), Access::Write);
        assert_eq!(OpenFlags::READ_WRITE.access().unwrap(), Access::ReadWrite);
        assert_eq!(
            (OpenFlags::WRITE_ONLY | OpenFlags::READ_WRITE).access(),
            Err(ErrorKind::InvalidInput)
        );
    }

    #[test]
    fn test_option_flags_do_not_disturb_access() {
        let flags = OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;
        assert_eq!(flags.access().unwrap(), Access::ReadWrite);
        assert!(flags.contains(OpenFlags::CREATE));
        assert!(!flags.contains(OpenFlags::APPEND));
    }

    #[test]
    fn test_readable_writable() {
        assert!(Access::Read.readable());
        assert!(!Access::Read.writable());
        assert!(Access::Write.writable());
        assert!(!Access::Write.readable());
        assert!(Access::ReadWrite.readable() && Access::ReadWrite.writable());
    }
}
