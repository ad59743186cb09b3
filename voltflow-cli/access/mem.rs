//! Guarded access to memory-mapped control registers
//!
//! The MCHBAR mirror of the package power limit lives in physical memory
//! and is reached by mapping its page from `/dev/mem`. Whether a mapped
//! address is actually backed depends on firmware configuration, so plain
//! dereferences can bring the whole process down with SIGSEGV or SIGBUS.
//! [`MappedRegion::try_read`]/[`try_write`](MappedRegion::try_write) instead
//! move the bytes through the kernel's user-copy path, which reports an
//! unbacked address as EFAULT.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr;

use crate::error::{Result, VoltflowError};

/// Length of one mapped control-register page.
pub const MAP_SIZE: usize = 4096;

/// Page-relative address mask.
pub const MAP_MASK: u64 = (MAP_SIZE as u64) - 1;

pub struct MappedRegion {
    base: *mut u8,
    len: usize,
    mapped: bool,
}

impl MappedRegion {
    /// Map the page of physical memory containing `phys_addr`.
    pub fn open_phys(phys_addr: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")
            .map_err(|e| VoltflowError::MapFailed(format!("Failed to open /dev/mem: {e}")))?;

        let page = phys_addr & !MAP_MASK;
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                MAP_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                page as libc::off_t,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(VoltflowError::MapFailed(format!(
                "Failed to map physical page 0x{page:X}: {}",
                std::io::Error::last_os_error()
            )));
        }

        tracing::debug!("Mapped physical page 0x{page:X} for control register access");

        Ok(Self {
            base: base.cast(),
            len: MAP_SIZE,
            mapped: true,
        })
    }

    /// Wrap caller-owned memory instead of a `/dev/mem` mapping.
    #[cfg(test)]
    pub(crate) fn from_raw(base: *mut u8, len: usize) -> Self {
        Self {
            base,
            len,
            mapped: false,
        }
    }

    /// Read the 64-bit register at the page-relative `offset`.
    pub fn try_read(&self, offset: u64) -> Result<u64> {
        let mut buffer = [0u8; 8];
        guarded_copy(self.slot(offset)?, buffer.as_mut_ptr(), buffer.len())?;
        Ok(u64::from_ne_bytes(buffer))
    }

    /// Write the 64-bit register at the page-relative `offset`.
    pub fn try_write(&self, offset: u64, value: u64) -> Result<()> {
        let buffer = value.to_ne_bytes();
        guarded_copy(buffer.as_ptr(), self.slot(offset)?, buffer.len())
    }

    fn slot(&self, offset: u64) -> Result<*mut u8> {
        if offset as usize + 8 > self.len {
            return Err(VoltflowError::Fault);
        }
        Ok(self.base.wrapping_add(offset as usize))
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if self.mapped {
            unsafe { libc::munmap(self.base.cast(), self.len) };
        }
    }
}

/// Move `len` bytes from `src` to `dst` through a pipe. The kernel performs
/// both copies, so a fault on either pointer comes back as a short count or
/// EFAULT rather than a signal.
fn guarded_copy(src: *const u8, dst: *mut u8, len: usize) -> Result<()> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(VoltflowError::MapFailed(format!(
            "Failed to create pipe: {}",
            std::io::Error::last_os_error()
        )));
    }
    let (rd, wr) = (fds[0], fds[1]);

    let pushed = unsafe { libc::write(wr, src.cast(), len) };
    let result = if pushed == len as isize {
        let pulled = unsafe { libc::read(rd, dst.cast(), len) };
        if pulled == len as isize {
            Ok(())
        } else {
            Err(VoltflowError::Fault)
        }
    } else {
        Err(VoltflowError::Fault)
    };

    unsafe {
        libc::close(rd);
        libc::close(wr);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_round_trip() {
        let mut page = vec![0u8; MAP_SIZE];
        let region = MappedRegion::from_raw(page.as_mut_ptr(), page.len());
        region.try_write(0x9A0, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(region.try_read(0x9A0).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(region.try_read(0).unwrap(), 0);
    }

    #[test]
    fn test_fault_is_an_error_not_a_signal() {
        // Page zero is never mapped; both directions must fail cleanly.
        let region = MappedRegion::from_raw(8 as *mut u8, MAP_SIZE);
        assert!(matches!(region.try_read(0), Err(VoltflowError::Fault)));
        assert!(matches!(
            region.try_write(0, 1),
            Err(VoltflowError::Fault)
        ));
    }

    #[test]
    fn test_out_of_range_offset_is_a_fault() {
        let mut bytes = [0u8; 16];
        let region = MappedRegion::from_raw(bytes.as_mut_ptr(), bytes.len());
        assert!(region.try_read(8).is_ok());
        assert!(matches!(region.try_read(9), Err(VoltflowError::Fault)));
    }
}
