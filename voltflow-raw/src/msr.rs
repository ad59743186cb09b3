//! MSR (Model-Specific Register) read/write primitives
//!
//! This module provides low-level MSR access through `/dev/cpu/*/msr`.
//! The device routes every transaction to the owning CPU, so a handle is
//! simply the opened device file plus the CPU number it belongs to.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;

pub type Result<T> = std::result::Result<T, MsrError>;

/// Errors that can occur during MSR operations
#[derive(Debug, thiserror::Error)]
pub enum MsrError {
    #[error("Failed to open MSR device for CPU {cpu}: {source}")]
    OpenFailed { cpu: u32, source: std::io::Error },

    #[error("Failed to read MSR 0x{msr:X} on CPU {cpu}: {source}")]
    ReadFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },

    #[error("Failed to write MSR 0x{msr:X} on CPU {cpu}: {source}")]
    WriteFailed {
        cpu: u32,
        msr: u64,
        source: std::io::Error,
    },
}

/// An open MSR device for one CPU.
///
/// Reads and writes are positioned at the register address and transfer
/// exactly 8 bytes. Opening requires root (or CAP_SYS_RAWIO) and the `msr`
/// kernel module.
///
/// # Example
///
/// ```ignore
/// use voltflow_raw::msr::MsrHandle;
///
/// let msr = MsrHandle::new(0)?;
/// let units = msr.read(0x606)?;
/// println!("MSR 0x606 = 0x{:016X}", units);
/// ```
pub struct MsrHandle {
    file: File,
    cpu: u32,
}

impl MsrHandle {
    pub fn new(cpu: u32) -> Result<Self> {
        let path = format!("/dev/cpu/{cpu}/msr");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| MsrError::OpenFailed { cpu, source: e })?;

        Ok(Self { file, cpu })
    }

    /// Read a 64-bit value from the register at `msr`.
    pub fn read(&self, msr: u64) -> Result<u64> {
        let mut buffer = [0u8; 8];
        self.file
            .read_exact_at(&mut buffer, msr)
            .map_err(|e| MsrError::ReadFailed {
                cpu: self.cpu,
                msr,
                source: e,
            })?;

        Ok(u64::from_le_bytes(buffer))
    }

    /// Write a 64-bit value to the register at `msr`.
    ///
    /// Writing incorrect values to MSRs can cause system instability or
    /// crashes; callers are expected to splice new fields into a value read
    /// from the same register.
    pub fn write(&self, msr: u64, value: u64) -> Result<()> {
        self.file
            .write_all_at(&value.to_le_bytes(), msr)
            .map_err(|e| MsrError::WriteFailed {
                cpu: self.cpu,
                msr,
                source: e,
            })?;

        Ok(())
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }
}
