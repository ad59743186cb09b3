//! Register transaction layer
//!
//! Two physical mechanisms reach the power-control registers: the per-CPU
//! MSR device (an indexed register file) and the memory-mapped mirror of
//! the package power limit. [`MsrIo`] is the seam the appliers program
//! against; platforms that transact MSRs through a command channel instead
//! of a register file implement the same trait.

pub mod mem;

use voltflow_raw::msr::MsrHandle;

use crate::error::Result;

pub use mem::MappedRegion;

/// Register transactions against one CPU's model-specific registers.
pub trait MsrIo {
    fn read(&self, addr: u64) -> Result<u64>;
    fn write(&self, addr: u64, value: u64) -> Result<()>;
}

impl MsrIo for MsrHandle {
    fn read(&self, addr: u64) -> Result<u64> {
        Ok(MsrHandle::read(self, addr)?)
    }

    fn write(&self, addr: u64, value: u64) -> Result<()> {
        Ok(MsrHandle::write(self, addr, value)?)
    }
}
