//! # voltflow-raw
//!
//! Hardware register definitions for Intel voltage and power tuning.
//!
//! This crate provides the bit-level contract of the registers voltflow
//! programs: the overclocking mailbox carrying voltage-plane offsets, the
//! RAPL power limit registers and their unit register, and the temperature
//! target register. Encodings are kept as pure functions and typed layouts
//! so they can be exercised without hardware; the device I/O lives in
//! [`msr`].
//!
//! ## Usage
//!
//! ```ignore
//! use voltflow_raw::msr::MsrHandle;
//! use voltflow_raw::{rapl, voltage};
//!
//! let msr = MsrHandle::new(0)?;
//! msr.write(voltage::MSR_OC_MAILBOX, voltage::read_request(0))?;
//! let answer = msr.read(voltage::MSR_OC_MAILBOX)?;
//! println!("core plane offset: -{:.2} mV", voltage::decode_offset(answer));
//! ```

pub mod msr;
pub mod rapl;
pub mod register;
pub mod thermal;
pub mod voltage;

// Re-export for convenience
pub use msr::{MsrError, MsrHandle, Result};
pub use register::RegisterLayout;
