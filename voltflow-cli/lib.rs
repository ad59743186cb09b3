// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod access;
pub mod config;
pub mod error;
pub mod report;
pub mod tune;

pub use config::TuneConfig;
pub use error::{Result, VoltflowError};
pub use report::Reporter;
