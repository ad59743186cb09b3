//! The tuning appliers
//!
//! One module per tunable concern: voltage-plane offsets, per-domain power
//! limits, and the critical-temperature offset. Each applier takes the
//! caller's configuration snapshot, performs its register transactions, and
//! reports human-readable outcome lines; failures never abort sibling
//! targets, and every applier returns whether all of its work succeeded.

pub mod power;
pub mod thermal;
pub mod voltage;

pub use power::apply_power_limit;
pub use thermal::apply_thermal_offset;
pub use voltage::apply_voltage_offsets;
