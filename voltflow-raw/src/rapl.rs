//! RAPL (Running Average Power Limit) register definitions
//!
//! RAPL exposes per-domain power limiting: two power ceilings (short and
//! long term) with enable bits and time windows, plus a units register that
//! scales the raw fields into watts and seconds.
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Section 14.9: Platform Specific Power Management Support

use crate::register::RegisterLayout;

/// MSR addresses for RAPL
pub mod msr {
    /// RAPL Power Unit MSR - Defines energy, power, and time units
    pub const MSR_RAPL_POWER_UNIT: u64 = 0x606;

    /// Package Power Limit - Configure package power limits
    pub const MSR_PKG_POWER_LIMIT: u64 = 0x610;

    /// PP0 Power Limit - Core power limits
    pub const MSR_PP0_POWER_LIMIT: u64 = 0x638;

    /// DRAM Power Limit - Memory power limits
    pub const MSR_DRAM_POWER_LIMIT: u64 = 0x618;
}

/// Physical address of the MCHBAR mirror of the package power limit.
///
/// The memory controller exposes a second copy of MSR 0x610; firmware or
/// embedded controllers sometimes rewrite one copy and not the other, so
/// both are programmed when available.
pub const MEM_PKG_POWER_LIMIT: u64 = 0xFED1_59A0;

/// A power domain and the two ways its limit register can be reached.
///
/// A zero address means the domain has no such path; at least one must be
/// nonzero for the domain to be usable.
#[derive(Debug, Clone, Copy)]
pub struct PowerDomain {
    pub name: &'static str,
    /// Limit register address in the MSR file, or 0.
    pub msr_addr: u64,
    /// Physical address of the memory-mapped mirror, or 0.
    pub mem_addr: u64,
}

/// The tunable power domains, in the order they are processed.
pub const POWER_DOMAINS: [PowerDomain; 3] = [
    PowerDomain {
        name: "package",
        msr_addr: msr::MSR_PKG_POWER_LIMIT,
        mem_addr: MEM_PKG_POWER_LIMIT,
    },
    PowerDomain {
        name: "core",
        msr_addr: msr::MSR_PP0_POWER_LIMIT,
        mem_addr: 0,
    },
    PowerDomain {
        name: "dram",
        msr_addr: msr::MSR_DRAM_POWER_LIMIT,
        mem_addr: 0,
    },
];

/// RAPL Power Unit Register layout
///
/// Defines the units for energy, power, and time measurements.
///
/// ## Register Format
///
/// | Bits   | Field        | Description                           |
/// |--------|--------------|---------------------------------------|
/// | 0-3    | power_units  | Power units (1/2^PU watts)            |
/// | 4-7    | reserved     |                                       |
/// | 8-12   | energy_units | Energy units (1/2^ESU joules)         |
/// | 13-15  | reserved     |                                       |
/// | 16-19  | time_units   | Time units (1/2^TU seconds)           |
/// | 20-63  | reserved     |                                       |
#[derive(Debug, Clone, Copy, Default)]
pub struct RaplPowerUnit {
    /// Power units: watts = value * (1.0 / 2^power_units)
    pub power_units: u8,

    /// Energy units: joules = value * (1.0 / 2^energy_units)
    pub energy_units: u8,

    /// Time units: seconds = value * (1.0 / 2^time_units)
    pub time_units: u8,
}

impl RegisterLayout for RaplPowerUnit {
    fn to_msr_value(&self) -> u64 {
        (self.power_units as u64 & 0x0F)
            | ((self.energy_units as u64 & 0x1F) << 8)
            | ((self.time_units as u64 & 0x0F) << 16)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            power_units: (value & 0x0F) as u8,
            energy_units: ((value >> 8) & 0x1F) as u8,
            time_units: ((value >> 16) & 0x0F) as u8,
        }
    }
}

impl RaplPowerUnit {
    /// Raw power fields count in 1/power_divisor watts.
    pub fn power_divisor(&self) -> u32 {
        1 << self.power_units
    }

    /// Raw time fields count in 1/time_divisor seconds.
    pub fn time_divisor(&self) -> u32 {
        1 << self.time_units
    }
}

/// RAPL Power Limit Register layout
///
/// The decoded view of a limit register used for reporting. Clamp bits,
/// time windows and reserved bits are not represented; writes preserve them
/// through the splice helpers below.
///
/// ## Register Format
///
/// | Bits   | Field              | Description                        |
/// |--------|--------------------|------------------------------------|
/// | 0-14   | long_term          | Long term limit (raw power units)  |
/// | 15     | long_term_enabled  | Enable long term limit             |
/// | 16     | clamp_1            | Clamp to long term limit           |
/// | 17-23  | time_window_1      | Long term time window              |
/// | 32-46  | short_term         | Short term limit (raw power units) |
/// | 47     | short_term_enabled | Enable short term limit            |
/// | 48     | clamp_2            | Clamp to short term limit          |
/// | 49-55  | time_window_2      | Short term time window             |
/// | 63     | locked             | Register locked until reset        |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaplPowerLimit {
    pub long_term: u16,
    pub long_term_enabled: bool,
    pub short_term: u16,
    pub short_term_enabled: bool,
    pub locked: bool,
}

impl RegisterLayout for RaplPowerLimit {
    fn to_msr_value(&self) -> u64 {
        (self.long_term as u64 & 0x7FFF)
            | (if self.long_term_enabled { 1 << 15 } else { 0 })
            | ((self.short_term as u64 & 0x7FFF) << 32)
            | (if self.short_term_enabled { 1 << 47 } else { 0 })
            | (if self.locked { 1 << 63 } else { 0 })
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            long_term: (value & 0x7FFF) as u16,
            long_term_enabled: (value >> 15) & 1 != 0,
            short_term: ((value >> 32) & 0x7FFF) as u16,
            short_term_enabled: (value >> 47) & 1 != 0,
            locked: (value >> 63) & 1 != 0,
        }
    }
}

impl RaplPowerLimit {
    pub fn short_term_watts(&self, power_divisor: u32) -> u32 {
        u32::from(self.short_term) / power_divisor
    }

    pub fn long_term_watts(&self, power_divisor: u32) -> u32 {
        u32::from(self.long_term) / power_divisor
    }
}

/// Bits preserved when splicing the two 15-bit power limit fields.
pub const LIMIT_PRESERVE_MASK: u64 = 0xffff_8000_ffff_8000;

/// Bits preserved when splicing the short term time window.
pub const SHORT_WINDOW_PRESERVE_MASK: u64 = 0xff01_ffff_ffff_ffff;

/// Bits preserved when splicing the long term time window.
pub const LONG_WINDOW_PRESERVE_MASK: u64 = 0xffff_ffff_ff01_ffff;

/// Time-window field returned once the requested window saturates the
/// 5-bit exponent.
pub const SATURATED_WINDOW: u64 = 0xFE;

/// Merge new raw short/long term limits into `current`, leaving every other
/// bit untouched.
pub fn splice_limits(current: u64, short_term: u64, long_term: u64) -> u64 {
    (current & LIMIT_PRESERVE_MASK) | (short_term << 32) | long_term
}

/// Merge a short term window field (as produced by
/// [`time_window_from_seconds`]) into `current`.
pub fn splice_short_window(current: u64, window: u64) -> u64 {
    (current & SHORT_WINDOW_PRESERVE_MASK) | (window << 48)
}

/// Merge a long term window field into `current`.
pub fn splice_long_window(current: u64, window: u64) -> u64 {
    (current & LONG_WINDOW_PRESERVE_MASK) | (window << 16)
}

/// Clamp a requested limit to the representable range and scale it into raw
/// power units. Negative requests turn the limit down to zero.
pub fn clamp_watts(watts: i32, power_divisor: u32) -> u64 {
    let max_watts = (0x7fff / power_divisor) as i32;
    let clamped = watts.clamp(0, max_watts);
    clamped as u64 * u64::from(power_divisor)
}

/// Decode a time-window field into seconds.
///
/// The field is a floating-point-like pair: a 5-bit exponent in bits 5:1
/// and a 2-bit fractional multiplier in bits 7:6 standing for
/// 1.0, 1.25, 1.5 or 1.75. Callers may pass the whole register shifted down
/// to the field position; higher bits are ignored.
pub fn time_window_to_seconds(field: u64, time_divisor: u32) -> f64 {
    let multiplier = 1.0 + ((field >> 6) & 0x3) as f64 / 4.0;
    let exponent = ((field >> 1) & 0x1f) as i32;
    2f64.powi(exponent) * multiplier / f64::from(time_divisor)
}

/// Encode seconds into a time-window field.
///
/// Searches the four multiplier tracks for the exponent pair with the
/// smallest rounding error. Exponents are rounded up past a fractional part
/// of 0.5 only below 25; a request whose exponent would reach 31 returns
/// [`SATURATED_WINDOW`]. Degenerate requests shorter than one time unit
/// encode as field 0.
pub fn time_window_from_seconds(seconds: f64, time_divisor: u32) -> u64 {
    let scaled = seconds * f64::from(time_divisor);
    if (scaled / 1.75).log2() >= 31.0 {
        return SATURATED_WINDOW;
    }

    let mut best = 0u64;
    let mut best_diff = 1.0f64;
    for index in 0..4u64 {
        let multiplier = 1.0 + index as f64 / 4.0;
        let exponent = (scaled / multiplier).log2();
        let mut exponent_int = exponent as i32;
        let mut diff = exponent - f64::from(exponent_int);
        if exponent_int < 0x19 && diff > 0.5 {
            exponent_int += 1;
            diff = 1.0 - diff;
        }
        if (0..0x20).contains(&exponent_int) && diff < best_diff {
            best_diff = diff;
            best = (index << 6) | ((exponent_int as u64) << 1);
        }
    }
    best
}
