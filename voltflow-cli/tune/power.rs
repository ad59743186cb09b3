//! Power-limit applier
//!
//! A domain's limit register is reachable through the MSR file, through a
//! memory-mapped mirror, or both. Both paths carry the same register, but
//! firmware has been seen rewriting one behind the other's back, so reads
//! consult every existing path and writes program every existing path.

use voltflow_raw::rapl::{self, PowerDomain, RaplPowerLimit, RaplPowerUnit};
use voltflow_raw::register::RegisterLayout;

use crate::access::mem::{MappedRegion, MAP_MASK};
use crate::access::MsrIo;
use crate::config::PowerLimit;
use crate::error::{Result, VoltflowError};
use crate::report::Reporter;

/// The access paths a domain resolves to, checked once up front.
enum LimitPath<'a> {
    Msr(u64),
    Mem(&'a MappedRegion, u64),
    Both(u64, &'a MappedRegion, u64),
}

fn resolve_path<'a>(
    domain: &PowerDomain,
    mem: Option<&'a MappedRegion>,
) -> Result<LimitPath<'a>> {
    let mirror = mem
        .filter(|_| domain.mem_addr != 0)
        .map(|region| (region, domain.mem_addr & MAP_MASK));
    match (domain.msr_addr, mirror) {
        (0, None) => Err(VoltflowError::NoMethod),
        (0, Some((region, offset))) => Ok(LimitPath::Mem(region, offset)),
        (addr, None) => Ok(LimitPath::Msr(addr)),
        (addr, Some((region, offset))) => Ok(LimitPath::Both(addr, region, offset)),
    }
}

/// Read the limit through every existing path. Single-path domains use the
/// one value for both logical copies so downstream logic stays
/// path-agnostic.
fn read_limits(msr: &dyn MsrIo, path: &LimitPath<'_>) -> Result<(u64, u64)> {
    match *path {
        LimitPath::Msr(addr) => {
            let value = msr.read(addr)?;
            Ok((value, value))
        }
        LimitPath::Mem(region, offset) => {
            let value = region.try_read(offset)?;
            Ok((value, value))
        }
        LimitPath::Both(addr, region, offset) => {
            let from_msr = msr.read(addr)?;
            let from_mem = region.try_read(offset)?;
            Ok((from_msr, from_mem))
        }
    }
}

fn write_limits(msr: &dyn MsrIo, path: &LimitPath<'_>, value: u64) -> Result<()> {
    match *path {
        LimitPath::Msr(addr) => msr.write(addr, value),
        LimitPath::Mem(region, offset) => region.try_write(offset, value),
        LimitPath::Both(addr, region, offset) => {
            msr.write(addr, value)?;
            region.try_write(offset, value)
        }
    }
}

/// Apply (or just report) the power limit of one domain.
///
/// Domains are independent; a failure here never blocks other domains, and
/// a write that already reached the hardware is not undone by a later
/// failure.
pub fn apply_power_limit(
    msr: &dyn MsrIo,
    domain: &PowerDomain,
    request: &PowerLimit,
    mem: Option<&MappedRegion>,
    write: bool,
    reporter: &mut Reporter<'_>,
) -> bool {
    reporter.begin_section();

    let path = match resolve_path(domain, mem) {
        Ok(path) => path,
        Err(e) => {
            crate::report!(reporter, "Failed to read {} power values: {}", domain.name, e);
            return false;
        }
    };

    let (mut current, mirror) = match read_limits(msr, &path) {
        Ok(values) => values,
        Err(e) => {
            crate::report!(reporter, "Failed to read {} power values: {}", domain.name, e);
            return false;
        }
    };

    let units = match msr.read(rapl::msr::MSR_RAPL_POWER_UNIT) {
        Ok(raw) => RaplPowerUnit::from_msr_value(raw),
        Err(e) => {
            crate::report!(reporter, "Failed to read {} power values: {}", domain.name, e);
            return false;
        }
    };
    let power_divisor = units.power_divisor();
    let time_divisor = units.time_divisor();

    if write {
        let short_term = rapl::clamp_watts(request.short_term, power_divisor);
        let long_term = rapl::clamp_watts(request.long_term, power_divisor);
        let mut value = rapl::splice_limits(current, short_term, long_term);
        if request.short_time_window > 0.0 {
            let window = rapl::time_window_from_seconds(request.short_time_window, time_divisor);
            value = rapl::splice_short_window(value, window);
        }
        if request.long_time_window > 0.0 {
            let window = rapl::time_window_from_seconds(request.long_time_window, time_divisor);
            value = rapl::splice_long_window(value, window);
        }

        tracing::debug!("Writing 0x{value:016X} to the {} power limit", domain.name);
        match write_limits(msr, &path, value) {
            Ok(()) => current = value,
            Err(e) => {
                crate::report!(
                    reporter,
                    "Failed to write {} power values: {}",
                    domain.name,
                    e
                );
                return false;
            }
        }
    } else if current != mirror {
        crate::report!(reporter, "Warning: MSR and memory values are not equal");
    }

    if reporter.values() {
        let limit = RaplPowerLimit::from_msr_value(current);
        if limit.locked {
            crate::report!(reporter, "Warning: {} power limit is locked", domain.name);
        }
        crate::report!(
            reporter,
            "Short term {} power: {} W, {:.3} s, {}",
            domain.name,
            limit.short_term_watts(power_divisor),
            rapl::time_window_to_seconds(current >> 48, time_divisor),
            enabled_str(limit.short_term_enabled)
        );
        crate::report!(
            reporter,
            "Long term {} power: {} W, {:.3} s, {}",
            domain.name,
            limit.long_term_watts(power_divisor),
            rapl::time_window_to_seconds(current >> 16, time_divisor),
            enabled_str(limit.long_term_enabled)
        );
    }
    true
}

fn enabled_str(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use voltflow_raw::rapl::msr::{MSR_PKG_POWER_LIMIT, MSR_RAPL_POWER_UNIT};

    use super::*;
    use crate::access::mock::MockMsr;

    const MSR_ONLY: PowerDomain = PowerDomain {
        name: "test",
        msr_addr: MSR_PKG_POWER_LIMIT,
        mem_addr: 0,
    };

    const MEM_ONLY: PowerDomain = PowerDomain {
        name: "mirror",
        msr_addr: 0,
        mem_addr: 0xFED1_59A0,
    };

    // power_units = 3 (1/8 W), time_units = 10 (1/1024 s)
    const UNITS: u64 = 0x000A_0003;

    fn request(short: i32, long: i32) -> PowerLimit {
        PowerLimit {
            short_term: short,
            long_term: long,
            short_time_window: 0.0,
            long_time_window: 0.0,
        }
    }

    fn run(
        msr: &dyn MsrIo,
        domain: &PowerDomain,
        req: &PowerLimit,
        mem: Option<&MappedRegion>,
        write: bool,
    ) -> (bool, String) {
        let mut buf = Vec::new();
        let mut reporter = Reporter::new(&mut buf, true);
        let ok = apply_power_limit(msr, domain, req, mem, write, &mut reporter);
        (ok, String::from_utf8(buf).unwrap())
    }

    /// 45 W / 35 W at 1/8 W units, both enabled, 28 s windows.
    fn sample_limit() -> u64 {
        let value = (1 << 47) | (1 << 15);
        let value = rapl::splice_limits(value, 45 * 8, 35 * 8);
        let value = rapl::splice_short_window(value, 0xDC);
        rapl::splice_long_window(value, 0xDC)
    }

    #[test]
    fn test_read_only_report() {
        let msr = MockMsr::with(&[
            (MSR_PKG_POWER_LIMIT, sample_limit()),
            (MSR_RAPL_POWER_UNIT, UNITS),
        ]);
        let (ok, out) = run(&msr, &MSR_ONLY, &request(45, 35), None, false);
        assert!(ok);
        assert_eq!(
            out,
            "Short term test power: 45 W, 28.000 s, enabled\n\
             Long term test power: 35 W, 28.000 s, enabled\n"
        );
    }

    #[test]
    fn test_write_preserves_untouched_bits() {
        let pre = 0x00A8_1234_00A8_5678;
        let msr = MockMsr::with(&[
            (MSR_PKG_POWER_LIMIT, pre),
            (MSR_RAPL_POWER_UNIT, UNITS),
        ]);
        let (ok, _) = run(&msr, &MSR_ONLY, &request(45, 35), None, true);
        assert!(ok);

        let written = msr.get(MSR_PKG_POWER_LIMIT);
        assert_eq!(
            written & rapl::LIMIT_PRESERVE_MASK,
            pre & rapl::LIMIT_PRESERVE_MASK
        );
        assert_eq!(written & 0x7fff, 35 * 8);
        assert_eq!((written >> 32) & 0x7fff, 45 * 8);
    }

    #[test]
    fn test_write_splices_time_windows() {
        let msr = MockMsr::with(&[
            (MSR_PKG_POWER_LIMIT, 0),
            (MSR_RAPL_POWER_UNIT, UNITS),
        ]);
        let req = PowerLimit {
            short_term: 45,
            long_term: 35,
            short_time_window: 28.0,
            long_time_window: 28.0,
        };
        let (ok, out) = run(&msr, &MSR_ONLY, &req, None, true);
        assert!(ok);
        assert!(out.contains("28.000 s"));

        let written = msr.get(MSR_PKG_POWER_LIMIT);
        assert_eq!((written >> 48) & 0xff, 0xDC);
        assert_eq!((written >> 16) & 0xff, 0xDC);
    }

    #[test]
    fn test_write_clamps_requested_watts() {
        let msr = MockMsr::with(&[
            (MSR_PKG_POWER_LIMIT, 0),
            (MSR_RAPL_POWER_UNIT, UNITS),
        ]);
        let (ok, _) = run(&msr, &MSR_ONLY, &request(10000, -3), None, true);
        assert!(ok);

        let written = msr.get(MSR_PKG_POWER_LIMIT);
        assert_eq!((written >> 32) & 0x7fff, 4095 * 8);
        assert_eq!(written & 0x7fff, 0);
    }

    #[test]
    fn test_locked_limit_warns() {
        let msr = MockMsr::with(&[
            (MSR_PKG_POWER_LIMIT, sample_limit() | (1 << 63)),
            (MSR_RAPL_POWER_UNIT, UNITS),
        ]);
        let (ok, out) = run(&msr, &MSR_ONLY, &request(45, 35), None, false);
        assert!(ok);
        assert!(out.starts_with("Warning: test power limit is locked\n"));
    }

    #[test]
    fn test_no_method_available() {
        let orphan = PowerDomain {
            name: "orphan",
            msr_addr: 0,
            mem_addr: 0,
        };
        let msr = MockMsr::default();
        let (ok, out) = run(&msr, &orphan, &request(45, 35), None, false);
        assert!(!ok);
        assert_eq!(out, "Failed to read orphan power values: No method available\n");
    }

    #[test]
    fn test_read_failure_aborts_domain() {
        let msr = MockMsr {
            fail_reads: vec![MSR_PKG_POWER_LIMIT],
            ..MockMsr::default()
        };
        let (ok, out) = run(&msr, &MSR_ONLY, &request(45, 35), None, true);
        assert!(!ok);
        assert!(out.starts_with("Failed to read test power values: Failed to read MSR 0x610"));
    }

    #[test]
    fn test_memory_only_domain_uses_the_mirror() {
        let mut page = vec![0u8; crate::access::mem::MAP_SIZE];
        page[0x9A0..0x9A8].copy_from_slice(&sample_limit().to_ne_bytes());
        let region = MappedRegion::from_raw(page.as_mut_ptr(), page.len());

        // No limit register in the register file: only the units MSR.
        let msr = MockMsr::with(&[(MSR_RAPL_POWER_UNIT, UNITS)]);
        let (ok, out) = run(&msr, &MEM_ONLY, &request(45, 35), Some(&region), false);
        assert!(ok);
        assert!(out.contains("Short term mirror power: 45 W"));
    }

    #[test]
    fn test_memory_write_lands_in_the_mirror() {
        let mut page = vec![0u8; crate::access::mem::MAP_SIZE];
        let region = MappedRegion::from_raw(page.as_mut_ptr(), page.len());

        let msr = MockMsr::with(&[(MSR_RAPL_POWER_UNIT, UNITS)]);
        let (ok, _) = run(&msr, &MEM_ONLY, &request(45, 35), Some(&region), true);
        assert!(ok);

        let written = region.try_read(0x9A0).unwrap();
        assert_eq!((written >> 32) & 0x7fff, 45 * 8);
        assert_eq!(written & 0x7fff, 35 * 8);
    }

    #[test]
    fn test_memory_fault_reports_segmentation_fault() {
        let region = MappedRegion::from_raw(8 as *mut u8, crate::access::mem::MAP_SIZE);
        let msr = MockMsr::with(&[(MSR_RAPL_POWER_UNIT, UNITS)]);
        let (ok, out) = run(&msr, &MEM_ONLY, &request(45, 35), Some(&region), false);
        assert!(!ok);
        assert_eq!(
            out,
            "Failed to read mirror power values: Segmentation fault\n"
        );
    }

    #[test]
    fn test_dual_path_disagreement_warns_but_continues() {
        let mut page = vec![0u8; crate::access::mem::MAP_SIZE];
        page[0x9A0..0x9A8].copy_from_slice(&(sample_limit() | 1).to_ne_bytes());
        let region = MappedRegion::from_raw(page.as_mut_ptr(), page.len());

        let both = PowerDomain {
            name: "package",
            msr_addr: MSR_PKG_POWER_LIMIT,
            mem_addr: 0xFED1_59A0,
        };
        let msr = MockMsr::with(&[
            (MSR_PKG_POWER_LIMIT, sample_limit()),
            (MSR_RAPL_POWER_UNIT, UNITS),
        ]);
        let (ok, out) = run(&msr, &both, &request(45, 35), Some(&region), false);
        assert!(ok);
        assert!(out.starts_with("Warning: MSR and memory values are not equal\n"));
        assert!(out.contains("Short term package power: 45 W"));
    }

    #[test]
    fn test_dual_path_write_programs_both() {
        let mut page = vec![0u8; crate::access::mem::MAP_SIZE];
        let region = MappedRegion::from_raw(page.as_mut_ptr(), page.len());

        let both = PowerDomain {
            name: "package",
            msr_addr: MSR_PKG_POWER_LIMIT,
            mem_addr: 0xFED1_59A0,
        };
        let msr = MockMsr::with(&[
            (MSR_PKG_POWER_LIMIT, 0),
            (MSR_RAPL_POWER_UNIT, UNITS),
        ]);
        let (ok, _) = run(&msr, &both, &request(45, 35), Some(&region), true);
        assert!(ok);
        assert_eq!(msr.get(MSR_PKG_POWER_LIMIT), region.try_read(0x9A0).unwrap());
    }

    #[test]
    fn test_quiet_mode_skips_value_report() {
        let msr = MockMsr::with(&[
            (MSR_PKG_POWER_LIMIT, sample_limit()),
            (MSR_RAPL_POWER_UNIT, UNITS),
        ]);
        let mut buf = Vec::new();
        let mut reporter = Reporter::new(&mut buf, false);
        let ok = apply_power_limit(&msr, &MSR_ONLY, &request(45, 35), None, true, &mut reporter);
        assert!(ok);
        assert!(buf.is_empty());
    }
}
