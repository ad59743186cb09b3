//! Thermal-offset applier

use voltflow_raw::thermal::{self, MSR_TEMPERATURE_TARGET};

use crate::access::MsrIo;
use crate::error::Result;
use crate::report::Reporter;

/// Program (and/or report) the critical-temperature offset.
///
/// The offset magnitude is clamped to the 6-bit field; there is no
/// read-back verification. A failed re-read during reporting is reported
/// on its own and does not undo a successful write.
pub fn apply_thermal_offset(
    msr: &dyn MsrIo,
    degrees: i32,
    write: bool,
    reporter: &mut Reporter<'_>,
) -> bool {
    reporter.begin_section();

    if write {
        if let Err(e) = write_offset(msr, degrees) {
            crate::report!(reporter, "Failed to write temperature offset: {}", e);
            return false;
        }
    }

    if reporter.values() {
        match msr.read(MSR_TEMPERATURE_TARGET) {
            Ok(value) => {
                crate::report!(reporter, "Critical offset: -{}°C", thermal::tcc_offset(value));
            }
            Err(e) => {
                crate::report!(reporter, "Failed to read temperature offset: {}", e);
            }
        }
    }
    true
}

fn write_offset(msr: &dyn MsrIo, degrees: i32) -> Result<()> {
    let current = msr.read(MSR_TEMPERATURE_TARGET)?;
    let value = thermal::splice_tcc_offset(current, u64::from(degrees.unsigned_abs()));
    msr.write(MSR_TEMPERATURE_TARGET, value)
}
