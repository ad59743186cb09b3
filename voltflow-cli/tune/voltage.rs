//! Voltage-plane offset applier

use voltflow_raw::voltage::{self, MSR_OC_MAILBOX};

use crate::access::MsrIo;
use crate::config::VoltagePlane;
use crate::error::{Result, VoltflowError};
use crate::report::Reporter;

/// Program (or just read back) every configured voltage plane.
///
/// Planes are independent: a failing plane is reported and the rest are
/// still attempted. Returns whether every plane succeeded.
pub fn apply_voltage_offsets(
    msr: &dyn MsrIo,
    planes: &[VoltagePlane],
    write: bool,
    reporter: &mut Reporter<'_>,
) -> bool {
    reporter.begin_section();

    let mut success = true;
    for plane in planes {
        match tune_plane(msr, plane, write) {
            Ok(millivolts) => {
                crate::report!(reporter, "{} ({}): -{:.2} mV", plane.title, plane.index, millivolts);
            }
            Err(e) => {
                success = false;
                crate::report!(reporter, "{} ({}): {}", plane.title, plane.index, e);
            }
        }
    }
    success
}

/// One mailbox transaction sequence: optional offset write, then a
/// read-request write selecting the plane, then the answer read. When
/// writing, the answer's low 32 bits must equal the written data word.
fn tune_plane(msr: &dyn MsrIo, plane: &VoltagePlane, write: bool) -> Result<f64> {
    let request = voltage::write_request(plane.index, voltage::encode_offset(plane.value));

    if write {
        msr.write(MSR_OC_MAILBOX, request)?;
    }
    msr.write(MSR_OC_MAILBOX, voltage::read_request(plane.index))?;
    let answer = msr.read(MSR_OC_MAILBOX)?;

    if write && (answer & 0xffff_ffff) != (request & 0xffff_ffff) {
        return Err(VoltflowError::ValueMismatch);
    }
    Ok(voltage::decode_offset(answer))
}
