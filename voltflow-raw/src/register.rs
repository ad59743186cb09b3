//! Generic register abstractions for type-safe MSR programming

/// Trait for register layouts that can be converted to/from raw MSR values
///
/// This trait provides type-safe conversion between structured register
/// layouts and the raw 64-bit values that are written to/read from MSRs.
/// Layouts describe only the architecturally defined fields; reserved bits
/// are dropped on decode, so a read-modify-write that must preserve them
/// goes through the mask-based splice helpers instead.
///
/// # Example
///
/// ```ignore
/// use voltflow_raw::register::RegisterLayout;
///
/// #[derive(Debug, Default)]
/// struct MyControl {
///     enable: bool,
///     threshold: u8,
/// }
///
/// impl RegisterLayout for MyControl {
///     fn to_msr_value(&self) -> u64 {
///         (if self.enable { 1 } else { 0 })
///             | ((self.threshold as u64) << 8)
///     }
///
///     fn from_msr_value(value: u64) -> Self {
///         Self {
///             enable: (value & 1) != 0,
///             threshold: ((value >> 8) & 0xFF) as u8,
///         }
///     }
/// }
/// ```
pub trait RegisterLayout: Sized {
    /// Convert this register layout to a raw MSR value
    fn to_msr_value(&self) -> u64;

    /// Parse a raw MSR value into this register layout
    fn from_msr_value(value: u64) -> Self;
}
