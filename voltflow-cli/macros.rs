//! Declarative macros to reduce boilerplate across the voltflow codebase

/// Emit one formatted line through a [`crate::Reporter`]
///
/// # Example
/// ```ignore
/// crate::report!(reporter, "Critical offset: -{}°C", offset);
/// ```
#[macro_export]
macro_rules! report {
    ($reporter:expr, $($arg:tt)*) => {
        $reporter.line(format_args!($($arg)*))
    };
}
