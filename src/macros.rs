#![allow(unused_macros)]

/// Emits a build warning to both the log facade and a diagnostics collector.
///
/// ```rust, ignore
///  warn_diag!(diagnostics, DiagnosticCategory::Registration, "{} falls back to dynamic registration", name);
/// ```
macro_rules! warn_diag {
    ($diag:expr, $category:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        log::warn!("{}", message);
        $diag.warning($category, message);
    }};
}
