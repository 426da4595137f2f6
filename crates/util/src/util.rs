//! Shared utilities for Nexus.

/// Panic in debug builds, log error with backtrace in release.
///
/// Use for "this shouldn't happen" invariants that shouldn't take down
/// the running workspace in production.
#[macro_export]
macro_rules! debug_panic {
    ( $($fmt_arg:tt)* ) => {
        if cfg!(debug_assertions) {
            panic!( $($fmt_arg)* );
        } else {
            let backtrace = std::backtrace::Backtrace::capture();
            tracing::error!("{}\n{:?}", format_args!($($fmt_arg)*), backtrace);
        }
    };
}

/// Log-and-continue for results whose failure is recoverable.
///
/// Persistence and process cleanup failures are reported through `tracing`
/// instead of being propagated to callers.
pub trait ResultExt<T> {
    /// Log the error at `warn` level and convert to `Option`.
    fn log_err(self) -> Option<T>;

    /// Like [`ResultExt::log_err`], prefixing the message with `context`.
    fn log_err_with(self, context: &str) -> Option<T>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                tracing::warn!("{}:{}: {}", caller.file(), caller.line(), error);
                None
            }
        }
    }

    fn log_err_with(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!("{}: {}", context, error);
                None
            }
        }
    }
}
