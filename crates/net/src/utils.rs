//! Internal helper macros shared across the crate.

/// Returns early with the given error when the condition does not hold.
///
/// Works like `assert!` but produces an `Err` instead of a panic, which keeps
/// validation checks in decoders and state machines on the `Result` path.
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}

pub(crate) use ensure;
