//! Utility macros and functions for the HTTP crate.
//!
//! This module provides helper macros that are used internally by the codec
//! and the correlation layers.

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// The parsers use it to bail out as soon as a line is known to be truncated
/// or malformed.
///
/// # Arguments
///
/// * `$predicate` - A boolean expression that should evaluate to true
/// * `$error` - The error value to return if the predicate is false
///
/// # Example
///
/// ```ignore
/// ensure!(!name.is_empty(), Incomplete::Invalid);
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
