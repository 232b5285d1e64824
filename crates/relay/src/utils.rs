//! Small helpers shared by the relay crate.

/// Returns early with `Err($error)` when `$predicate` does not hold.
///
/// Works like `assert!` but for validation paths that must not panic, e.g.
///
/// ```ignore
/// ensure!(headers.len() <= MAX_HEADER_NUM, ParseError::too_many_headers(MAX_HEADER_NUM));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
