//! Macros for building and returning [`crate::error::TapsError`] values.

/// Creates a [`crate::error::TapsError`] from an error kind, a static description and an
/// optional detail.
#[macro_export]
macro_rules! taps_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::TapsError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::TapsError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early from the current function with a [`crate::error::TapsError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::taps_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::taps_error!($kind, $desc, $detail))
    };
}
