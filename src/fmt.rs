//! Logging macros.
//!
//! These forward to `defmt` when the `use-defmt` feature is enabled. Without it they expand to
//! nothing, but still borrow their arguments so that values only used for logging don't trigger
//! unused-variable warnings.
#![macro_use]
#![allow(unused_macros)]

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "use-defmt")]
            ::defmt::trace!($s $(, $x)*);
            #[cfg(not(feature = "use-defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "use-defmt")]
            ::defmt::debug!($s $(, $x)*);
            #[cfg(not(feature = "use-defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "use-defmt")]
            ::defmt::info!($s $(, $x)*);
            #[cfg(not(feature = "use-defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "use-defmt")]
            ::defmt::warn!($s $(, $x)*);
            #[cfg(not(feature = "use-defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "use-defmt")]
            ::defmt::error!($s $(, $x)*);
            #[cfg(not(feature = "use-defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}
