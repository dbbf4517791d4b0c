//! Logging facade.
//!
//! With the `defmt` feature this is defmt, with `log` it is the log crate, and
//! otherwise the macros vanish, still borrowing their arguments so that values
//! only used for logging do not trigger warnings.

#[cfg(feature = "defmt")]
pub(crate) use defmt::{debug, error, info, trace, warn};

#[cfg(all(feature = "log", not(feature = "defmt")))]
pub(crate) use ::log::{debug, error, info, trace, warn};

#[cfg(not(any(feature = "log", feature = "defmt")))]
mod vanish {
    macro_rules! vanish {
        ($fmt:literal $(, $arg:expr)* $(,)?) => {{
            $( let _ = &$arg; )*
        }};
    }

    pub(crate) use vanish as debug;
    pub(crate) use vanish as error;
    pub(crate) use vanish as info;
    pub(crate) use vanish as trace;
    pub(crate) use vanish as warn;
}

#[cfg(not(any(feature = "log", feature = "defmt")))]
pub(crate) use vanish::{debug, error, info, trace, warn};
