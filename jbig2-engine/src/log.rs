//! Diagnostics. With the `logging` feature the macros below forward to the
//! `log` crate; without it they only borrow their arguments.

#[cfg(not(feature = "logging"))]
macro_rules! discard {
    ($($arg:expr),*) => {
        { $(let _ = &$arg;)* }
    };
}

/// Decoding progress: pages, segments and dictionaries.
macro_rules! ldebug {
    ($fmt:literal $(, $($arg:expr),* $(,)?)?) => {
        #[cfg(feature = "logging")]
        ::log::debug!(target: "jbig2_engine", $fmt $(, $($arg),*)?);
        #[cfg(not(feature = "logging"))]
        discard!($($($arg),*)?);
    };
}

/// Per-region details.
macro_rules! ltrace {
    ($fmt:literal $(, $($arg:expr),* $(,)?)?) => {
        #[cfg(feature = "logging")]
        ::log::trace!(target: "jbig2_engine", $fmt $(, $($arg),*)?);
        #[cfg(not(feature = "logging"))]
        discard!($($($arg),*)?);
    };
}

/// Inconsistencies the decoder worked around.
macro_rules! lwarn {
    ($fmt:literal $(, $($arg:expr),* $(,)?)?) => {
        #[cfg(feature = "logging")]
        ::log::warn!(target: "jbig2_engine", $fmt $(, $($arg),*)?);
        #[cfg(not(feature = "logging"))]
        discard!($($($arg),*)?);
    };
}
