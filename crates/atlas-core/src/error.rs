//! Error Types - Atlas Core Error Handling
//!
//! Fallible surfaces of the middle-end: configuration and pattern support.
//! Structural invariant violations (graph cycles, negative dependency
//! counters) are programming errors and abort through assertions instead.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use thiserror::Error;

use crate::pattern::Pattern;

/// The main error type for Atlas core operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A configuration option holds an unusable value.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        message: String,
    },

    /// A cluster carries a pattern combination no task kind implements.
    #[error("unsupported pattern combination: {pattern}")]
    UnsupportedPattern {
        /// The offending pattern.
        pattern: Pattern,
    },
}

/// A specialized Result type for Atlas core operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnsupportedPattern {
            pattern: Pattern::SPREAD,
        };
        assert!(err.to_string().contains("Spread"));
    }
}
