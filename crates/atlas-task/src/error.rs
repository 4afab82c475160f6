//! Error Types - Task Layer Error Handling
//!
//! Fallible surfaces of task construction and kernel dispatch. Dependency
//! accounting bugs (negative counters, unknown nodes) abort through
//! assertions, matching the no-recovery policy of the engine.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use thiserror::Error;

/// The main error type for task operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// An error bubbled up from the core layer.
    #[error(transparent)]
    Core(#[from] atlas_core::Error),

    /// No kernel version matches the requested device/group/detail.
    #[error("no version for task {task} matches the request")]
    MissingVersion {
        /// Sequential id of the task.
        task: usize,
    },

    /// The device runtime reported a dispatch failure.
    #[error("device error {code} while dispatching task {task}")]
    Device {
        /// Sequential id of the task.
        task: usize,
        /// Device-specific error code.
        code: i32,
    },
}

/// A specialized Result type for task operations.
pub type Result<T> = core::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_convert() {
        let core = atlas_core::Error::InvalidConfig {
            message: "bad".into(),
        };
        let task: TaskError = core.into();
        assert!(task.to_string().contains("bad"));
    }
}
