//! Error types for procsim
//!
//! A single error enum shared by the memory manager, the scheduler, the
//! reporting facade and the command console.

use thiserror::Error;

/// Result type for simulator operations
pub type SimResult<T> = Result<T, SimError>;

/// Simulator error types
#[derive(Debug, Error)]
pub enum SimError {
    // ========== Configuration Errors ==========

    /// Quantum must be a positive instruction count
    #[error("Invalid quantum: {0} (must be > 0)")]
    InvalidQuantum(i64),

    /// Instruction bounds are inverted
    #[error("Invalid instruction bounds: min-ins {min} > max-ins {max}")]
    InvertedInstructionBounds { min: i64, max: i64 },

    /// Instruction count that no process can have
    #[error("Invalid instruction count: {0} (must be > 0)")]
    InvalidInstructionCount(i64),

    /// Core count must be positive
    #[error("Invalid core count: {0} (must be > 0)")]
    InvalidCoreCount(i64),

    /// Frame size of zero
    #[error("Invalid frame size: mem-per-frame must be > 0")]
    InvalidFrameSize,

    /// Per-process memory bounds are inverted
    #[error("Invalid memory bounds: min-mem-per-proc {min} > max-mem-per-proc {max}")]
    InvertedMemoryBounds { min: u64, max: u64 },

    /// Configuration file could not be understood
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Memory Errors ==========

    /// Frame index past the end of the frame table
    #[error("Frame out of range: {0}")]
    FrameOutOfRange(usize),

    /// Frame released twice
    #[error("Double free of frame {0}")]
    DoubleFree(usize),

    /// Accounting invariant broken
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),

    // ========== Process Errors ==========

    /// No process with that name or id
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    /// Name already taken
    #[error("Process already exists: {0}")]
    ProcessExists(String),

    // ========== Command Errors ==========

    /// Command issued before `initialize`
    #[error("Not initialized: type 'initialize' first")]
    NotInitialized,

    /// Unrecognized command
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Command is missing an argument
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    // ========== I/O Errors ==========

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Internal Errors ==========

    /// Worker thread failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SimError {
    /// Errors that must abort scheduler construction
    pub fn is_fatal_config(&self) -> bool {
        matches!(self,
            SimError::InvalidQuantum(_) |
            SimError::InvertedInstructionBounds { .. } |
            SimError::InvalidInstructionCount(_) |
            SimError::InvalidCoreCount(_) |
            SimError::InvalidFrameSize |
            SimError::InvertedMemoryBounds { .. }
        )
    }

    /// Errors reported to the user while the command loop keeps going
    pub fn is_user_error(&self) -> bool {
        matches!(self,
            SimError::NotInitialized |
            SimError::UnknownCommand(_) |
            SimError::MissingArgument(_) |
            SimError::ProcessNotFound(_) |
            SimError::ProcessExists(_) |
            SimError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::InvalidQuantum(0);
        assert_eq!(err.to_string(), "Invalid quantum: 0 (must be > 0)");

        let err = SimError::InvertedInstructionBounds { min: 10, max: 2 };
        assert_eq!(err.to_string(), "Invalid instruction bounds: min-ins 10 > max-ins 2");
    }

    #[test]
    fn test_is_fatal_config() {
        assert!(SimError::InvalidQuantum(-1).is_fatal_config());
        assert!(SimError::InvalidFrameSize.is_fatal_config());
        assert!(!SimError::NotInitialized.is_fatal_config());
    }

    #[test]
    fn test_is_user_error() {
        assert!(SimError::ProcessNotFound("p9".into()).is_user_error());
        assert!(!SimError::DoubleFree(3).is_user_error());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SimError = io.into();
        assert!(matches!(err, SimError::Io(_)));
        assert!(err.is_user_error());
    }
}
