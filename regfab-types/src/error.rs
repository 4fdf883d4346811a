//! Workspace-wide error type (SPEC_FULL.md §7, §12).

use std::fmt;

/// Precondition violations attributable to the caller. Not recoverable by the
/// core; the caller has to fix the offending code.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LogicError {
    #[error("unknown register: '{path}'")]
    UnknownRegister { path: String },

    #[error("register '{path}' does not support access mode {mode}")]
    UnsupportedAccessMode { path: String, mode: String },

    #[error("'{path}' is write-only and cannot be read")]
    WriteOnly { path: String },

    #[error("'{path}' is read-only and cannot be written")]
    ReadOnly { path: String },

    #[error("misaligned address: {address:#x} is not a multiple of {required}")]
    MisalignedAddress { address: u64, required: u64 },

    #[error("invalid descriptor '{descriptor}': {message}")]
    DescriptorParse { descriptor: String, message: String },

    #[error("{path}:{line}: {message}")]
    MapFileParse { path: String, line: usize, message: String },

    #[error("cannot create a scalar accessor for multichannel register '{path}' ({channels} channels)")]
    NotScalar { path: String, channels: usize },

    #[error("register '{path}' is Void and cannot be used with a non-Void accessor")]
    NotVoid { path: String },

    #[error("invalid fixed-point parameters: {message}")]
    InvalidFixedPoint { message: String },

    #[error("{0}")]
    Other(String),
}

/// Environmental failures: transport I/O, timeouts, protocol mismatches,
/// exhaustion of a shared resource. Classified as an "active exception" on
/// the owning backend until a successful `open()` clears it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("peer is stale or unreachable: {0}")]
    StalePeer(String),

    #[error("shared resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("protocol version mismatch: {0}")]
    ProtocolVersion(String),

    #[error("failed to arm interrupt: {0}")]
    InterruptArming(String),

    #[error("device is in an exception state: {0}")]
    ActiveException(String),

    #[error("operation was interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Io(e.to_string())
    }
}

/// The single public error type used throughout the workspace.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegisterAccessError {
    #[error(transparent)]
    Logic(#[from] LogicError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl RegisterAccessError {
    pub fn is_logic(&self) -> bool {
        matches!(self, RegisterAccessError::Logic(_))
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, RegisterAccessError::Runtime(_))
    }

    pub fn logic(message: impl fmt::Display) -> Self {
        RegisterAccessError::Logic(LogicError::Other(message.to_string()))
    }

    pub fn runtime(message: impl fmt::Display) -> Self {
        RegisterAccessError::Runtime(RuntimeError::Other(message.to_string()))
    }
}

impl From<std::io::Error> for RegisterAccessError {
    fn from(e: std::io::Error) -> Self {
        RegisterAccessError::Runtime(RuntimeError::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        let e: RegisterAccessError = LogicError::ReadOnly { path: "/x".into() }.into();
        assert!(e.is_logic());
        assert!(!e.is_runtime());

        let e: RegisterAccessError = RuntimeError::Timeout(std::time::Duration::from_secs(1)).into();
        assert!(e.is_runtime());
    }
}
