use std::fmt;
use thiserror::Error;

/// HSMS supervision timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Reply timeout
    T3,
    /// Connect separation timeout
    T5,
    /// Control transaction timeout
    T6,
    /// Not selected timeout
    T7,
    /// Network inter-character timeout
    T8,
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Timer::T3 => "T3",
            Timer::T5 => "T5",
            Timer::T6 => "T6",
            Timer::T7 => "T7",
            Timer::T8 => "T8",
        };
        f.write_str(name)
    }
}

/// Main error type for SECS/HSMS operations
#[derive(Error, Debug)]
pub enum SecsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Frame error: {0}")]
    Frame(String),

    #[error("SECS-II decoding error: {0}")]
    Decode(String),

    #[error("SECS-II encoding error: {0}")]
    Encode(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{0} timeout")]
    Timeout(Timer),

    #[error("Rejected by peer: reason {0}")]
    Rejected(u8),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl SecsError {
    /// Whether the error is fatal to the connection it occurred on
    ///
    /// Transport and framing failures, and the T7/T8 supervision timers,
    /// tear the connection down. Codec and state errors are contained to the
    /// message or call that caused them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SecsError::Io(_) | SecsError::Frame(_) | SecsError::Timeout(Timer::T7 | Timer::T8)
        )
    }
}

/// Result type alias for SECS/HSMS operations
pub type SecsResult<T> = Result<T, SecsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SecsError::Frame("short read".into()).is_fatal());
        assert!(SecsError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)).is_fatal());
        assert!(!SecsError::Decode("bad item".into()).is_fatal());
        assert!(!SecsError::InvalidState("not selected".into()).is_fatal());
        assert!(!SecsError::Timeout(Timer::T3).is_fatal());
        assert!(SecsError::Timeout(Timer::T8).is_fatal());
    }

    #[test]
    fn test_timeout_display() {
        assert_eq!(SecsError::Timeout(Timer::T6).to_string(), "T6 timeout");
    }
}
