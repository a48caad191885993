
use core::fmt;

/// Reconnaissance engine errors, tagged at the point of origin
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Mode switch or channel set failed after exhausting fallbacks
    RadioUnavailable(String),

    /// Frame stream terminated unexpectedly
    FrameSourceLost(String),

    /// Classifier rejected a frame
    MalformedFrame,

    /// Capture deadline reached without completion
    CaptureTimeout,

    /// Command arrived while a state transition is in flight
    Busy,

    /// Capture start requested without a prior target
    NoTarget,

    /// Unknown operation mode
    InvalidMode(String),

    /// Capture file write failed
    PersistenceFailure(String),

    /// Wrapper for unhandled I/O errors
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RadioUnavailable(s) => write!(f, "radio unavailable: {}", s),
            Error::FrameSourceLost(s) => write!(f, "frame source lost: {}", s),
            Error::MalformedFrame => write!(f, "malformed frame"),
            Error::CaptureTimeout => write!(f, "capture timeout"),
            Error::Busy => write!(f, "transition in flight"),
            Error::NoTarget => write!(f, "no capture target set"),
            Error::InvalidMode(s) => write!(f, "invalid mode: {}", s),
            Error::PersistenceFailure(s) => write!(f, "persistence failure: {}", s),
            Error::Io(s) => write!(f, "io error: {}", s),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
