use std::fmt::Display;

/// Error returned from composite-core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    pub(crate) kind: ErrorKind,
    pub(crate) message: &'static str,
}

impl Error {
    pub(crate) const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    #[track_caller]
    pub(crate) fn log_error(self) -> Self {
        log::error!("{self}");
        self
    }

    #[track_caller]
    pub(crate) fn log_warn(self) -> Self {
        log::warn!("{self}");
        self
    }

    /// Get the error category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind {
            ErrorKind::InvalidArgs => std::io::ErrorKind::InvalidInput,
            ErrorKind::BufferTooSmall => std::io::ErrorKind::InvalidInput,
            ErrorKind::NoMemory => std::io::ErrorKind::OutOfMemory,
            ErrorKind::Io => std::io::ErrorKind::Other,
            ErrorKind::AlreadyBound => std::io::ErrorKind::AlreadyExists,
            ErrorKind::BadState => std::io::ErrorKind::Other,
            ErrorKind::TimedOut => std::io::ErrorKind::TimedOut,
            ErrorKind::Internal => std::io::ErrorKind::Other,
            ErrorKind::NotSupported => std::io::ErrorKind::Unsupported,
        };
        std::io::Error::new(kind, err)
    }
}

/// Category of error, matching the taxonomy class drivers are expected to match on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Bad ioctl size, unknown configuration number, or alt-setting on an unknown interface.
    InvalidArgs,

    /// Caller-supplied output buffer is too small for the response.
    BufferTooSmall,

    /// Allocation failed during enumeration.
    NoMemory,

    /// Short read while fetching a descriptor.
    Io,

    /// Interface is already claimed by a sibling.
    AlreadyBound,

    /// Registry corruption: a retract was requested for an interface whose
    /// child could not be found despite its status claiming one exists.
    BadState,

    /// A control transfer exceeded its deadline and was cancelled.
    TimedOut,

    /// The VID/PID override table selected a configuration number out of range.
    Internal,

    /// Unknown ioctl operation or unimplemented placeholder protocol method.
    NotSupported,
}

pub(crate) mod messages {
    use super::{Error, ErrorKind};

    pub const fn invalid_args(message: &'static str) -> Error {
        Error::new(ErrorKind::InvalidArgs, message)
    }
    pub const fn buffer_too_small(message: &'static str) -> Error {
        Error::new(ErrorKind::BufferTooSmall, message)
    }
    pub const fn no_memory(message: &'static str) -> Error {
        Error::new(ErrorKind::NoMemory, message)
    }
    pub const fn io(message: &'static str) -> Error {
        Error::new(ErrorKind::Io, message)
    }
    pub const fn already_bound(message: &'static str) -> Error {
        Error::new(ErrorKind::AlreadyBound, message)
    }
    pub const fn bad_state(message: &'static str) -> Error {
        Error::new(ErrorKind::BadState, message)
    }
    pub const fn timed_out(message: &'static str) -> Error {
        Error::new(ErrorKind::TimedOut, message)
    }
    pub const fn internal(message: &'static str) -> Error {
        Error::new(ErrorKind::Internal, message)
    }
    pub const fn not_supported(message: &'static str) -> Error {
        Error::new(ErrorKind::NotSupported, message)
    }
}

