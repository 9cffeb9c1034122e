use std::array::TryFromSliceError;

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
#[derive(Debug)]
pub enum Error {
    /// Malformed or corrupt wire data. The String contains the reason.
    ProtocolError(String),
    /// A command was sent but no acknowledgement arrived within the deadline.
    AckTimeout,
    /// The drone session is shutting down or already shut down.
    Disconnected,
    /// A query was acknowledged but the expected value is still missing.
    NotAvailable,
    /// Socket setup or I/O error.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ProtocolError(reason) => write!(f, "protocol error: {}", reason),
            Error::AckTimeout => write!(f, "timed out waiting for command acknowledgement"),
            Error::Disconnected => write!(f, "drone session is shut down"),
            Error::NotAvailable => write!(f, "value not available"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<TryFromSliceError> for Error {
    fn from(e: TryFromSliceError) -> Self {
        Self::ProtocolError(format!("{:?}", e))
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}
