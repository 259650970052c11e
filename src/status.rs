//! Status codes returned by segment and GC operations
//!
//! Every fallible operation in this crate returns `Result<T, Status>`. The
//! variants map one-to-one onto the result codes the surrounding filesystem
//! uses, so callers can forward them without translation.

use std::fmt;

/// Status code returned by segment manager and GC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Status {
    /// Operation completed successfully
    #[default]
    Ok = 0,
    /// No eligible victim or resource right now; retry later
    Unavailable = 1,
    /// A structural invariant does not hold (GC must yield or failed to evacuate)
    BadState = 2,
    /// I/O error reported by the storage layer
    IoError = 3,
    /// The block device went away mid-operation
    PeerClosed = 4,
    /// Requested node, vnode or page does not exist
    NotFound = 5,
    /// No free section left to allocate from
    NoSpace = 6,
    /// Invalid argument provided
    InvalidArgument = 7,
    /// Segment, section or block index outside the main area
    OutOfRange = 8,
}

impl Status {
    /// Check if the status indicates success
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Check if the status indicates an error
    #[inline]
    pub const fn is_error(&self) -> bool {
        !self.is_ok()
    }

    /// Check if the status is a storage failure that should be propagated verbatim
    #[inline]
    pub const fn is_io(&self) -> bool {
        matches!(self, Status::IoError | Status::PeerClosed)
    }

    /// Get the status as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "Ok",
            Status::Unavailable => "Unavailable",
            Status::BadState => "BadState",
            Status::IoError => "IoError",
            Status::PeerClosed => "PeerClosed",
            Status::NotFound => "NotFound",
            Status::NoSpace => "NoSpace",
            Status::InvalidArgument => "InvalidArgument",
            Status::OutOfRange => "OutOfRange",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::error::Error for Status {}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Status::NotFound,
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
                Status::PeerClosed
            }
            std::io::ErrorKind::InvalidInput => Status::InvalidArgument,
            _ => Status::IoError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_checks() {
        assert!(Status::Ok.is_ok());
        assert!(!Status::Ok.is_error());

        assert!(Status::Unavailable.is_error());
        assert!(Status::BadState.is_error());
        assert!(!Status::BadState.is_io());

        assert!(Status::IoError.is_io());
        assert!(Status::PeerClosed.is_io());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", Status::Ok), "Ok");
        assert_eq!(format!("{}", Status::Unavailable), "Unavailable");
        assert_eq!(format!("{}", Status::BadState), "BadState");
        assert_eq!(format!("{}", Status::NoSpace), "NoSpace");
        assert_eq!(format!("{}", Status::OutOfRange), "OutOfRange");
    }

    #[test]
    fn test_status_default() {
        assert_eq!(Status::default(), Status::Ok);
    }

    #[test]
    fn test_status_from_io_error() {
        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(Status::from(err), Status::PeerClosed);

        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(Status::from(err), Status::IoError);
    }
}
