//! Error types returned when a sketch cannot be constructed.

use std::fmt;

/// The kind of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A construction parameter is outside its valid range.
    InvalidArgument,
}

impl ErrorKind {
    /// Returns the name of this kind as a static str.
    pub const fn into_static(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

/// Error returned by the fallible constructors of this crate.
///
/// Only construction can fail: every operation on a built sketch is total.
///
/// # Examples
///
/// ```
/// # use heavy_keeper_rs::{ErrorKind, HeavyKeeper};
/// let err = HeavyKeeper::new(0, 0.9).unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::InvalidArgument);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message of this error.
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return f
                .debug_struct("Error")
                .field("kind", &self.kind)
                .field("message", &self.message)
                .finish();
        }
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::invalid_argument("k must be >= 1");
        assert_eq!(err.to_string(), "InvalidArgument => k must be >= 1");
        assert_eq!(format!("{err:?}"), "InvalidArgument => k must be >= 1");
    }

    #[test]
    fn test_display_without_message() {
        let err = Error::new(ErrorKind::InvalidArgument, "");
        assert_eq!(err.to_string(), "InvalidArgument");
        assert_eq!(err.message(), "");
    }
}
