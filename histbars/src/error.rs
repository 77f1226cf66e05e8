//! Types for errors that can occur while reading, transforming, or writing
//! capture data.

use std::io;

use thiserror::Error;

/// An error that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error while reading or writing a file or stream.
    #[error("I/O error: {source:?} while {context}")]
    Io {
        /// The original error.
        #[source]
        source: io::Error,
        /// The context in which the error occurred.
        context: String,
    },
    /// An error while decoding a header or record.
    #[error("decoding error: {0}")]
    Decode(String),
    /// An error while encoding a header, record, or CSV row.
    #[error("encoding error: {0}")]
    Encode(String),
    /// An invalid argument was passed to a function.
    #[error("bad argument `{param_name}`: {desc}")]
    BadArgument {
        /// The name of the invalid parameter.
        param_name: String,
        /// The description of why it was invalid.
        desc: String,
    },
}

/// An alias for a `Result` with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new I/O error with the given `context`.
    pub fn io(source: io::Error, context: impl ToString) -> Self {
        Self::Io {
            source,
            context: context.to_string(),
        }
    }

    /// Creates a new decode error.
    pub fn decode(msg: impl ToString) -> Self {
        Self::Decode(msg.to_string())
    }

    /// Creates a new encode error.
    pub fn encode(msg: impl ToString) -> Self {
        Self::Encode(msg.to_string())
    }

    /// Creates a new bad-argument error.
    pub fn bad_argument(param_name: impl ToString, desc: impl ToString) -> Self {
        Self::BadArgument {
            param_name: param_name.to_string(),
            desc: desc.to_string(),
        }
    }
}

/// Turns a clean end-of-stream into `Ok(None)` while passing through every
/// other kind of I/O error.
pub(crate) fn silence_eof_error<T>(err: io::Error) -> io::Result<Option<T>> {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Ok(None)
    } else {
        Err(err)
    }
}
