use std::fmt;

/// Errors produced while validating, building, encoding or decoding [`crate::Value`]s.
///
/// This is a closed enum: every failure mode the codec can hit is enumerated here rather than
/// boxed behind a generic `dyn Error`, so callers can match on it without downcasting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The signature string itself is malformed (unbalanced containers, unknown type code,
    /// empty element/field list where one is required, ...).
    InvalidSignature(String),
    /// A string-like value (string, object path or signature) contained invalid UTF-8 or an
    /// interior NUL byte.
    InvalidText(String),
    /// An object path didn't satisfy D-Bus's object path grammar.
    InvalidObjectPath(String),
    /// A dictionary was asked to use a non-basic type as its key signature.
    NonBasicDictKey(String),
    /// A `Value` could not be produced from, or written to, the wire for the demanded
    /// signature. Carries the offending signature, per spec.
    ConversionFailed {
        signature: String,
        reason: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSignature(s) => write!(f, "invalid signature `{s}`"),
            Error::InvalidText(s) => write!(f, "invalid text: {s}"),
            Error::InvalidObjectPath(s) => write!(f, "invalid object path `{s}`"),
            Error::NonBasicDictKey(s) => {
                write!(f, "dictionary key signature `{s}` is not a basic type")
            }
            Error::ConversionFailed { signature, reason } => {
                write!(f, "conversion failed for signature `{signature}`: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub(crate) fn conversion(signature: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ConversionFailed {
            signature: signature.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
