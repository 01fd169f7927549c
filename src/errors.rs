//! Error types shared across the crate.

use std::io;

use crate::api::ValueList;
use crate::network::SecurityLevel;

/// The textual identifier form could not be parsed.
#[derive(Fail, Debug, PartialEq)]
#[fail(display = "expected host/plugin[-instance]/type[-instance], got {:?}", _0)]
pub struct InvalidIdentifier(pub String);

/// A value list violates one of the data-model invariants. Emission rejects
/// such a list before any bytes are written.
#[derive(Fail, Debug, PartialEq)]
pub enum ValueListError {
    #[fail(display = "value list contains no values")]
    NoValues,

    #[fail(display = "{} must not be empty", _0)]
    EmptyField(&'static str),

    #[fail(display = "{} contains reserved character {:?}", field, character)]
    ReservedCharacter {
        field: &'static str,
        character: char,
    },

    #[fail(display = "interval must be positive")]
    NonPositiveInterval,

    #[fail(display = "{} data source names for {} values", names, values)]
    DsNameMismatch { names: usize, values: usize },

    #[fail(display = "duplicate data source name {:?}", _0)]
    DuplicateDsName(String),
}

/// Errors produced by the network codec, the client and the server.
#[derive(Fail, Debug)]
pub enum NetworkError {
    /// A malformed part header, string or integer payload. Parsing stops,
    /// the well-formed prefix is still returned.
    #[fail(display = "invalid packet: {}", _0)]
    Invalid(&'static str),

    /// A part the codec knows but cannot represent, such as an ABSOLUTE
    /// value. Only the current value list is lost.
    #[fail(display = "unsupported packet: {}", _0)]
    Unsupported(&'static str),

    /// Appending to the buffer would exceed the datagram budget. Callers
    /// flush and retry; a retry failure means the value list can never fit.
    #[fail(display = "not enough space in buffer: {} bytes needed, {} free", need, free)]
    NotEnoughSpace { need: usize, free: usize },

    /// The envelope names a user the password lookup does not know.
    #[fail(display = "no such user: {:?}", _0)]
    UnknownUser(String),

    /// HMAC or checksum verification failed; the datagram is dropped.
    #[fail(display = "message authentication failed")]
    AuthFailure,

    /// The datagram's envelope is below the server's required minimum.
    #[fail(display = "security level {} below required {}", observed, required)]
    SecurityTooLow {
        observed: SecurityLevel,
        required: SecurityLevel,
    },

    /// The value list was rejected before serialization.
    #[fail(display = "rejected value list: {}", _0)]
    BadValueList(#[cause] ValueListError),

    /// The server's cancellation token fired.
    #[fail(display = "listener canceled")]
    Canceled,

    #[fail(display = "{}", _0)]
    Io(#[cause] io::Error),
}

impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> NetworkError {
        NetworkError::Io(err)
    }
}

impl From<ValueListError> for NetworkError {
    fn from(err: ValueListError) -> NetworkError {
        NetworkError::BadValueList(err)
    }
}

/// A parse failure, carrying every value list decoded before the error so
/// callers can observe the well-formed prefix of a damaged datagram.
#[derive(Fail, Debug)]
#[fail(display = "{}", kind)]
pub struct ParseError {
    pub kind: NetworkError,
    pub value_lists: Vec<ValueList>,
}

impl From<NetworkError> for ParseError {
    fn from(kind: NetworkError) -> ParseError {
        ParseError {
            kind,
            value_lists: Vec::new(),
        }
    }
}
