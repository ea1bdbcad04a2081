use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
use std::net::TcpStream;
use std::result;

use bufstream::IntoInnerError as BufError;
use native_tls::Error as TlsError;
use native_tls::HandshakeError as TlsHandshakeError;

use crate::types::Seq;

/// A convenience wrapper around `Result` for `mailprobe::Error`.
pub type Result<T> = result::Result<T, Error>;

/// A set of errors that can occur while talking to an IMAP server.
#[derive(Debug)]
pub enum Error {
    /// An `io::Error` that occurred while trying to read or write to a network stream.
    Io(IoError),
    /// An error from the `native_tls` library during the TLS handshake.
    TlsHandshake(TlsHandshakeError<TcpStream>),
    /// An error from the `native_tls` library while managing the socket.
    Tls(TlsError),
    /// The connection was terminated unexpectedly.
    ConnectionLost,
    /// A blocking read did not complete within the configured timeout.
    Timeout,
    /// LOGIN was rejected by the server.
    Auth(String),
    /// SELECT was rejected by the server (missing mailbox or access denied).
    Mailbox(String),
    /// A NO response for a command other than LOGIN or SELECT.
    No(String),
    /// A BAD response for a command other than LOGIN or SELECT.
    Bad(String),
    /// Neither `BODY[TEXT]` nor `BODY[]` produced any text for this message.
    EmptyBody(Seq),
    /// Error parsing a server response.
    Parse(ParseError),
    /// Error validating input data before it reaches the network.
    Validate(ValidateError),
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Error::Io(err)
    }
}

impl<T> From<BufError<T>> for Error {
    fn from(err: BufError<T>) -> Error {
        Error::Io(err.into())
    }
}

impl From<TlsHandshakeError<TcpStream>> for Error {
    fn from(err: TlsHandshakeError<TcpStream>) -> Error {
        Error::TlsHandshake(err)
    }
}

impl From<TlsError> for Error {
    fn from(err: TlsError) -> Error {
        Error::Tls(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<ValidateError> for Error {
    fn from(err: ValidateError) -> Error {
        Error::Validate(err)
    }
}

impl Error {
    /// The process exit code this error maps to: 1 for bad input that never
    /// reached the network, 2 for transport and protocol failures.
    pub fn exit_code(&self) -> i32 {
        match *self {
            Error::Validate(_) => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "connection failed: {}", e),
            Error::TlsHandshake(ref e) => write!(f, "TLS handshake failed: {}", e),
            Error::Tls(ref e) => write!(f, "TLS error: {}", e),
            Error::ConnectionLost => f.write_str("connection closed by server"),
            Error::Timeout => f.write_str("timed out waiting for server response"),
            Error::Auth(ref why) => write!(f, "LOGIN failed: {}", why),
            Error::Mailbox(ref why) => write!(f, "SELECT failed: {}", why),
            Error::No(ref why) => write!(f, "command failed (NO): {}", why),
            Error::Bad(ref why) => write!(f, "command rejected (BAD): {}", why),
            Error::EmptyBody(seq) => write!(f, "message {} has no readable body", seq),
            Error::Parse(ref e) => write!(f, "unable to parse server response: {}", e),
            Error::Validate(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            Error::Tls(ref e) => Some(e),
            Error::TlsHandshake(ref e) => Some(e),
            _ => None,
        }
    }
}

/// Failures to make sense of bytes the server sent.
#[derive(Debug)]
pub enum ParseError {
    /// The response did not match the IMAP grammar.
    Invalid(Vec<u8>),
    /// A tagged completion carried a tag this session never issued.
    UnexpectedTag(String),
    /// A STATUS response arrived without the requested attribute.
    MissingStatusAttribute(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::Invalid(ref bytes) => write!(
                f,
                "unexpected response: {}",
                String::from_utf8_lossy(bytes).trim_end()
            ),
            ParseError::UnexpectedTag(ref tag) => write!(f, "unexpected response tag {}", tag),
            ParseError::MissingStatusAttribute(attr) => {
                write!(f, "STATUS response is missing {}", attr)
            }
        }
    }
}

impl StdError for ParseError {}

/// Rejected caller input. These never reach the network.
#[derive(Debug)]
pub enum ValidateError {
    /// A string destined for the wire contained a CR or LF.
    Char(char),
    /// Not a plausible email address.
    Email(String),
    /// Not a `YYYY-MM-DD` date.
    Date(String),
    /// A CSV input file whose header row is not the expected one.
    CsvHeader {
        expected: &'static str,
        found: String,
    },
    /// A CSV row that could not be read or deserialized.
    CsvRow(String),
}

impl fmt::Display for ValidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            // print the character in debug form because the invalid ones are whitespace
            ValidateError::Char(c) => write!(f, "invalid character in input: {:?}", c),
            ValidateError::Email(ref s) => write!(f, "not a valid email address: {}", s),
            ValidateError::Date(ref s) => write!(f, "not a valid YYYY-MM-DD date: {}", s),
            ValidateError::CsvHeader {
                expected,
                ref found,
            } => write!(f, "bad CSV header: expected {:?}, found {:?}", expected, found),
            ValidateError::CsvRow(ref why) => write!(f, "bad CSV row: {}", why),
        }
    }
}

impl StdError for ValidateError {}
