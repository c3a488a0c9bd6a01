use thiserror::Error;

/// Failure to encode or decode a piece of the DNS wire format.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("message of {0} bytes is shorter than a dns header")]
    TooShort(usize),
    #[error("header must be exactly 12 bytes, got {0}")]
    HeaderLength(usize),
    #[error("unexpected end of data")]
    Truncated,
    #[error("empty label in name {0:?}")]
    EmptyLabel(String),
    #[error("label of {0} bytes is longer than 63")]
    LabelTooLong(usize),
    #[error("name is longer than 255 bytes")]
    NameTooLong,
    #[error("unsupported label type {0:#04x}")]
    LabelType(u8),
    #[error("compression pointers nested deeper than {0} hops")]
    PointerLoop(usize),
    #[error("compression pointer to offset {0} is outside the message")]
    PointerOutOfRange(usize),
    #[error("label is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("record data of {0} bytes does not fit a 16-bit length")]
    DataTooLong(usize),
    #[error("txt entry of {0} bytes is longer than 255")]
    TxtTooLong(usize),
    #[error("{0} bytes follow the sections declared in the header")]
    TrailingData(usize),
}

impl From<std::io::Error> for FormatError {
    fn from(_: std::io::Error) -> Self {
        // cursor reads and writes only fail on running out of bytes
        FormatError::Truncated
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed dns message: {0}")]
    Format(#[from] FormatError),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
