use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

/// Errors a session handler can produce. Every variant carries, implicitly via
/// `ServerError::code`, the wire status line a failing transaction should reply with.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("line exceeds the maximum frame length")]
    LineTooLong,

    #[error("payload body exceeds the maximum frame length")]
    PayloadTooLong,

    #[error("malformed command: {0}")]
    Malformed(String),

    #[error("invalid parameter")]
    InvalidParameter,

    #[error("unknown identity")]
    UnknownIdentity,

    #[error("command not valid in the current session state")]
    UnexpectedState,

    #[error("authentication failed")]
    AuthFailed,

    #[error("feature not implemented")]
    NotAllowed,

    #[error("malformed credential digest")]
    BadDigestFormat,

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// The numeric wire status code a client-visible error line should carry.
    pub fn code(&self) -> u32 {
        match self {
            ServerError::InvalidParameter | ServerError::Malformed(_) | ServerError::LineTooLong | ServerError::PayloadTooLong => 201,
            ServerError::UnknownIdentity => 205,
            ServerError::UnexpectedState => 715,
            ServerError::AuthFailed => 911,
            ServerError::NotAllowed => 913,
            ServerError::BadDigestFormat => 928,
            ServerError::Store(_) | ServerError::Io(_) => 500,
        }
    }

    /// Whether the connection must be closed after this error is reported, as opposed to
    /// the session simply remaining where it was.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServerError::LineTooLong | ServerError::PayloadTooLong | ServerError::Io(_)
        )
    }
}
