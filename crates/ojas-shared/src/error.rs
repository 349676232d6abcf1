use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Identifier must not be empty")]
    Empty,

    #[error("Identifier contains the conversation separator: {0}")]
    ContainsSeparator(String),

    #[error("Malformed conversation id: {0}")]
    MalformedConversation(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Malformed session token")]
    Malformed,

    #[error("Invalid session token signature")]
    InvalidSignature,

    #[error("Session token expired")]
    Expired,

    #[error("Session lifetime overflows the supported date range")]
    ExpiryOutOfRange,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid relay frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),
}
