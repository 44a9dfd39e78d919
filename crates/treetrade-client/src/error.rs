use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Every failure a user action can end in. None of them is fatal; the
/// caller shows it and the user may try again.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport or storage failure reported by the backend
    #[error(transparent)]
    Backend(#[from] anyhow::Error),

    #[error("please sign in first")]
    NotSignedIn,

    #[error("you cannot message yourself")]
    SelfMessage,

    #[error("invalid admin key")]
    InvalidAdminKey,

    #[error("not permitted: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("please upload an image file")]
    InvalidImage,

    #[error("failed to upload image: {0}")]
    Upload(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The backend could not be reached or refused the request outright
    Transport,
    /// Rejected locally before any request was made
    Precondition,
    /// The backend refused because of ownership or role
    Authorization,
    /// Image upload failed; progress has been cleared
    Upload,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Backend(_) => ErrorKind::Transport,
            Self::NotSignedIn
            | Self::SelfMessage
            | Self::InvalidAdminKey
            | Self::NotFound(_)
            | Self::Validation(_)
            | Self::InvalidImage => ErrorKind::Precondition,
            Self::Forbidden(_) => ErrorKind::Authorization,
            Self::Upload(_) => ErrorKind::Upload,
        }
    }
}
