use thiserror::Error;

use crate::store::StorageError;

pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{resource} not found")]
    NotFound { resource: &'static str },
    #[error("You are already part of this offer")]
    AlreadyMember,
    #[error("Offer is full")]
    Full,
    #[error("You are not part of this offer")]
    NotMember,
    #[error("Creators must delete their offers instead of leaving them")]
    ForbiddenCreatorLeave,
    #[error("You can only take down offers you created")]
    Forbidden,
    #[error("Join the offer to chat")]
    Unauthorized,
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error(transparent)]
    Storage(StorageError),
}

/// The coarse class of a [CoordinationError], used to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Conflict,
    Forbidden,
    Internal,
}

impl CoordinationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::EmptyMessage => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyMember | Self::Full | Self::NotMember => ErrorKind::Conflict,
            Self::Forbidden | Self::ForbiddenCreatorLeave | Self::Unauthorized => {
                ErrorKind::Forbidden
            }
            Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

impl From<StorageError> for CoordinationError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound {
                resource,
                identifier: _,
            } => Self::NotFound { resource },
            e => Self::Storage(e),
        }
    }
}
