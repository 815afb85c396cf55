use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of a submitted event, delivered through the response channel.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[error("success")]
    Success,
    #[error("object not found")]
    NotFound,
    #[error("object already exists")]
    AlreadyExists,
    #[error("parent not found")]
    ParentNotFound,
    #[error("parent differs")]
    ParentDiffers,
    #[error("ports have mismatched parent patches")]
    ParentPatchDifferent,
    #[error("port not found")]
    PortNotFound,
    #[error("parents not found")]
    ParentsNotFound,
    #[error("direction mismatch")]
    DirectionMismatch,
    #[error("type mismatch")]
    TypeMismatch,
    #[error("already connected")]
    AlreadyConnected,
    #[error("invalid parent path")]
    InvalidParentPath,
    #[error("invalid polyphony")]
    InvalidPoly,
    #[error("bad value type")]
    BadValueType,
    #[error("bad object type")]
    BadObjectType,
    #[error("insufficient space")]
    NoSpace,
    #[error("internal error")]
    Internal,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}
