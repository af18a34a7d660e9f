use thiserror::Error;

use crate::room::JoinError;

/// Room-admission failures surfaced to the requester as a `*_failed{reason}`
/// reply (spec.md §7). Room state is left unchanged in every case.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("room not found")]
    RoomNotFound,
    #[error("{0}")]
    Join(#[from] JoinError),
}

impl AdmissionError {
    /// The `reason` string sent back on the wire.
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::RoomNotFound => "room not found",
            AdmissionError::Join(JoinError::Started) => "game already started",
            AdmissionError::Join(JoinError::AlreadyInRoom) => "already in room",
        }
    }
}
