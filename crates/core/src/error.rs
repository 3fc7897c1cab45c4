use thiserror::Error;

use crate::model::{
    AttemptError, CourseError, EnrolmentError, NoteError, ParseIdError, PercentageError,
    UserError, WorkPlacementError,
};

/// Any domain validation failure raised by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Enrolment(#[from] EnrolmentError),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    Percentage(#[from] PercentageError),
    #[error(transparent)]
    Note(#[from] NoteError),
    #[error(transparent)]
    WorkPlacement(#[from] WorkPlacementError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}
