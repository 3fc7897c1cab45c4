//! Shared error types for the services crate.

use thiserror::Error;

use lms_core::model::{
    AttemptError, AttemptId, AttemptStatus, CourseId, EnrolmentError, LessonId, NoteError, NoteId,
    ParseIdError, QuizId, TopicId, UserError, UserId, WorkPlacementError, WorkPlacementId,
};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `CourseProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("lesson {lesson} is not part of course {course}")]
    LessonNotFound { course: CourseId, lesson: LessonId },
    #[error("topic {topic} is not part of lesson {lesson}")]
    TopicNotFound { lesson: LessonId, topic: TopicId },
    #[error("topic {0} is completed through its quizzes")]
    TopicAssessed(TopicId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `TrainingPlanService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrainingPlanError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("user {user} is not enrolled in course {course}")]
    NotEnrolled { user: UserId, course: CourseId },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `AdminReportService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportSyncError {
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `LessonDateService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LessonDateError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("lesson {lesson} is not part of course {course}")]
    LessonNotFound { course: CourseId, lesson: LessonId },
    #[error("chunk size must be positive")]
    InvalidChunk,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `EnrolmentService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnrolmentServiceError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("user {user} is not enrolled in course {course}")]
    NotEnrolled { user: UserId, course: CourseId },
    #[error("user {user} is already enrolled in course {course}")]
    AlreadyEnrolled { user: UserId, course: CourseId },
    #[error("email is already registered")]
    EmailTaken,
    #[error(transparent)]
    Enrolment(#[from] EnrolmentError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `LearnerActivityService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ActivityServiceError {
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("user {user} is not enrolled in course {course}")]
    NotEnrolled { user: UserId, course: CourseId },
    #[error("lesson {lesson} is not part of course {course}")]
    LessonNotFound { course: CourseId, lesson: LessonId },
    #[error("quiz {quiz} is not part of course {course}")]
    QuizNotFound { course: CourseId, quiz: QuizId },
    #[error("attempt {0} not found")]
    AttemptNotFound(AttemptId),
    #[error("attempt {0} is still open")]
    AttemptOpen(AttemptId),
    #[error("{0} is not a review verdict")]
    InvalidVerdict(AttemptStatus),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    Progress(#[from] ProgressServiceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `NoteService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NoteServiceError {
    #[error("note {0} not found")]
    NotFound(NoteId),
    #[error(transparent)]
    Note(#[from] NoteError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `WorkPlacementService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkPlacementServiceError {
    #[error("work placement {0} not found")]
    NotFound(WorkPlacementId),
    #[error(transparent)]
    Placement(#[from] WorkPlacementError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ReportExportService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExportError {
    #[error("unknown report column: {0}")]
    UnknownColumn(String),
    #[error("no columns selected")]
    NoColumns,
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors returned by the admin tools, each mapped to an HTTP-like status.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdminToolError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl AdminToolError {
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            AdminToolError::NotFound(_) => 404,
            AdminToolError::BadRequest(_) => 400,
            AdminToolError::Internal(_) => 500,
        }
    }
}

impl From<ParseIdError> for AdminToolError {
    fn from(err: ParseIdError) -> Self {
        AdminToolError::BadRequest(err.to_string())
    }
}

impl From<StorageError> for AdminToolError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => AdminToolError::NotFound(err.to_string()),
            other => AdminToolError::Internal(other.to_string()),
        }
    }
}

impl From<ProgressServiceError> for AdminToolError {
    fn from(err: ProgressServiceError) -> Self {
        match err {
            ProgressServiceError::CourseNotFound(_)
            | ProgressServiceError::LessonNotFound { .. }
            | ProgressServiceError::TopicNotFound { .. } => {
                AdminToolError::NotFound(err.to_string())
            }
            ProgressServiceError::TopicAssessed(_) => AdminToolError::BadRequest(err.to_string()),
            ProgressServiceError::Storage(e) => e.into(),
        }
    }
}

impl From<TrainingPlanError> for AdminToolError {
    fn from(err: TrainingPlanError) -> Self {
        match err {
            TrainingPlanError::CourseNotFound(_) | TrainingPlanError::NotEnrolled { .. } => {
                AdminToolError::NotFound(err.to_string())
            }
            TrainingPlanError::Storage(e) => e.into(),
        }
    }
}

impl From<ReportSyncError> for AdminToolError {
    fn from(err: ReportSyncError) -> Self {
        match err {
            ReportSyncError::UserNotFound(_) | ReportSyncError::CourseNotFound(_) => {
                AdminToolError::NotFound(err.to_string())
            }
            ReportSyncError::Storage(e) => e.into(),
        }
    }
}

impl From<LessonDateError> for AdminToolError {
    fn from(err: LessonDateError) -> Self {
        match err {
            LessonDateError::CourseNotFound(_) | LessonDateError::LessonNotFound { .. } => {
                AdminToolError::NotFound(err.to_string())
            }
            LessonDateError::InvalidChunk => AdminToolError::BadRequest(err.to_string()),
            LessonDateError::Storage(e) => e.into(),
        }
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}
