mod activity;
mod attempt;
mod competency;
pub mod course;
mod enrolment;
mod ids;
mod note;
mod placement;
mod progress;
mod report;
mod user;

pub use ids::{
    AttemptId, CompanyId, CourseId, EnrolmentId, LessonId, NoteId, ParseIdError, QuizId, TopicId,
    UserId, WorkPlacementId, parse_id_list,
};

pub use activity::{ActivityEvent, ActivityKind, UnknownActivityKind};
pub use attempt::{AttemptError, AttemptStatus, QuizAttempt, SystemResult, latest_attempts};
pub use competency::Competency;
pub use course::{Course, CourseError, CourseInfo, Lesson, Quiz, Topic};
pub use enrolment::{
    EnrolmentError, EnrolmentPlan, EnrolmentStatus, NewEnrolment, PlannedEnrolment, SignupLink,
    StudentCourseEnrolment,
};
pub use note::{MAX_PINNED_NOTES, Note, NoteError, NoteSubject, PinAction, PinLogEntry};
pub use placement::{FieldChange, WorkPlacement, WorkPlacementError, WorkPlacementUpdate};
pub use progress::{
    CourseProgress, LessonProgress, NodeStatus, Percentage, PercentageError, ProgressDetails,
    QuizProgress, QuizStatus, TopicProgress,
};
pub use report::{AdminReport, ReportSources};
pub use user::{Company, Role, StudentAssignment, User, UserError};
