use chrono::{DateTime, Utc};

use crate::model::ids::{CourseId, LessonId, UserId};

/// When a student's competency window for one lesson opened and closed.
///
/// Written by the background competency sync, never interactively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Competency {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub lesson_id: LessonId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_competent: bool,
}
