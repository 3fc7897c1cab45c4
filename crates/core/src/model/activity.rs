use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{CourseId, LessonId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown activity kind: {0}")]
pub struct UnknownActivityKind(pub String);

/// Kind of learner activity recorded in the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    LessonStart,
    LessonEnd,
    TopicStart,
    QuizSubmitted,
}

impl ActivityKind {
    /// Log label, e.g. `LESSON START`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::LessonStart => "LESSON START",
            ActivityKind::LessonEnd => "LESSON END",
            ActivityKind::TopicStart => "TOPIC START",
            ActivityKind::QuizSubmitted => "QUIZ SUBMITTED",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = UnknownActivityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LESSON START" => Ok(ActivityKind::LessonStart),
            "LESSON END" => Ok(ActivityKind::LessonEnd),
            "TOPIC START" => Ok(ActivityKind::TopicStart),
            "QUIZ SUBMITTED" => Ok(ActivityKind::QuizSubmitted),
            other => Err(UnknownActivityKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEvent {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub lesson_id: Option<LessonId>,
    pub kind: ActivityKind,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityEvent {
    #[must_use]
    pub fn is_for_lesson(&self, lesson_id: LessonId, kind: ActivityKind) -> bool {
        self.kind == kind && self.lesson_id == Some(lesson_id)
    }
}
