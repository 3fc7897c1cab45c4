use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::course::Course;
use crate::model::ids::{CourseId, LessonId, QuizId, TopicId, UserId};

//
// ─── PERCENTAGE ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PercentageError {
    #[error("invalid percentage: {0:?}")]
    Invalid(String),
}

/// Whole-number completion percentage in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(u8);

impl Percentage {
    pub const ZERO: Self = Self(0);
    pub const FULL: Self = Self(100);

    /// Clamps any integer into `0..=100`.
    #[must_use]
    pub fn clamped(value: i64) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Self(value.clamp(0, 100) as u8)
    }

    /// `part / whole` as a percentage rounded half-up to the nearest integer.
    ///
    /// A zero `whole` yields zero.
    #[must_use]
    pub fn from_ratio(part: usize, whole: usize) -> Self {
        if whole == 0 {
            return Self::ZERO;
        }
        let part = part.min(whole) as u128;
        let whole = whole as u128;
        let rounded = (part * 200 + whole) / (whole * 2);
        Self::clamped(i64::try_from(rounded).unwrap_or(100))
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// Absolute difference in points.
    #[must_use]
    pub fn distance(self, other: Self) -> u8 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Percentage {
    type Err = PercentageError;

    /// Accepts `"57"`, `"57%"` and `"57.4"` (rounded).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('%').trim();
        let value: f64 = trimmed
            .parse()
            .map_err(|_| PercentageError::Invalid(s.to_string()))?;
        if !value.is_finite() {
            return Err(PercentageError::Invalid(s.to_string()));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self::clamped(value.round() as i64))
    }
}

//
// ─── STATUS ENUMS ──────────────────────────────────────────────────────────────
//

/// Per-quiz state as cached in the progress details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    #[default]
    NotAttempted,
    Attempting,
    /// Awaiting evaluation.
    Submitted,
    /// Evaluated and sent back for resubmission.
    Returned,
    Passed,
    Failed,
    Overdue,
}

impl QuizStatus {
    #[must_use]
    pub fn is_passed(self) -> bool {
        self == QuizStatus::Passed
    }

    /// Evaluated (or expired) without a satisfactory result.
    #[must_use]
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            QuizStatus::Failed | QuizStatus::Returned | QuizStatus::Overdue
        )
    }

    #[must_use]
    pub fn is_submitted(self) -> bool {
        self == QuizStatus::Submitted
    }

    #[must_use]
    pub fn is_touched(self) -> bool {
        self != QuizStatus::NotAttempted
    }
}

/// Derived state of a lesson or topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    NotStarted,
    InProgress,
    Submitted,
    Failed,
    Completed,
}

//
// ─── DETAILS TREE ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuizProgress {
    pub status: QuizStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopicProgress {
    pub status: NodeStatus,
    #[serde(default)]
    pub marked_passed: bool,
    #[serde(default)]
    pub quizzes: BTreeMap<QuizId, QuizProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LessonProgress {
    pub status: NodeStatus,
    #[serde(default)]
    pub marked_passed: bool,
    #[serde(default)]
    pub topics: BTreeMap<TopicId, TopicProgress>,
}

/// Cached per-item completion state for one student in one course.
///
/// Keyed lesson id → topic id → quiz id. Derived node statuses are refreshed
/// by `aggregator::refresh_statuses`; the tree is never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressDetails {
    #[serde(default)]
    pub lessons: BTreeMap<LessonId, LessonProgress>,
}

impl ProgressDetails {
    /// Zero-initialised tree mirroring the course structure.
    #[must_use]
    pub fn zeroed(course: &Course) -> Self {
        let mut details = Self::default();
        details.align_to(course);
        details
    }

    /// Adds nodes missing for the course and drops nodes the course no longer has.
    pub fn align_to(&mut self, course: &Course) {
        self.lessons
            .retain(|id, _| course.lesson(*id).is_some());
        for lesson in course.lessons() {
            let lp = self.lessons.entry(lesson.id).or_default();
            lp.topics
                .retain(|id, _| lesson.topics.iter().any(|t| t.id == *id));
            for topic in &lesson.topics {
                let tp = lp.topics.entry(topic.id).or_default();
                tp.quizzes
                    .retain(|id, _| topic.quizzes.iter().any(|q| q.id == *id));
                for quiz in &topic.quizzes {
                    tp.quizzes.entry(quiz.id).or_default();
                }
            }
        }
    }

    #[must_use]
    pub fn lesson(&self, id: LessonId) -> Option<&LessonProgress> {
        self.lessons.get(&id)
    }

    #[must_use]
    pub fn quiz(&self, lesson: LessonId, topic: TopicId, quiz: QuizId) -> Option<&QuizProgress> {
        self.lessons
            .get(&lesson)
            .and_then(|l| l.topics.get(&topic))
            .and_then(|t| t.quizzes.get(&quiz))
    }

    /// Records a quiz's state at its position in the course tree.
    ///
    /// Returns `false` when the quiz is not part of the course.
    pub fn set_quiz(
        &mut self,
        course: &Course,
        quiz_id: QuizId,
        status: QuizStatus,
        attempt: Option<u32>,
        at: Option<DateTime<Utc>>,
    ) -> bool {
        let Some((lesson, topic, _)) = course.locate_quiz(quiz_id) else {
            return false;
        };
        let entry = self
            .lessons
            .entry(lesson.id)
            .or_default()
            .topics
            .entry(topic.id)
            .or_default()
            .quizzes
            .entry(quiz_id)
            .or_default();
        entry.status = status;
        entry.attempt = attempt;
        entry.updated_at = at;
        true
    }

    /// Records that the student completed a topic without assessments.
    pub fn complete_topic(&mut self, lesson: LessonId, topic: TopicId) {
        let tp = self
            .lessons
            .entry(lesson)
            .or_default()
            .topics
            .entry(topic)
            .or_default();
        tp.status = NodeStatus::Completed;
    }

    pub fn mark_lesson_passed(&mut self, lesson: LessonId) {
        self.lessons.entry(lesson).or_default().marked_passed = true;
    }

    pub fn mark_topic_passed(&mut self, lesson: LessonId, topic: TopicId) {
        self.lessons
            .entry(lesson)
            .or_default()
            .topics
            .entry(topic)
            .or_default()
            .marked_passed = true;
    }
}

//
// ─── COURSE PROGRESS ROW ───────────────────────────────────────────────────────
//

/// One row per (user, course). `percentage` is a cache derived from `details`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseProgress {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub details: ProgressDetails,
    pub percentage: Percentage,
    pub updated_at: DateTime<Utc>,
}

impl CourseProgress {
    #[must_use]
    pub fn zeroed(user_id: UserId, course: &Course, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            course_id: course.id(),
            details: ProgressDetails::zeroed(course),
            percentage: Percentage::ZERO,
            updated_at: at,
        }
    }
}
