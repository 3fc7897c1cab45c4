//! Start and end dates of a student's lesson, derived from the activity log.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::model::{ActivityEvent, ActivityKind, LessonId, StudentCourseEnrolment};

/// Which fallback produced a lesson's start date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartSource {
    Activity,
    Enrolment,
    Now,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LessonDates {
    pub start: DateTime<FixedOffset>,
    pub end: Option<DateTime<FixedOffset>>,
    pub start_source: StartSource,
}

impl LessonDates {
    #[must_use]
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.with_timezone(&Utc)
    }

    #[must_use]
    pub fn end_utc(&self) -> Option<DateTime<Utc>> {
        self.end.map(|e| e.with_timezone(&Utc))
    }
}

/// Resolves lesson dates for one (student, lesson).
///
/// Start is the earliest `LESSON START` event for the lesson, else the
/// enrolment's `course_start_at`, else `now`. End is the latest `LESSON END`
/// event that is not earlier than the start. Events for other lessons are
/// ignored, so callers can pass a student's whole log.
#[must_use]
pub fn resolve_lesson_dates(
    enrolment: Option<&StudentCourseEnrolment>,
    lesson_id: LessonId,
    events: &[ActivityEvent],
    tz: FixedOffset,
    now: DateTime<Utc>,
) -> LessonDates {
    let earliest_start = events
        .iter()
        .filter(|e| e.is_for_lesson(lesson_id, ActivityKind::LessonStart))
        .map(|e| e.occurred_at)
        .min();

    let (start, start_source) = match (earliest_start, enrolment) {
        (Some(at), _) => (at, StartSource::Activity),
        (None, Some(enrolment)) => (enrolment.course_start_at, StartSource::Enrolment),
        (None, None) => (now, StartSource::Now),
    };

    let end = events
        .iter()
        .filter(|e| e.is_for_lesson(lesson_id, ActivityKind::LessonEnd))
        .map(|e| e.occurred_at)
        .filter(|at| *at >= start)
        .max();

    LessonDates {
        start: start.with_timezone(&tz),
        end: end.map(|e| e.with_timezone(&tz)),
        start_source,
    }
}
