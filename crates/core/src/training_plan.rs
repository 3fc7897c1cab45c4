//! Expected-vs-actual completion used for student training plans.
//!
//! Quiz results come from the attempts themselves, not from the cached quiz
//! statuses. Admin overrides and recorded completion of assessment-free nodes
//! come from the progress details, so standard courses always agree with
//! `aggregator::aggregate`. LLN and PTR assessment courses use their own
//! completion rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::aggregator::aggregate;
use crate::model::{
    Course, CourseId, EnrolmentStatus, Percentage, ProgressDetails, QuizAttempt, QuizId,
    QuizStatus, StudentCourseEnrolment, latest_attempts,
};
use crate::time::elapsed_days;

/// Course ids that are assessments rather than training.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingPlanSettings {
    pub lln_course_ids: BTreeSet<CourseId>,
    pub ptr_course_ids: BTreeSet<CourseId>,
}

impl TrainingPlanSettings {
    #[must_use]
    pub fn kind_of(&self, course_id: CourseId) -> PlanKind {
        if self.lln_course_ids.contains(&course_id) {
            PlanKind::Lln
        } else if self.ptr_course_ids.contains(&course_id) {
            PlanKind::Ptr
        } else {
            PlanKind::Standard
        }
    }

    #[must_use]
    pub fn is_excluded(&self, course_id: CourseId) -> bool {
        self.kind_of(course_id) != PlanKind::Standard
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Standard,
    Lln,
    Ptr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub course_id: CourseId,
    pub kind: PlanKind,
    pub actual: Percentage,
    /// Where the student should be by now; `None` when no schedule applies.
    pub expected: Option<Percentage>,
}

impl PlanEntry {
    /// Positive when the student is ahead of schedule.
    #[must_use]
    pub fn variance(&self) -> Option<i16> {
        self.expected
            .map(|e| i16::from(self.actual.value()) - i16::from(e.value()))
    }
}

/// Computes one course's plan entry.
///
/// `attempts` may include other quizzes or courses; only this course's
/// gating quizzes are considered. `recorded` is the stored progress tree, read
/// for overrides and node completions only.
#[must_use]
pub fn plan_entry(
    course: &Course,
    enrolment: &StudentCourseEnrolment,
    attempts: &[QuizAttempt],
    recorded: Option<&ProgressDetails>,
    settings: &TrainingPlanSettings,
    now: DateTime<Utc>,
) -> PlanEntry {
    let kind = settings.kind_of(course.id());
    let latest = latest_attempts(attempts.iter().filter(|a| a.course_id == course.id()));

    let (actual, expected) = match kind {
        PlanKind::Standard => (
            standard_actual(course, &latest, recorded),
            expected_percentage(course, enrolment, now),
        ),
        PlanKind::Lln | PlanKind::Ptr => {
            let handed_in = course
                .gating_quizzes()
                .any(|q| latest.get(&q.id).is_some_and(|a| a.status().is_handed_in()));
            let actual = if handed_in {
                Percentage::FULL
            } else {
                Percentage::ZERO
            };
            (actual, None)
        }
    };

    PlanEntry {
        course_id: course.id(),
        kind,
        actual,
        expected,
    }
}

fn standard_actual(
    course: &Course,
    latest: &HashMap<QuizId, &QuizAttempt>,
    recorded: Option<&ProgressDetails>,
) -> Percentage {
    let mut details = recorded.cloned().unwrap_or_default();
    for topic in details.lessons.values_mut().flat_map(|l| l.topics.values_mut()) {
        topic.quizzes.clear();
    }
    for (quiz_id, attempt) in latest {
        details.set_quiz(
            course,
            *quiz_id,
            QuizStatus::from(attempt.status()),
            Some(attempt.attempt),
            None,
        );
    }
    aggregate(course, &details).percentage
}

/// Schedule curve: days elapsed since the course started over its length.
#[must_use]
pub fn expected_percentage(
    course: &Course,
    enrolment: &StudentCourseEnrolment,
    now: DateTime<Utc>,
) -> Option<Percentage> {
    match enrolment.status {
        EnrolmentStatus::Completed => return Some(Percentage::FULL),
        EnrolmentStatus::Delist => return None,
        EnrolmentStatus::Enrolled => {}
    }
    if enrolment.is_deferred() {
        return None;
    }
    let elapsed = usize::try_from(elapsed_days(enrolment.course_start_at, now)).unwrap_or(usize::MAX);
    let length = usize::try_from(course.length_days()).unwrap_or(usize::MAX);
    Some(Percentage::from_ratio(elapsed, length))
}

/// A student's plan across all of their courses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingPlan {
    pub entries: Vec<PlanEntry>,
    /// Mean actual over standard courses.
    pub overall_actual: Percentage,
    /// Mean expected over standard courses that have a schedule.
    pub overall_expected: Option<Percentage>,
}

impl TrainingPlan {
    #[must_use]
    pub fn build(entries: Vec<PlanEntry>) -> Self {
        let standard: Vec<&PlanEntry> = entries
            .iter()
            .filter(|e| e.kind == PlanKind::Standard)
            .collect();
        let overall_actual = mean(standard.iter().map(|e| e.actual)).unwrap_or_default();
        let overall_expected = mean(standard.iter().filter_map(|e| e.expected));
        Self {
            entries,
            overall_actual,
            overall_expected,
        }
    }
}

fn mean(values: impl Iterator<Item = Percentage>) -> Option<Percentage> {
    let (sum, count) = values.fold((0usize, 0usize), |(s, c), p| (s + usize::from(p.value()), c + 1));
    if count == 0 {
        return None;
    }
    Some(Percentage::from_ratio(sum, count * 100))
}
