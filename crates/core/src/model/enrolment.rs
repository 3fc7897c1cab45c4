use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::model::course::Course;
use crate::model::ids::{CompanyId, CourseId, EnrolmentId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EnrolmentError {
    #[error("unknown enrolment status: {0}")]
    UnknownStatus(String),

    #[error("course end {ends_at} is not after start {starts_at}")]
    InvalidDateRange {
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    },

    #[error("certificate can only be issued for a completed enrolment")]
    NotCompleted,

    #[error("enrolment is delisted")]
    Delisted,

    #[error("next course {expected} does not match the requested course's successor")]
    NextCourseMismatch { expected: CourseId },
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrolmentStatus {
    Enrolled,
    Completed,
    Delist,
}

impl EnrolmentStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EnrolmentStatus::Enrolled => "ENROLLED",
            EnrolmentStatus::Completed => "COMPLETED",
            EnrolmentStatus::Delist => "DELIST",
        }
    }
}

impl fmt::Display for EnrolmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrolmentStatus {
    type Err = EnrolmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENROLLED" => Ok(EnrolmentStatus::Enrolled),
            "COMPLETED" => Ok(EnrolmentStatus::Completed),
            "DELIST" => Ok(EnrolmentStatus::Delist),
            other => Err(EnrolmentError::UnknownStatus(other.to_string())),
        }
    }
}

//
// ─── ENROLMENT ─────────────────────────────────────────────────────────────────
//

/// A student's registration into one course offering.
///
/// Enrolments are never hard-deleted in normal operation; removal is the soft
/// `Delist` status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentCourseEnrolment {
    pub id: EnrolmentId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub course_start_at: DateTime<Utc>,
    pub course_ends_at: DateTime<Utc>,
    pub status: EnrolmentStatus,
    pub deferred_at: Option<DateTime<Utc>>,
    pub is_chargeable: bool,
    pub registered_by_link: bool,
    pub certificate_issued_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl StudentCourseEnrolment {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status != EnrolmentStatus::Delist
    }

    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.deferred_at.is_some()
    }

    /// Changes status; leaving `Completed` clears any issued certificate.
    pub fn set_status(&mut self, status: EnrolmentStatus, at: DateTime<Utc>) {
        if self.status == status {
            return;
        }
        if status != EnrolmentStatus::Completed {
            self.certificate_issued_at = None;
        }
        self.status = status;
        self.updated_at = at;
    }

    pub fn delist(&mut self, at: DateTime<Utc>) {
        self.set_status(EnrolmentStatus::Delist, at);
    }

    /// Marks the enrolment deferred.
    ///
    /// # Errors
    ///
    /// Returns `EnrolmentError::Delisted` for delisted enrolments.
    pub fn defer(&mut self, at: DateTime<Utc>) -> Result<(), EnrolmentError> {
        if !self.is_active() {
            return Err(EnrolmentError::Delisted);
        }
        if self.deferred_at.is_none() {
            self.deferred_at = Some(at);
            self.updated_at = at;
        }
        Ok(())
    }

    /// Resumes a deferred enrolment, pushing the end date out by the time spent deferred.
    ///
    /// # Errors
    ///
    /// Returns `EnrolmentError::Delisted` for delisted enrolments.
    pub fn resume(&mut self, at: DateTime<Utc>) -> Result<(), EnrolmentError> {
        if !self.is_active() {
            return Err(EnrolmentError::Delisted);
        }
        if let Some(since) = self.deferred_at.take() {
            let paused = at.signed_duration_since(since);
            if paused > Duration::zero() {
                self.course_ends_at += paused;
            }
            self.updated_at = at;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `EnrolmentError::NotCompleted` unless the status is `Completed`.
    pub fn issue_certificate(&mut self, at: DateTime<Utc>) -> Result<(), EnrolmentError> {
        if self.status != EnrolmentStatus::Completed {
            return Err(EnrolmentError::NotCompleted);
        }
        self.certificate_issued_at = Some(at);
        self.updated_at = at;
        Ok(())
    }
}

/// Enrolment awaiting an id from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnrolment {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub course_start_at: DateTime<Utc>,
    pub course_ends_at: DateTime<Utc>,
    pub is_chargeable: bool,
    pub registered_by_link: bool,
    pub created_at: DateTime<Utc>,
}

impl NewEnrolment {
    /// # Errors
    ///
    /// Returns `EnrolmentError::InvalidDateRange` when the end is not after the start.
    pub fn validate(&self) -> Result<(), EnrolmentError> {
        if self.course_ends_at <= self.course_start_at {
            return Err(EnrolmentError::InvalidDateRange {
                starts_at: self.course_start_at,
                ends_at: self.course_ends_at,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn assign_id(self, id: EnrolmentId) -> StudentCourseEnrolment {
        StudentCourseEnrolment {
            id,
            user_id: self.user_id,
            course_id: self.course_id,
            course_start_at: self.course_start_at,
            course_ends_at: self.course_ends_at,
            status: EnrolmentStatus::Enrolled,
            deferred_at: None,
            is_chargeable: self.is_chargeable,
            registered_by_link: self.registered_by_link,
            certificate_issued_at: None,
            updated_at: self.created_at,
        }
    }
}

//
// ─── SIGNUP ────────────────────────────────────────────────────────────────────
//

/// Shareable registration link that enrols a new student into a course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupLink {
    pub key: Uuid,
    pub course_id: CourseId,
    pub company_id: Option<CompanyId>,
    pub leader_id: Option<UserId>,
    pub is_chargeable: bool,
}

impl SignupLink {
    #[must_use]
    pub fn generate(
        course_id: CourseId,
        company_id: Option<CompanyId>,
        leader_id: Option<UserId>,
        is_chargeable: bool,
    ) -> Self {
        Self {
            key: Uuid::new_v4(),
            course_id,
            company_id,
            leader_id,
            is_chargeable,
        }
    }
}

/// Date ranges for the enrolments created by one signup.
///
/// Ranges are half-open: each course runs `[start, start + length_days)` and
/// an auto-registered next course starts exactly where the first one ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrolmentPlan {
    pub entries: Vec<PlannedEnrolment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedEnrolment {
    pub course_id: CourseId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl EnrolmentPlan {
    /// Plans the requested course, plus its successor when the course
    /// auto-registers students into the next course.
    ///
    /// Only one hop is followed: the successor's own flag is ignored.
    ///
    /// # Errors
    ///
    /// Returns `EnrolmentError::NextCourseMismatch` if `next` is not the
    /// successor named by `course`.
    pub fn for_signup(
        course: &Course,
        next: Option<&Course>,
        start: DateTime<Utc>,
    ) -> Result<Self, EnrolmentError> {
        let first_end = start + Duration::days(i64::from(course.length_days()));
        let mut entries = vec![PlannedEnrolment {
            course_id: course.id(),
            starts_at: start,
            ends_at: first_end,
        }];

        let info = course.info();
        if info.auto_register_next_course {
            if let (Some(expected), Some(next)) = (info.next_course_id, next) {
                if next.id() != expected {
                    return Err(EnrolmentError::NextCourseMismatch { expected });
                }
                entries.push(PlannedEnrolment {
                    course_id: next.id(),
                    starts_at: first_end,
                    ends_at: first_end + Duration::days(i64::from(next.length_days())),
                });
            }
        }

        Ok(Self { entries })
    }

    /// Converts the plan into insertable rows for `user_id`.
    #[must_use]
    pub fn into_new_enrolments(
        self,
        user_id: UserId,
        is_chargeable: bool,
        created_at: DateTime<Utc>,
    ) -> Vec<NewEnrolment> {
        self.entries
            .into_iter()
            .map(|e| NewEnrolment {
                user_id,
                course_id: e.course_id,
                course_start_at: e.starts_at,
                course_ends_at: e.ends_at,
                is_chargeable,
                registered_by_link: true,
                created_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::course::fixtures;
    use crate::time::fixed_now;

    fn enrolment(status: EnrolmentStatus) -> StudentCourseEnrolment {
        NewEnrolment {
            user_id: UserId::new(1),
            course_id: CourseId::new(1),
            course_start_at: fixed_now(),
            course_ends_at: fixed_now() + Duration::days(30),
            is_chargeable: true,
            registered_by_link: false,
            created_at: fixed_now(),
        }
        .assign_id(EnrolmentId::new(1))
        .with_status(status)
    }

    impl StudentCourseEnrolment {
        fn with_status(mut self, status: EnrolmentStatus) -> Self {
            self.status = status;
            self
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for s in ["ENROLLED", "COMPLETED", "DELIST"] {
            assert_eq!(s.parse::<EnrolmentStatus>().unwrap().as_str(), s);
        }
        assert!("PAUSED".parse::<EnrolmentStatus>().is_err());
    }

    #[test]
    fn certificate_requires_completion() {
        let mut e = enrolment(EnrolmentStatus::Enrolled);
        assert_eq!(e.issue_certificate(fixed_now()), Err(EnrolmentError::NotCompleted));

        e.set_status(EnrolmentStatus::Completed, fixed_now());
        e.issue_certificate(fixed_now()).unwrap();
        assert!(e.certificate_issued_at.is_some());

        e.set_status(EnrolmentStatus::Enrolled, fixed_now());
        assert!(e.certificate_issued_at.is_none());
    }

    #[test]
    fn delisted_enrolment_cannot_be_deferred() {
        let mut e = enrolment(EnrolmentStatus::Enrolled);
        e.delist(fixed_now());
        assert!(!e.is_active());
        assert_eq!(e.defer(fixed_now()), Err(EnrolmentError::Delisted));
    }

    #[test]
    fn resume_extends_end_date_by_deferral() {
        let mut e = enrolment(EnrolmentStatus::Enrolled);
        let original_end = e.course_ends_at;
        e.defer(fixed_now()).unwrap();
        assert!(e.is_deferred());
        e.resume(fixed_now() + Duration::days(7)).unwrap();
        assert!(!e.is_deferred());
        assert_eq!(e.course_ends_at, original_end + Duration::days(7));
    }

    #[test]
    fn new_enrolment_rejects_inverted_range() {
        let new = NewEnrolment {
            user_id: UserId::new(1),
            course_id: CourseId::new(1),
            course_start_at: fixed_now(),
            course_ends_at: fixed_now(),
            is_chargeable: false,
            registered_by_link: false,
            created_at: fixed_now(),
        };
        assert!(matches!(new.validate(), Err(EnrolmentError::InvalidDateRange { .. })));
    }

    #[test]
    fn signup_plan_without_auto_registration_has_one_entry() {
        let course = fixtures::two_lesson_course(1);
        let plan = EnrolmentPlan::for_signup(&course, None, fixed_now()).unwrap();
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].ends_at, fixed_now() + Duration::days(30));
    }

    #[test]
    fn signup_plan_chains_next_course_contiguously() {
        let mut first = fixtures::info(1, 30);
        first.auto_register_next_course = true;
        first.next_course_id = Some(CourseId::new(2));
        let first = Course::new(first, vec![]).unwrap();
        let mut second = fixtures::info(2, 60);
        second.auto_register_next_course = true;
        second.next_course_id = Some(CourseId::new(3));
        let second = Course::new(second, vec![]).unwrap();

        let plan = EnrolmentPlan::for_signup(&first, Some(&second), fixed_now()).unwrap();
        assert_eq!(plan.entries.len(), 2);
        let (a, b) = (plan.entries[0], plan.entries[1]);
        assert_eq!(a.ends_at, b.starts_at);
        assert!(a.starts_at < a.ends_at && b.starts_at < b.ends_at);
        assert_eq!(b.ends_at - b.starts_at, Duration::days(60));
    }

    #[test]
    fn signup_plan_rejects_wrong_successor() {
        let mut first = fixtures::info(1, 30);
        first.auto_register_next_course = true;
        first.next_course_id = Some(CourseId::new(2));
        let first = Course::new(first, vec![]).unwrap();
        let other = Course::new(fixtures::info(9, 10), vec![]).unwrap();

        let err = EnrolmentPlan::for_signup(&first, Some(&other), fixed_now()).unwrap_err();
        assert_eq!(
            err,
            EnrolmentError::NextCourseMismatch {
                expected: CourseId::new(2)
            }
        );
    }
}
