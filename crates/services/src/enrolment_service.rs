use std::sync::Arc;

use chrono::{DateTime, Utc};
use lms_core::model::{
    Course, CourseId, EnrolmentPlan, EnrolmentStatus, NewEnrolment,
    ProgressDetails, Role, SignupLink, StudentCourseEnrolment, UserId,
};
use storage::repository::{
    AssignmentRecord, CourseRepository, EnrolmentRepository, NewUserRecord, SignupOutcome,
    SignupRecord, StorageError, UserRepository,
};
use tracing::{info, warn};

use crate::Clock;
use crate::admin_report_service::AdminReportService;
use crate::error::EnrolmentServiceError;

/// Details a prospective student enters on the signup form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Creates and mutates enrolments, keeping progress rows and reports aligned.
#[derive(Clone)]
pub struct EnrolmentService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    users: Arc<dyn UserRepository>,
    enrolments: Arc<dyn EnrolmentRepository>,
    reports: Arc<AdminReportService>,
}

impl EnrolmentService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        users: Arc<dyn UserRepository>,
        enrolments: Arc<dyn EnrolmentRepository>,
        reports: Arc<AdminReportService>,
    ) -> Self {
        Self {
            clock,
            courses,
            users,
            enrolments,
            reports,
        }
    }

    async fn course(&self, course_id: CourseId) -> Result<Course, EnrolmentServiceError> {
        self.courses
            .get_course(course_id)
            .await?
            .ok_or(EnrolmentServiceError::CourseNotFound(course_id))
    }

    /// Registers a new student through a signup link.
    ///
    /// The student, their enrolments (the link's course plus its auto-registered
    /// successor) and zeroed progress rows are committed as one unit. Report
    /// rows are synced afterwards.
    ///
    /// # Errors
    ///
    /// Returns `EnrolmentServiceError::User` for invalid details, `EmailTaken`
    /// for a registered email, `CourseNotFound` for a missing course or
    /// successor. Nothing is written on error.
    pub async fn signup(
        &self,
        link: &SignupLink,
        student: NewStudent,
    ) -> Result<SignupOutcome, EnrolmentServiceError> {
        let now = self.clock.now();
        let course = self.course(link.course_id).await?;
        let next = match course.info().next_course_id {
            Some(next_id) if course.info().auto_register_next_course => {
                Some(self.course(next_id).await?)
            }
            _ => None,
        };
        let plan = EnrolmentPlan::for_signup(&course, next.as_ref(), now)?;

        let record = NewUserRecord {
            first_name: student.first_name.trim().to_string(),
            last_name: student.last_name.trim().to_string(),
            email: student.email.trim().to_lowercase(),
            role: Role::Student,
            company_id: link.company_id,
            is_active: true,
        };
        record.clone().into_user(UserId::new(0)).validate()?;

        let initial_progress = std::iter::once(&course)
            .chain(next.as_ref())
            .filter(|c| plan.entries.iter().any(|e| e.course_id == c.id()))
            .map(|c| (c.id(), ProgressDetails::zeroed(c)))
            .collect();

        let outcome = self
            .enrolments
            .commit_signup(SignupRecord {
                student: record,
                leader_id: link.leader_id,
                plan,
                is_chargeable: link.is_chargeable,
                initial_progress,
                created_at: now,
            })
            .await
            .map_err(|e| match e {
                StorageError::Conflict => EnrolmentServiceError::EmailTaken,
                other => other.into(),
            })?;

        info!(
            user = %outcome.student_id,
            enrolments = outcome.enrolments.len(),
            link = %link.key,
            "student signed up"
        );
        for enrolment in &outcome.enrolments {
            self.sync_report(enrolment).await;
        }
        Ok(outcome)
    }

    /// Admin assignment of an existing user to a course.
    ///
    /// The enrolment and a zeroed progress row (unless one survives from an
    /// earlier enrolment) are committed together.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound`, `CourseNotFound` or `AlreadyEnrolled`.
    pub async fn assign(
        &self,
        user_id: UserId,
        course_id: CourseId,
        start: DateTime<Utc>,
        is_chargeable: bool,
    ) -> Result<StudentCourseEnrolment, EnrolmentServiceError> {
        if self.users.get_user(user_id).await?.is_none() {
            return Err(EnrolmentServiceError::UserNotFound(user_id));
        }
        let course = self.course(course_id).await?;
        let now = self.clock.now();
        let new = NewEnrolment {
            user_id,
            course_id,
            course_start_at: start,
            course_ends_at: start + chrono::Duration::days(i64::from(course.length_days())),
            is_chargeable,
            registered_by_link: false,
            created_at: now,
        };
        new.validate()?;

        let enrolment = self
            .enrolments
            .commit_assignment(AssignmentRecord {
                enrolment: new,
                initial_progress: ProgressDetails::zeroed(&course),
            })
            .await
            .map_err(|e| match e {
                StorageError::Conflict => EnrolmentServiceError::AlreadyEnrolled {
                    user: user_id,
                    course: course_id,
                },
                other => other.into(),
            })?;
        info!(user = %user_id, course = %course_id, "enrolment assigned");
        self.sync_report(&enrolment).await;
        Ok(enrolment)
    }

    /// # Errors
    ///
    /// Returns `NotEnrolled` when the pair has no enrolment.
    pub async fn change_status(
        &self,
        user_id: UserId,
        course_id: CourseId,
        status: EnrolmentStatus,
    ) -> Result<StudentCourseEnrolment, EnrolmentServiceError> {
        self.update(user_id, course_id, |e, at| {
            e.set_status(status, at);
            Ok(())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `NotEnrolled`, or `Enrolment` for delisted enrolments.
    pub async fn defer(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<StudentCourseEnrolment, EnrolmentServiceError> {
        self.update(user_id, course_id, |e, at| e.defer(at)).await
    }

    /// # Errors
    ///
    /// Returns `NotEnrolled`, or `Enrolment` for delisted enrolments.
    pub async fn resume(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<StudentCourseEnrolment, EnrolmentServiceError> {
        self.update(user_id, course_id, |e, at| e.resume(at)).await
    }

    /// # Errors
    ///
    /// Returns `NotEnrolled`, or `Enrolment` unless the enrolment is completed.
    pub async fn issue_certificate(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<StudentCourseEnrolment, EnrolmentServiceError> {
        self.update(user_id, course_id, |e, at| e.issue_certificate(at))
            .await
    }

    async fn update<F>(
        &self,
        user_id: UserId,
        course_id: CourseId,
        apply: F,
    ) -> Result<StudentCourseEnrolment, EnrolmentServiceError>
    where
        F: FnOnce(
            &mut StudentCourseEnrolment,
            DateTime<Utc>,
        ) -> Result<(), lms_core::model::EnrolmentError>,
    {
        let mut enrolment = self
            .enrolments
            .get_enrolment(user_id, course_id)
            .await?
            .ok_or(EnrolmentServiceError::NotEnrolled {
                user: user_id,
                course: course_id,
            })?;
        apply(&mut enrolment, self.clock.now())?;
        self.enrolments.update_enrolment(&enrolment).await?;
        info!(
            user = %user_id,
            course = %course_id,
            status = %enrolment.status,
            deferred = enrolment.is_deferred(),
            "enrolment updated"
        );
        self.sync_report(&enrolment).await;
        Ok(enrolment)
    }

    /// Report rows are rebuildable caches; a failed sync is logged, not returned.
    async fn sync_report(&self, enrolment: &StudentCourseEnrolment) {
        if let Err(err) = self.reports.sync(enrolment.user_id, enrolment.course_id).await {
            warn!(
                user = %enrolment.user_id,
                course = %enrolment.course_id,
                error = %err,
                "report sync after enrolment change failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_core::model::course::fixtures;
    use lms_core::model::{CompanyId, Percentage};
    use lms_core::time::{fixed_clock, fixed_now};
    use storage::repository::{AdminReportRepository, InMemoryRepository, ProgressRepository};

    fn service(repo: &InMemoryRepository) -> EnrolmentService {
        let reports = Arc::new(AdminReportService::new(
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        ));
        EnrolmentService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            reports,
        )
    }

    fn student(email: &str) -> NewStudent {
        NewStudent {
            first_name: "Sam".into(),
            last_name: "Lee".into(),
            email: email.into(),
        }
    }

    async fn linked_courses(repo: &InMemoryRepository) {
        let mut info = fixtures::info(1, 30);
        info.auto_register_next_course = true;
        info.next_course_id = Some(CourseId::new(2));
        let first = Course::new(info, fixtures::two_lesson_course(1).lessons().to_vec()).unwrap();
        repo.upsert_course(&first).await.unwrap();
        repo.upsert_course(&fixtures::two_lesson_course(2)).await.unwrap();
    }

    #[tokio::test]
    async fn signup_without_successor_creates_one_enrolment() {
        let repo = InMemoryRepository::new();
        repo.upsert_course(&fixtures::two_lesson_course(1)).await.unwrap();
        let link = SignupLink::generate(CourseId::new(1), Some(CompanyId::new(3)), None, false);

        let outcome = service(&repo).signup(&link, student("sam@example.com")).await.unwrap();
        assert_eq!(outcome.enrolments.len(), 1);
        let user = repo.get_user(outcome.student_id).await.unwrap().unwrap();
        assert_eq!(user.company_id, Some(CompanyId::new(3)));
        assert_eq!(user.role, Role::Student);
    }

    #[tokio::test]
    async fn signup_syncs_reports_for_every_enrolment() {
        let repo = InMemoryRepository::new();
        linked_courses(&repo).await;
        let link = SignupLink::generate(CourseId::new(1), None, None, true);

        let outcome = service(&repo).signup(&link, student(" Sam@Example.com ")).await.unwrap();
        for course in [1, 2] {
            let report = repo
                .get_report(outcome.student_id, CourseId::new(course))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(report.progress_percentage, Percentage::ZERO);
            assert_eq!(report.student_email, "sam@example.com");
        }
    }

    #[tokio::test]
    async fn invalid_or_duplicate_students_write_nothing() {
        let repo = InMemoryRepository::new();
        linked_courses(&repo).await;
        let svc = service(&repo);
        let link = SignupLink::generate(CourseId::new(1), None, None, true);

        let err = svc.signup(&link, student("not-an-email")).await.unwrap_err();
        assert!(matches!(err, EnrolmentServiceError::User(_)));
        assert!(repo.list_enrolments_page(0, 10).await.unwrap().is_empty());

        svc.signup(&link, student("sam@example.com")).await.unwrap();
        let err = svc.signup(&link, student("SAM@example.com")).await.unwrap_err();
        assert!(matches!(err, EnrolmentServiceError::EmailTaken));
        assert_eq!(repo.list_enrolments_page(0, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn certificate_requires_completion() {
        let repo = InMemoryRepository::new();
        repo.upsert_course(&fixtures::two_lesson_course(1)).await.unwrap();
        let svc = service(&repo);
        let link = SignupLink::generate(CourseId::new(1), None, None, false);
        let outcome = svc.signup(&link, student("sam@example.com")).await.unwrap();
        let user = outcome.student_id;

        let err = svc.issue_certificate(user, CourseId::new(1)).await.unwrap_err();
        assert!(matches!(err, EnrolmentServiceError::Enrolment(_)));

        svc.change_status(user, CourseId::new(1), EnrolmentStatus::Completed)
            .await
            .unwrap();
        let issued = svc.issue_certificate(user, CourseId::new(1)).await.unwrap();
        assert_eq!(issued.certificate_issued_at, Some(fixed_now()));

        let report = repo.get_report(user, CourseId::new(1)).await.unwrap().unwrap();
        assert_eq!(report.enrolment_status, EnrolmentStatus::Completed);
    }

    #[tokio::test]
    async fn assign_rejects_duplicates() {
        let repo = InMemoryRepository::new();
        repo.upsert_course(&fixtures::two_lesson_course(1)).await.unwrap();
        let svc = service(&repo);
        let link = SignupLink::generate(CourseId::new(1), None, None, false);
        let user = svc.signup(&link, student("sam@example.com")).await.unwrap().student_id;

        let err = svc
            .assign(user, CourseId::new(1), fixed_now(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, EnrolmentServiceError::AlreadyEnrolled { .. }));

        let err = svc
            .assign(UserId::new(404), CourseId::new(1), fixed_now(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, EnrolmentServiceError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn assign_commits_enrolment_with_zeroed_progress() {
        let repo = InMemoryRepository::new();
        linked_courses(&repo).await;
        let svc = service(&repo);
        let link = SignupLink::generate(CourseId::new(2), None, None, false);
        let user = svc.signup(&link, student("sam@example.com")).await.unwrap().student_id;

        let enrolment = svc
            .assign(user, CourseId::new(1), fixed_now(), true)
            .await
            .unwrap();
        assert_eq!((enrolment.course_ends_at - enrolment.course_start_at).num_days(), 30);
        let progress = repo.get_progress(user, CourseId::new(1)).await.unwrap().unwrap();
        assert_eq!(progress.percentage, Percentage::ZERO);
        assert_eq!(progress.details.lessons.len(), 2);
        assert!(repo.get_report(user, CourseId::new(1)).await.unwrap().is_some());
    }
}
