use std::sync::Arc;

use async_trait::async_trait;
use lms_core::model::course::fixtures;
use lms_core::model::{AdminReport, Course, CourseId, SignupLink, UserId};
use lms_core::time::fixed_now;
use services::{AdminReportService, Clock, EnrolmentService, NewStudent};
use storage::repository::{
    AdminReportRepository, CourseRepository, EnrolmentRepository, ProgressRepository, Storage,
    StorageError,
};

fn linked_courses() -> (Course, Course) {
    let mut info = fixtures::info(1, 30);
    info.auto_register_next_course = true;
    info.next_course_id = Some(CourseId::new(2));
    let first = Course::new(info, fixtures::two_lesson_course(1).lessons().to_vec())
        .expect("valid course");
    let second = Course::new(
        fixtures::info(2, 45),
        fixtures::two_lesson_course(2).lessons().to_vec(),
    )
    .expect("valid course");
    (first, second)
}

fn student(email: &str) -> NewStudent {
    NewStudent {
        first_name: "Riley".into(),
        last_name: "Nguyen".into(),
        email: email.into(),
    }
}

struct UnavailableReports;

#[async_trait]
impl AdminReportRepository for UnavailableReports {
    async fn upsert_report(&self, _report: &AdminReport) -> Result<(), StorageError> {
        Err(StorageError::Connection("reporting table offline".into()))
    }

    async fn get_report(
        &self,
        _user_id: UserId,
        _course_id: CourseId,
    ) -> Result<Option<AdminReport>, StorageError> {
        Ok(None)
    }

    async fn delete_report(&self, _user_id: UserId, _course_id: CourseId) -> Result<bool, StorageError> {
        Ok(false)
    }

    async fn list_reports_page(&self, _offset: u64, _limit: u32) -> Result<Vec<AdminReport>, StorageError> {
        Ok(Vec::new())
    }
}

fn enrolment_service(storage: &Storage, reports: Arc<dyn AdminReportRepository>) -> EnrolmentService {
    let report_sync = AdminReportService::new(
        Arc::clone(&storage.users),
        Arc::clone(&storage.courses),
        Arc::clone(&storage.enrolments),
        Arc::clone(&storage.progress),
        reports,
    );
    EnrolmentService::new(
        Clock::fixed(fixed_now()),
        Arc::clone(&storage.courses),
        Arc::clone(&storage.users),
        Arc::clone(&storage.enrolments),
        Arc::new(report_sync),
    )
}

#[tokio::test]
async fn signup_link_enrols_into_course_and_its_successor() {
    let storage = Storage::sqlite("sqlite:file:memdb_signup_flow?mode=memory&cache=shared")
        .await
        .expect("connect sqlite");
    let (first, second) = linked_courses();
    storage.courses.upsert_course(&first).await.expect("course 1");
    storage.courses.upsert_course(&second).await.expect("course 2");

    let service = enrolment_service(&storage, Arc::clone(&storage.reports));
    let link = SignupLink::generate(CourseId::new(1), None, None, true);
    let outcome = service
        .signup(&link, student("riley@example.com"))
        .await
        .expect("signup");

    assert_eq!(outcome.enrolments.len(), 2);
    let (a, b) = (&outcome.enrolments[0], &outcome.enrolments[1]);
    assert_eq!(a.course_start_at, fixed_now());
    assert_eq!(a.course_ends_at, b.course_start_at);
    assert_eq!((b.course_ends_at - b.course_start_at).num_days(), 45);
    assert!(a.registered_by_link && b.is_chargeable);

    for course in [1, 2] {
        let progress = storage
            .progress
            .get_progress(outcome.student_id, CourseId::new(course))
            .await
            .expect("read progress")
            .expect("zeroed progress row");
        assert_eq!(progress.percentage.value(), 0);
        assert!(storage
            .reports
            .get_report(outcome.student_id, CourseId::new(course))
            .await
            .expect("read report")
            .is_some());
    }
}

#[tokio::test]
async fn report_outage_does_not_undo_a_committed_signup() {
    let storage = Storage::sqlite("sqlite:file:memdb_signup_report_outage?mode=memory&cache=shared")
        .await
        .expect("connect sqlite");
    let (first, second) = linked_courses();
    storage.courses.upsert_course(&first).await.expect("course 1");
    storage.courses.upsert_course(&second).await.expect("course 2");

    let service = enrolment_service(&storage, Arc::new(UnavailableReports));
    let link = SignupLink::generate(CourseId::new(1), None, None, false);
    let outcome = service
        .signup(&link, student("riley@example.com"))
        .await
        .expect("signup succeeds without reports");

    let enrolments = storage
        .enrolments
        .list_enrolments_for_user(outcome.student_id)
        .await
        .expect("list enrolments");
    assert_eq!(enrolments.len(), 2);
}
