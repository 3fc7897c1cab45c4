use lms_core::model::course::fixtures::two_lesson_course;
use lms_core::model::{
    AttemptId, AttemptStatus, CourseId, LessonId, QuizAttempt, QuizId, SignupLink, UserId,
};
use lms_core::time::fixed_now;
use lms_core::training_plan::TrainingPlanSettings;
use services::{AppServices, Clock, NewStudent, ReportColumn};
use storage::repository::{
    AdminReportRepository, CompetencyRepository, CourseRepository, ProgressRepository,
    QuizAttemptRepository, Storage, UserRepository,
};

async fn setup(name: &str, settings: TrainingPlanSettings) -> (Storage, AppServices) {
    let storage = Storage::sqlite(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect sqlite");
    for id in [1, 2] {
        storage
            .courses
            .upsert_course(&two_lesson_course(id))
            .await
            .expect("seed course");
    }
    let tz = chrono::FixedOffset::east_opt(10 * 3600).expect("offset");
    let services = AppServices::from_storage(&storage, Clock::fixed(fixed_now()), settings, tz);
    (storage, services)
}

async fn sign_up(services: &AppServices, course: u64, email: &str) -> UserId {
    let link = SignupLink::generate(CourseId::new(course), None, None, true);
    services
        .enrolments()
        .signup(
            &link,
            NewStudent {
                first_name: "Kai".into(),
                last_name: "Moana".into(),
                email: email.into(),
            },
        )
        .await
        .expect("signup")
        .student_id
}

async fn pass_quiz(storage: &Storage, id: u64, user: UserId, course: u64, quiz: u64) {
    let attempt = QuizAttempt::from_persisted(
        AttemptId::new(id),
        user,
        CourseId::new(course),
        QuizId::new(quiz),
        1,
        serde_json::json!({ "answers": [] }),
        AttemptStatus::Satisfactory,
        AttemptStatus::Satisfactory.system_result(),
        Some(fixed_now()),
        Some(fixed_now()),
        fixed_now(),
    );
    storage.attempts.upsert_attempt(&attempt).await.expect("attempt");
}

#[tokio::test]
async fn malformed_id_list_is_rejected_before_any_write() {
    let (storage, services) = setup("memdb_tools_malformed", TrainingPlanSettings::default()).await;
    let user = sign_up(&services, 1, "kai@example.com").await;
    pass_quiz(&storage, 1, user, 1, 1).await;

    let err = services
        .admin_tools()
        .sync_student_profiles(&format!("{user},abc"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let progress = storage
        .progress
        .get_progress(user, CourseId::new(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.percentage.value(), 0);

    let err = services.admin_tools().sync_student_profiles(" , ").await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn sync_continues_past_unknown_users() {
    let (storage, services) = setup("memdb_tools_sync", TrainingPlanSettings::default()).await;
    let user = sign_up(&services, 1, "kai@example.com").await;
    pass_quiz(&storage, 1, user, 1, 1).await;
    pass_quiz(&storage, 2, user, 1, 2).await;

    let report = services
        .admin_tools()
        .sync_student_profiles(&format!("999, {user}"))
        .await
        .expect("sync runs");
    assert!(!report.success);
    assert_eq!((report.succeeded, report.failed), (1, 1));
    assert_eq!(report.results[0].user_id, UserId::new(999));
    assert!(report.results[0].message.as_deref().unwrap().contains("999"));
    assert!(report.results[1].success);
    assert_eq!(report.results[1].courses_synced, 1);

    let row = storage
        .reports
        .get_report(user, CourseId::new(1))
        .await
        .unwrap()
        .expect("report row");
    assert_eq!(row.progress_percentage.value(), 50);
    let competencies = storage
        .competencies
        .list_competencies(user, CourseId::new(1))
        .await
        .unwrap();
    assert_eq!(competencies.len(), 2);
    assert!(competencies.iter().any(|c| c.lesson_id == LessonId::new(10) && c.is_competent));
}

#[tokio::test]
async fn consistency_tool_reports_without_failing() {
    let settings = TrainingPlanSettings {
        lln_course_ids: [CourseId::new(2)].into_iter().collect(),
        ..TrainingPlanSettings::default()
    };
    let (storage, services) = setup("memdb_tools_consistency", settings).await;
    let tools = services.admin_tools();
    let user = sign_up(&services, 1, "kai@example.com").await;
    pass_quiz(&storage, 1, user, 1, 3).await;
    tools.sync_student_profiles(&user.to_string()).await.expect("sync");

    let report = tools
        .test_service_consistency(user, CourseId::new(1))
        .await
        .expect("consistency");
    assert_eq!(report.calculators_agree, Some(true));
    assert!(report.stored_matches_fresh);
    assert!(report.is_consistent(), "{:?}", report.mismatches);

    services
        .progress()
        .mark_lesson_passed(user, CourseId::new(1), LessonId::new(10))
        .await
        .expect("override");
    let report = tools
        .test_service_consistency(user, CourseId::new(1))
        .await
        .expect("consistency");
    assert!(report.success);
    assert_eq!(report.aggregator_percentage.value(), 75);
    assert_eq!(report.training_plan_percentage.value(), 75);
    assert_eq!(report.calculators_agree, Some(true));
    assert!(report.is_consistent(), "{:?}", report.mismatches);
    let row = storage
        .reports
        .get_report(user, CourseId::new(1))
        .await
        .unwrap()
        .expect("report row");
    assert_eq!(row.progress_percentage.value(), 75);

    assert_eq!(
        tools
            .test_service_consistency(UserId::new(404), CourseId::new(1))
            .await
            .unwrap_err()
            .status_code(),
        404
    );
    assert_eq!(
        tools
            .test_service_consistency(user, CourseId::new(2))
            .await
            .unwrap_err()
            .status_code(),
        404
    );

    let lln_student = sign_up(&services, 2, "lln@example.com").await;
    let report = tools
        .test_service_consistency(lln_student, CourseId::new(2))
        .await
        .expect("consistency");
    assert_eq!(report.calculators_agree, None);
}

#[tokio::test]
async fn export_writes_selected_columns_and_totals() {
    let (storage, services) = setup("memdb_tools_export", TrainingPlanSettings::default()).await;
    let first = sign_up(&services, 1, "a@example.com").await;
    let second = sign_up(&services, 2, "b@example.com").await;
    pass_quiz(&storage, 1, first, 1, 1).await;
    services
        .admin_tools()
        .sync_student_profiles(&format!("{first},{second}"))
        .await
        .expect("sync");
    services
        .enrolments()
        .defer(second, CourseId::new(2))
        .await
        .expect("defer");

    let columns = ReportColumn::parse_list("student_email,progress,deferred").unwrap();
    let mut buffer = Vec::new();
    let totals = services
        .export()
        .export_csv(&mut buffer, &columns, 1)
        .await
        .expect("export");

    let text = String::from_utf8(buffer).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Email,Progress (%),Deferred",
            "a@example.com,25,No",
            "b@example.com,0,Yes",
        ]
    );
    assert_eq!(totals.rows, 2);
    assert_eq!((totals.active, totals.deferred), (1, 1));
    assert_eq!(totals.by_status.get("ENROLLED"), Some(&2));
    assert_eq!(totals.mean_percentage().map(|p| p.value()), Some(13));
}

#[tokio::test]
async fn purge_removes_the_student_once() {
    let (storage, services) = setup("memdb_tools_purge", TrainingPlanSettings::default()).await;
    let user = sign_up(&services, 1, "kai@example.com").await;

    let report = services.admin_tools().purge_student(user).await.expect("purge");
    assert_eq!(report.removed.users, 1);
    assert_eq!(report.removed.enrolments, 1);
    assert!(storage.users.get_user(user).await.unwrap().is_none());

    let err = services.admin_tools().purge_student(user).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn learner_activity_keeps_every_view_consistent() {
    let (storage, services) = setup("memdb_tools_activity", TrainingPlanSettings::default()).await;
    let user = sign_up(&services, 1, "kai@example.com").await;
    let activities = services.activities();

    activities
        .record_lesson_start(user, CourseId::new(1), LessonId::new(20))
        .await
        .expect("lesson start");
    let attempt = activities
        .start_attempt(user, CourseId::new(1), QuizId::new(3))
        .await
        .expect("start");
    activities
        .submit_attempt(attempt.id, serde_json::json!({ "answers": ["a"] }))
        .await
        .expect("submit");
    activities
        .evaluate_attempt(attempt.id, AttemptStatus::Satisfactory)
        .await
        .expect("evaluate");

    let stored = storage.attempts.get_attempt(attempt.id).await.unwrap().expect("attempt row");
    assert_eq!(stored.status(), AttemptStatus::Satisfactory);
    let row = storage
        .reports
        .get_report(user, CourseId::new(1))
        .await
        .unwrap()
        .expect("report row");
    assert_eq!(row.progress_percentage.value(), 25);

    let report = services
        .admin_tools()
        .test_service_consistency(user, CourseId::new(1))
        .await
        .expect("consistency");
    assert_eq!(report.training_plan_percentage.value(), 25);
    assert_eq!(report.calculators_agree, Some(true));
    assert!(report.is_consistent(), "{:?}", report.mismatches);
}
