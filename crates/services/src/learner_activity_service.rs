use std::sync::Arc;

use lms_core::model::{
    ActivityEvent, ActivityKind, AttemptId, AttemptStatus, Course, CourseId, LessonId, QuizAttempt,
    QuizId, StudentCourseEnrolment, TopicId, UserId,
};
use storage::repository::{
    ActivityRepository, CourseRepository, EnrolmentRepository, NewAttemptRecord,
    QuizAttemptRepository,
};
use tracing::{debug, info, warn};

use crate::Clock;
use crate::course_progress_service::{CourseProgressService, Recalculated};
use crate::error::ActivityServiceError;
use crate::lesson_date_service::LessonDateService;

/// Learner-side events: quiz attempts, lesson starts and topic completion.
///
/// Each event is stored first. Progress, report rows and competency dates are
/// then recomputed from it, and a failed recomputation is logged.
#[derive(Clone)]
pub struct LearnerActivityService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    enrolments: Arc<dyn EnrolmentRepository>,
    attempts: Arc<dyn QuizAttemptRepository>,
    activity: Arc<dyn ActivityRepository>,
    progress: Arc<CourseProgressService>,
    lesson_dates: Arc<LessonDateService>,
}

impl LearnerActivityService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        enrolments: Arc<dyn EnrolmentRepository>,
        attempts: Arc<dyn QuizAttemptRepository>,
        activity: Arc<dyn ActivityRepository>,
        progress: Arc<CourseProgressService>,
        lesson_dates: Arc<LessonDateService>,
    ) -> Self {
        Self {
            clock,
            courses,
            enrolments,
            attempts,
            activity,
            progress,
            lesson_dates,
        }
    }

    async fn course(&self, course_id: CourseId) -> Result<Course, ActivityServiceError> {
        self.courses
            .get_course(course_id)
            .await?
            .ok_or(ActivityServiceError::CourseNotFound(course_id))
    }

    async fn enrolment(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<StudentCourseEnrolment, ActivityServiceError> {
        self.enrolments
            .get_enrolment(user_id, course_id)
            .await?
            .ok_or(ActivityServiceError::NotEnrolled {
                user: user_id,
                course: course_id,
            })
    }

    async fn attempt(&self, id: AttemptId) -> Result<QuizAttempt, ActivityServiceError> {
        self.attempts
            .get_attempt(id)
            .await?
            .ok_or(ActivityServiceError::AttemptNotFound(id))
    }

    /// Opens the next attempt at a quiz.
    ///
    /// # Errors
    ///
    /// Returns `NotEnrolled`, `QuizNotFound`, or `AttemptOpen` while the previous
    /// attempt at the quiz has not reached a final state.
    pub async fn start_attempt(
        &self,
        user_id: UserId,
        course_id: CourseId,
        quiz_id: QuizId,
    ) -> Result<QuizAttempt, ActivityServiceError> {
        let course = self.course(course_id).await?;
        self.enrolment(user_id, course_id).await?;
        if course.locate_quiz(quiz_id).is_none() {
            return Err(ActivityServiceError::QuizNotFound {
                course: course_id,
                quiz: quiz_id,
            });
        }

        let previous = self
            .attempts
            .list_attempts(user_id, course_id)
            .await?
            .into_iter()
            .filter(|a| a.quiz_id == quiz_id)
            .max_by_key(|a| (a.attempt, a.created_at, a.id));
        if let Some(open) = previous.as_ref().filter(|a| !a.status().is_terminal()) {
            return Err(ActivityServiceError::AttemptOpen(open.id));
        }
        let number = previous.map_or(1, |a| a.attempt + 1);

        let now = self.clock.now();
        let record = NewAttemptRecord {
            user_id,
            course_id,
            quiz_id,
            attempt: number,
            created_at: now,
        };
        let id = self.attempts.insert_new_attempt(record).await?;
        let attempt = QuizAttempt::start(id, user_id, course_id, quiz_id, number, now)?;
        debug!(user = %user_id, quiz = %quiz_id, attempt = number, "quiz attempt started");

        self.refresh(user_id, course_id).await;
        Ok(attempt)
    }

    /// Hands an open attempt in and logs the submission.
    ///
    /// # Errors
    ///
    /// Returns `AttemptNotFound`, or `Attempt` unless the attempt is `Attempting`.
    pub async fn submit_attempt(
        &self,
        attempt_id: AttemptId,
        answers: serde_json::Value,
    ) -> Result<QuizAttempt, ActivityServiceError> {
        let mut attempt = self.attempt(attempt_id).await?;
        let course = self.course(attempt.course_id).await?;
        let now = self.clock.now();
        attempt.submit(answers, now)?;
        self.attempts.upsert_attempt(&attempt).await?;

        self.activity
            .append_activity(&ActivityEvent {
                user_id: attempt.user_id,
                course_id: attempt.course_id,
                lesson_id: course.locate_quiz(attempt.quiz_id).map(|(lesson, _, _)| lesson.id),
                kind: ActivityKind::QuizSubmitted,
                occurred_at: now,
            })
            .await?;
        info!(user = %attempt.user_id, quiz = %attempt.quiz_id, attempt = %attempt_id, "quiz submitted");

        self.refresh(attempt.user_id, attempt.course_id).await;
        Ok(attempt)
    }

    /// Records the reviewer's verdict. A submitted attempt is moved into review
    /// first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidVerdict` unless `verdict` is `Returned`, `Satisfactory`
    /// or `Fail`, and `Attempt` when the attempt was never handed in or is
    /// already final.
    pub async fn evaluate_attempt(
        &self,
        attempt_id: AttemptId,
        verdict: AttemptStatus,
    ) -> Result<QuizAttempt, ActivityServiceError> {
        if !matches!(
            verdict,
            AttemptStatus::Returned | AttemptStatus::Satisfactory | AttemptStatus::Fail
        ) {
            return Err(ActivityServiceError::InvalidVerdict(verdict));
        }
        let mut attempt = self.attempt(attempt_id).await?;
        let now = self.clock.now();
        if attempt.status() == AttemptStatus::Submitted {
            attempt.transition(AttemptStatus::Reviewing, now)?;
        }
        attempt.transition(verdict, now)?;
        self.attempts.upsert_attempt(&attempt).await?;
        info!(attempt = %attempt_id, verdict = %verdict, "quiz attempt evaluated");

        self.refresh(attempt.user_id, attempt.course_id).await;
        Ok(attempt)
    }

    /// Logs that the student opened a lesson and refreshes competency dates.
    ///
    /// # Errors
    ///
    /// Returns `NotEnrolled` or `LessonNotFound`.
    pub async fn record_lesson_start(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lesson_id: LessonId,
    ) -> Result<(), ActivityServiceError> {
        let course = self.course(course_id).await?;
        if course.lesson(lesson_id).is_none() {
            return Err(ActivityServiceError::LessonNotFound {
                course: course_id,
                lesson: lesson_id,
            });
        }
        let enrolment = self.enrolment(user_id, course_id).await?;
        self.activity
            .append_activity(&ActivityEvent {
                user_id,
                course_id,
                lesson_id: Some(lesson_id),
                kind: ActivityKind::LessonStart,
                occurred_at: self.clock.now(),
            })
            .await?;
        debug!(user = %user_id, lesson = %lesson_id, "lesson started");

        if let Err(err) = self.lesson_dates.sync_enrolment(&enrolment).await {
            warn!(user = %user_id, course = %course_id, error = %err, "competency sync after lesson start failed");
        }
        Ok(())
    }

    /// Marks an assessment-free topic as finished by the student.
    ///
    /// # Errors
    ///
    /// Returns `NotEnrolled`, or `Progress` for unknown or assessed topics.
    pub async fn complete_topic(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lesson_id: LessonId,
        topic_id: TopicId,
    ) -> Result<Recalculated, ActivityServiceError> {
        let enrolment = self.enrolment(user_id, course_id).await?;
        let result = self
            .progress
            .complete_topic(user_id, course_id, lesson_id, topic_id)
            .await?;
        if let Err(err) = self.lesson_dates.sync_enrolment(&enrolment).await {
            warn!(user = %user_id, course = %course_id, error = %err, "competency sync after topic completion failed");
        }
        Ok(result)
    }

    async fn refresh(&self, user_id: UserId, course_id: CourseId) {
        if let Err(err) = self.progress.recalculate(user_id, course_id).await {
            warn!(user = %user_id, course = %course_id, error = %err, "recalculation after quiz activity failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset};
    use lms_core::model::course::fixtures::two_lesson_course;
    use lms_core::model::{AttemptError, NewEnrolment, Role, User};
    use lms_core::time::{fixed_clock, fixed_now};
    use storage::repository::{
        AdminReportRepository, CompetencyRepository, InMemoryRepository, ProgressRepository,
        UserRepository,
    };

    use crate::admin_report_service::AdminReportService;
    use crate::error::ProgressServiceError;

    async fn setup() -> (LearnerActivityService, InMemoryRepository) {
        let repo = InMemoryRepository::new();
        repo.upsert_course(&two_lesson_course(1)).await.unwrap();
        repo.upsert_user(&User {
            id: UserId::new(1),
            first_name: "Sam".into(),
            last_name: "Lee".into(),
            email: "sam@example.com".into(),
            role: Role::Student,
            company_id: None,
            is_active: true,
        })
        .await
        .unwrap();
        repo.insert_enrolment(NewEnrolment {
            user_id: UserId::new(1),
            course_id: CourseId::new(1),
            course_start_at: fixed_now() - Duration::days(2),
            course_ends_at: fixed_now() + Duration::days(28),
            is_chargeable: true,
            registered_by_link: false,
            created_at: fixed_now() - Duration::days(2),
        })
        .await
        .unwrap();

        let reports = Arc::new(AdminReportService::new(
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        ));
        let progress = Arc::new(CourseProgressService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            reports,
        ));
        let utc = FixedOffset::east_opt(0).unwrap();
        let lesson_dates = Arc::new(LessonDateService::new(
            fixed_clock(),
            utc,
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        ));
        let svc = LearnerActivityService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            progress,
            lesson_dates,
        );
        (svc, repo)
    }

    #[tokio::test]
    async fn passing_a_quiz_updates_progress_and_report() {
        let (svc, repo) = setup().await;
        let user = UserId::new(1);
        let course = CourseId::new(1);

        let started = svc.start_attempt(user, course, QuizId::new(1)).await.unwrap();
        assert_eq!(started.attempt, 1);
        svc.submit_attempt(started.id, serde_json::json!({ "answers": ["b"] }))
            .await
            .unwrap();
        let evaluated = svc
            .evaluate_attempt(started.id, AttemptStatus::Satisfactory)
            .await
            .unwrap();
        assert_eq!(evaluated.status(), AttemptStatus::Satisfactory);
        assert_eq!(evaluated.evaluated_at, Some(fixed_now()));

        let progress = repo.get_progress(user, course).await.unwrap().unwrap();
        assert_eq!(progress.percentage.value(), 25);
        let row = repo.get_report(user, course).await.unwrap().unwrap();
        assert_eq!(row.progress_percentage.value(), 25);

        let events = repo.list_activity(user, course).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_for_lesson(LessonId::new(10), ActivityKind::QuizSubmitted));
    }

    #[tokio::test]
    async fn out_of_order_moves_are_rejected() {
        let (svc, repo) = setup().await;
        let attempt = svc
            .start_attempt(UserId::new(1), CourseId::new(1), QuizId::new(2))
            .await
            .unwrap();

        let err = svc
            .evaluate_attempt(attempt.id, AttemptStatus::Satisfactory)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActivityServiceError::Attempt(AttemptError::InvalidTransition {
                from: AttemptStatus::Attempting,
                to: AttemptStatus::Satisfactory,
            })
        ));
        let err = svc
            .evaluate_attempt(attempt.id, AttemptStatus::Overdue)
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityServiceError::InvalidVerdict(AttemptStatus::Overdue)));

        svc.submit_attempt(attempt.id, serde_json::Value::Null).await.unwrap();
        let err = svc
            .submit_attempt(attempt.id, serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityServiceError::Attempt(_)));

        let stored = repo.get_attempt(attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), AttemptStatus::Submitted);
    }

    #[tokio::test]
    async fn a_new_attempt_waits_for_the_previous_verdict() {
        let (svc, _) = setup().await;
        let (user, course, quiz) = (UserId::new(1), CourseId::new(1), QuizId::new(3));
        let first = svc.start_attempt(user, course, quiz).await.unwrap();
        let err = svc.start_attempt(user, course, quiz).await.unwrap_err();
        assert!(matches!(err, ActivityServiceError::AttemptOpen(id) if id == first.id));

        svc.submit_attempt(first.id, serde_json::Value::Null).await.unwrap();
        svc.evaluate_attempt(first.id, AttemptStatus::Fail).await.unwrap();
        let second = svc.start_attempt(user, course, quiz).await.unwrap();
        assert_eq!(second.attempt, 2);

        let err = svc.start_attempt(user, course, QuizId::new(77)).await.unwrap_err();
        assert!(matches!(err, ActivityServiceError::QuizNotFound { .. }));
        let err = svc
            .start_attempt(UserId::new(9), course, quiz)
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityServiceError::NotEnrolled { .. }));
    }

    #[tokio::test]
    async fn lesson_start_sets_the_competency_start() {
        let (svc, repo) = setup().await;
        svc.record_lesson_start(UserId::new(1), CourseId::new(1), LessonId::new(20))
            .await
            .unwrap();

        let competencies = repo
            .list_competencies(UserId::new(1), CourseId::new(1))
            .await
            .unwrap();
        let lesson = competencies
            .iter()
            .find(|c| c.lesson_id == LessonId::new(20))
            .unwrap();
        assert_eq!(lesson.started_at, fixed_now());
        assert!(!lesson.is_competent);

        let err = svc
            .record_lesson_start(UserId::new(1), CourseId::new(1), LessonId::new(99))
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityServiceError::LessonNotFound { .. }));
    }

    #[tokio::test]
    async fn topic_completion_requires_an_enrolment() {
        let (svc, _) = setup().await;
        let err = svc
            .complete_topic(UserId::new(9), CourseId::new(1), LessonId::new(10), TopicId::new(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityServiceError::NotEnrolled { .. }));

        let err = svc
            .complete_topic(UserId::new(1), CourseId::new(1), LessonId::new(10), TopicId::new(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActivityServiceError::Progress(ProgressServiceError::TopicAssessed(id)) if id == TopicId::new(100)
        ));
    }
}
