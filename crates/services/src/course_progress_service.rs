use std::sync::Arc;

use lms_core::aggregator::{ProgressSummary, refresh_statuses};
use lms_core::model::{
    Course, CourseId, CourseProgress, LessonId, Percentage, QuizAttempt, QuizStatus, TopicId, UserId,
    latest_attempts,
};
use storage::repository::{CourseRepository, ProgressRepository, QuizAttemptRepository};
use tracing::{debug, info, warn};

use crate::Clock;
use crate::admin_report_service::AdminReportService;
use crate::error::ProgressServiceError;

/// Keeps the cached progress details and percentage of a (student, course) in step
/// with the student's quiz attempts. Every stored recalculation also rebuilds the
/// admin report row.
#[derive(Clone)]
pub struct CourseProgressService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    progress: Arc<dyn ProgressRepository>,
    attempts: Arc<dyn QuizAttemptRepository>,
    reports: Arc<AdminReportService>,
}

/// Result of a recalculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recalculated {
    pub progress: CourseProgress,
    pub summary: ProgressSummary,
    /// Percentage stored before this run; `None` when the row was missing.
    pub previous: Option<Percentage>,
}

impl CourseProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        progress: Arc<dyn ProgressRepository>,
        attempts: Arc<dyn QuizAttemptRepository>,
        reports: Arc<AdminReportService>,
    ) -> Self {
        Self {
            clock,
            courses,
            progress,
            attempts,
            reports,
        }
    }

    /// Loads a course or reports it missing.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::CourseNotFound` for unknown ids.
    pub async fn course(&self, course_id: CourseId) -> Result<Course, ProgressServiceError> {
        self.courses
            .get_course(course_id)
            .await?
            .ok_or(ProgressServiceError::CourseNotFound(course_id))
    }

    /// Returns the stored progress row, creating a zeroed one when it is missing.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::CourseNotFound` for unknown courses.
    /// Returns `ProgressServiceError::Storage` if persistence fails.
    pub async fn get_or_init(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<CourseProgress, ProgressServiceError> {
        let course = self.course(course_id).await?;
        self.load_or_init(user_id, &course).await
    }

    async fn load_or_init(
        &self,
        user_id: UserId,
        course: &Course,
    ) -> Result<CourseProgress, ProgressServiceError> {
        if let Some(mut existing) = self.progress.get_progress(user_id, course.id()).await? {
            existing.details.align_to(course);
            return Ok(existing);
        }
        let zeroed = CourseProgress::zeroed(user_id, course, self.clock.now());
        self.progress.upsert_progress(&zeroed).await?;
        debug!(user = %user_id, course = %course.id(), "initialised missing progress row");
        Ok(zeroed)
    }

    /// Computes what `recalculate` would store, without writing anything.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` if the course is unknown or reads fail.
    pub async fn preview(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Recalculated, ProgressServiceError> {
        let course = self.course(course_id).await?;
        let stored = self.progress.get_progress(user_id, course_id).await?;
        let previous = stored.as_ref().map(|p| p.percentage);
        let base = stored
            .unwrap_or_else(|| CourseProgress::zeroed(user_id, &course, self.clock.now()));
        let attempts = self.attempts.list_attempts(user_id, course_id).await?;
        Ok(self.merge(&course, base, &attempts, previous))
    }

    /// Merges the latest attempt per quiz into the details, refreshes node
    /// statuses, recomputes the percentage and persists the row.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` if the course is unknown or persistence fails.
    pub async fn recalculate(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Recalculated, ProgressServiceError> {
        let course = self.course(course_id).await?;
        self.recalculate_course(user_id, &course).await
    }

    async fn recalculate_course(
        &self,
        user_id: UserId,
        course: &Course,
    ) -> Result<Recalculated, ProgressServiceError> {
        let base = self.load_or_init(user_id, course).await?;
        let previous = Some(base.percentage);
        let attempts = self.attempts.list_attempts(user_id, course.id()).await?;
        let result = self.merge(course, base, &attempts, previous);
        self.progress.upsert_progress(&result.progress).await?;

        info!(
            user = %user_id,
            course = %course.id(),
            percentage = %result.progress.percentage,
            "recalculated course progress"
        );
        if let Err(err) = self.reports.sync(user_id, course.id()).await {
            warn!(
                user = %user_id,
                course = %course.id(),
                error = %err,
                "report sync after recalculation failed"
            );
        }
        Ok(result)
    }

    fn merge(
        &self,
        course: &Course,
        mut progress: CourseProgress,
        attempts: &[QuizAttempt],
        previous: Option<Percentage>,
    ) -> Recalculated {
        for (quiz_id, attempt) in latest_attempts(attempts.iter()) {
            let at = attempt
                .evaluated_at
                .or(attempt.submitted_at)
                .unwrap_or(attempt.created_at);
            if !progress.details.set_quiz(
                course,
                quiz_id,
                QuizStatus::from(attempt.status()),
                Some(attempt.attempt),
                Some(at),
            ) {
                debug!(quiz = %quiz_id, course = %course.id(), "attempt for quiz outside course tree");
            }
        }

        let summary = refresh_statuses(course, &mut progress.details);
        progress.percentage = summary.percentage;
        progress.updated_at = self.clock.now();
        Recalculated {
            progress,
            summary,
            previous,
        }
    }

    /// Admin override: marks every quiz of the lesson as passed, then recalculates.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::LessonNotFound` if the lesson is not in the course.
    pub async fn mark_lesson_passed(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lesson_id: LessonId,
    ) -> Result<Recalculated, ProgressServiceError> {
        let course = self.course(course_id).await?;
        if course.lesson(lesson_id).is_none() {
            return Err(ProgressServiceError::LessonNotFound {
                course: course_id,
                lesson: lesson_id,
            });
        }
        let mut progress = self.load_or_init(user_id, &course).await?;
        progress.details.mark_lesson_passed(lesson_id);
        self.progress.upsert_progress(&progress).await?;
        info!(user = %user_id, course = %course_id, lesson = %lesson_id, "lesson marked passed");
        self.recalculate_course(user_id, &course).await
    }

    /// Admin override for a single topic.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::LessonNotFound` or `TopicNotFound` for
    /// nodes outside the course.
    pub async fn mark_topic_passed(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lesson_id: LessonId,
        topic_id: TopicId,
    ) -> Result<Recalculated, ProgressServiceError> {
        let course = self.course(course_id).await?;
        let lesson = course
            .lesson(lesson_id)
            .ok_or(ProgressServiceError::LessonNotFound {
                course: course_id,
                lesson: lesson_id,
            })?;
        if !lesson.topics.iter().any(|t| t.id == topic_id) {
            return Err(ProgressServiceError::TopicNotFound {
                lesson: lesson_id,
                topic: topic_id,
            });
        }
        let mut progress = self.load_or_init(user_id, &course).await?;
        progress.details.mark_topic_passed(lesson_id, topic_id);
        self.progress.upsert_progress(&progress).await?;
        info!(user = %user_id, course = %course_id, topic = %topic_id, "topic marked passed");
        self.recalculate_course(user_id, &course).await
    }

    /// Records that the student finished a topic that carries no gating quizzes,
    /// then recalculates.
    ///
    /// # Errors
    ///
    /// Returns `LessonNotFound` or `TopicNotFound` for nodes outside the course,
    /// and `TopicAssessed` when the topic's completion is decided by its quizzes.
    pub async fn complete_topic(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lesson_id: LessonId,
        topic_id: TopicId,
    ) -> Result<Recalculated, ProgressServiceError> {
        let course = self.course(course_id).await?;
        let lesson = course
            .lesson(lesson_id)
            .ok_or(ProgressServiceError::LessonNotFound {
                course: course_id,
                lesson: lesson_id,
            })?;
        let topic = lesson
            .topics
            .iter()
            .find(|t| t.id == topic_id)
            .ok_or(ProgressServiceError::TopicNotFound {
                lesson: lesson_id,
                topic: topic_id,
            })?;
        if topic.gating_quizzes().next().is_some() {
            return Err(ProgressServiceError::TopicAssessed(topic_id));
        }
        let mut progress = self.load_or_init(user_id, &course).await?;
        progress.details.complete_topic(lesson_id, topic_id);
        self.progress.upsert_progress(&progress).await?;
        debug!(user = %user_id, course = %course_id, topic = %topic_id, "topic completed");
        self.recalculate_course(user_id, &course).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lms_core::model::course::fixtures::{info, lesson, quiz, topic, two_lesson_course};
    use lms_core::model::{
        AttemptId, AttemptStatus, NewEnrolment, NodeStatus, QuizId, Role, User,
    };
    use lms_core::time::{fixed_clock, fixed_now};
    use storage::repository::{
        AdminReportRepository, EnrolmentRepository, InMemoryRepository, UserRepository,
    };

    fn attempt(id: u64, quiz: u64, number: u32, status: AttemptStatus) -> QuizAttempt {
        QuizAttempt::from_persisted(
            AttemptId::new(id),
            UserId::new(1),
            CourseId::new(1),
            QuizId::new(quiz),
            number,
            serde_json::Value::Null,
            status,
            status.system_result(),
            Some(fixed_now()),
            None,
            fixed_now(),
        )
    }

    fn build(repo: &InMemoryRepository) -> CourseProgressService {
        let reports = Arc::new(AdminReportService::new(
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        ));
        CourseProgressService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            reports,
        )
    }

    async fn service() -> (CourseProgressService, InMemoryRepository) {
        let repo = InMemoryRepository::new();
        repo.upsert_course(&two_lesson_course(1)).await.unwrap();
        (build(&repo), repo)
    }

    async fn enrol_student(repo: &InMemoryRepository, course: CourseId) {
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
            course_id: course,
            course_start_at: fixed_now(),
            course_ends_at: fixed_now() + Duration::days(30),
            is_chargeable: true,
            registered_by_link: false,
            created_at: fixed_now(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn missing_row_is_zero_initialised() {
        let (svc, repo) = service().await;
        let progress = svc.get_or_init(UserId::new(1), CourseId::new(1)).await.unwrap();
        assert_eq!(progress.percentage, Percentage::ZERO);
        assert_eq!(progress.details.lessons.len(), 2);
        assert!(repo.get_progress(UserId::new(1), CourseId::new(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_course_is_reported() {
        let (svc, _) = service().await;
        let err = svc.recalculate(UserId::new(1), CourseId::new(9)).await.unwrap_err();
        assert!(matches!(err, ProgressServiceError::CourseNotFound(id) if id == CourseId::new(9)));
    }

    #[tokio::test]
    async fn percentage_never_drops_as_more_attempts_pass() {
        let (svc, repo) = service().await;
        let mut last = Percentage::ZERO;
        for quiz in 1..=4 {
            repo.upsert_attempt(&attempt(quiz, quiz, 1, AttemptStatus::Satisfactory))
                .await
                .unwrap();
            let result = svc.recalculate(UserId::new(1), CourseId::new(1)).await.unwrap();
            assert!(result.progress.percentage >= last);
            last = result.progress.percentage;
        }
        assert_eq!(last, Percentage::FULL);
    }

    #[tokio::test]
    async fn latest_attempt_overrides_earlier_ones() {
        let (svc, repo) = service().await;
        repo.upsert_attempt(&attempt(1, 1, 1, AttemptStatus::Fail)).await.unwrap();
        repo.upsert_attempt(&attempt(2, 1, 2, AttemptStatus::Satisfactory))
            .await
            .unwrap();
        let result = svc.recalculate(UserId::new(1), CourseId::new(1)).await.unwrap();
        assert_eq!(result.summary.quizzes.passed, 1);
        assert_eq!(result.summary.quizzes.failed, 0);
        assert_eq!(result.progress.percentage.value(), 25);
    }

    #[tokio::test]
    async fn marking_a_lesson_passed_completes_it() {
        let (svc, _) = service().await;
        let result = svc
            .mark_lesson_passed(UserId::new(1), CourseId::new(1), LessonId::new(10))
            .await
            .unwrap();
        assert_eq!(result.progress.percentage.value(), 50);
        let lesson = result.progress.details.lesson(LessonId::new(10)).unwrap();
        assert_eq!(lesson.status, NodeStatus::Completed);

        let err = svc
            .mark_topic_passed(UserId::new(1), CourseId::new(1), LessonId::new(10), TopicId::new(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressServiceError::TopicNotFound { .. }));
    }

    #[tokio::test]
    async fn preview_does_not_write() {
        let (svc, repo) = service().await;
        repo.upsert_attempt(&attempt(1, 1, 1, AttemptStatus::Satisfactory))
            .await
            .unwrap();
        let preview = svc.preview(UserId::new(1), CourseId::new(1)).await.unwrap();
        assert_eq!(preview.progress.percentage.value(), 25);
        assert_eq!(preview.previous, None);
        assert!(repo.get_progress(UserId::new(1), CourseId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recalculation_rebuilds_the_report_row() {
        let (svc, repo) = service().await;
        enrol_student(&repo, CourseId::new(1)).await;
        repo.upsert_attempt(&attempt(1, 3, 1, AttemptStatus::Satisfactory))
            .await
            .unwrap();

        svc.recalculate(UserId::new(1), CourseId::new(1)).await.unwrap();
        let row = repo.get_report(UserId::new(1), CourseId::new(1)).await.unwrap().unwrap();
        assert_eq!(row.progress_percentage.value(), 25);

        svc.mark_lesson_passed(UserId::new(1), CourseId::new(1), LessonId::new(10))
            .await
            .unwrap();
        let row = repo.get_report(UserId::new(1), CourseId::new(1)).await.unwrap().unwrap();
        assert_eq!(row.progress_percentage.value(), 75);
    }

    #[tokio::test]
    async fn completing_an_unassessed_topic_counts_its_lesson() {
        let repo = InMemoryRepository::new();
        let course = Course::new(
            info(5, 10),
            vec![
                lesson(10, 1, vec![topic(100, 1, vec![])]),
                lesson(20, 2, vec![topic(200, 1, vec![quiz(1, 1, 0)])]),
            ],
        )
        .unwrap();
        repo.upsert_course(&course).await.unwrap();
        let svc = build(&repo);

        let result = svc
            .complete_topic(UserId::new(1), CourseId::new(5), LessonId::new(10), TopicId::new(100))
            .await
            .unwrap();
        assert_eq!(result.progress.percentage.value(), 50);
        assert_eq!(
            result.progress.details.lesson(LessonId::new(10)).unwrap().status,
            NodeStatus::Completed
        );
    }

    #[tokio::test]
    async fn assessed_topics_cannot_be_completed_directly() {
        let (svc, _) = service().await;
        let err = svc
            .complete_topic(UserId::new(1), CourseId::new(1), LessonId::new(10), TopicId::new(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressServiceError::TopicAssessed(_)));
    }
}
