use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use lms_core::lesson_dates::{LessonDates, resolve_lesson_dates};
use lms_core::model::{
    ActivityEvent, ActivityKind, Competency, CourseId, LessonId, LessonProgress, NodeStatus,
    StudentCourseEnrolment, UserId,
};
use serde::Serialize;
use storage::repository::{
    ActivityRepository, CompetencyRepository, CourseRepository, EnrolmentRepository,
    ProgressRepository,
};
use tracing::{info, warn};

use crate::Clock;
use crate::error::LessonDateError;

/// One (student, course) that a bulk run could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub message: String,
}

/// Summary of a chunked bulk run. Failures do not stop the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub processed: usize,
    pub written: usize,
    pub failures: Vec<ItemFailure>,
}

/// Stored competency start that disagrees with the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompetencyMismatch {
    pub lesson_id: LessonId,
    pub stored_start: Option<DateTime<Utc>>,
    pub resolved_start: DateTime<Utc>,
}

/// Resolves lesson dates and keeps competency rows in step with them.
#[derive(Clone)]
pub struct LessonDateService {
    clock: Clock,
    tz: FixedOffset,
    courses: Arc<dyn CourseRepository>,
    enrolments: Arc<dyn EnrolmentRepository>,
    progress: Arc<dyn ProgressRepository>,
    activity: Arc<dyn ActivityRepository>,
    competencies: Arc<dyn CompetencyRepository>,
}

fn lesson_is_complete(lesson: Option<&LessonProgress>) -> bool {
    lesson.is_some_and(|l| l.marked_passed || l.status == NodeStatus::Completed)
}

impl LessonDateService {
    #[must_use]
    pub fn new(
        clock: Clock,
        tz: FixedOffset,
        courses: Arc<dyn CourseRepository>,
        enrolments: Arc<dyn EnrolmentRepository>,
        progress: Arc<dyn ProgressRepository>,
        activity: Arc<dyn ActivityRepository>,
        competencies: Arc<dyn CompetencyRepository>,
    ) -> Self {
        Self {
            clock,
            tz,
            courses,
            enrolments,
            progress,
            activity,
            competencies,
        }
    }

    /// # Errors
    ///
    /// Returns `LessonDateError::CourseNotFound` or `LessonNotFound` for unknown ids.
    pub async fn lesson_dates(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lesson_id: LessonId,
    ) -> Result<LessonDates, LessonDateError> {
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or(LessonDateError::CourseNotFound(course_id))?;
        if course.lesson(lesson_id).is_none() {
            return Err(LessonDateError::LessonNotFound {
                course: course_id,
                lesson: lesson_id,
            });
        }
        let enrolment = self.enrolments.get_enrolment(user_id, course_id).await?;
        let events = self.activity.list_activity(user_id, course_id).await?;
        Ok(resolve_lesson_dates(
            enrolment.as_ref(),
            lesson_id,
            &events,
            self.tz,
            self.clock.now(),
        ))
    }

    /// Writes one competency row per lesson of the enrolment's course.
    ///
    /// # Errors
    ///
    /// Returns `LessonDateError` if the course is missing or storage fails.
    pub async fn sync_enrolment(
        &self,
        enrolment: &StudentCourseEnrolment,
    ) -> Result<usize, LessonDateError> {
        let (user_id, course_id) = (enrolment.user_id, enrolment.course_id);
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or(LessonDateError::CourseNotFound(course_id))?;
        let events = self.activity.list_activity(user_id, course_id).await?;
        let progress = self.progress.get_progress(user_id, course_id).await?;
        let now = self.clock.now();

        let mut written = 0;
        for lesson in course.lessons() {
            let dates = resolve_lesson_dates(Some(enrolment), lesson.id, &events, self.tz, now);
            let is_competent = lesson_is_complete(
                progress.as_ref().and_then(|p| p.details.lesson(lesson.id)),
            );
            let competency = Competency {
                user_id,
                course_id,
                lesson_id: lesson.id,
                started_at: dates.start_utc(),
                ended_at: dates.end_utc(),
                is_competent,
            };
            self.competencies.upsert_competency(&competency).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Walks all enrolments page by page and syncs their competencies.
    ///
    /// # Errors
    ///
    /// Returns `LessonDateError::InvalidChunk` for a zero chunk size, or
    /// `Storage` if a page cannot be read. Per-enrolment failures are collected.
    pub async fn sync_competencies(&self, chunk_size: u32) -> Result<BulkReport, LessonDateError> {
        let mut report = BulkReport::default();
        self.for_each_enrolment(
            chunk_size,
            |enrolment| async move { self.sync_enrolment(&enrolment).await },
            &mut report,
        )
        .await?;
        info!(
            processed = report.processed,
            written = report.written,
            failed = report.failures.len(),
            "competency sync finished"
        );
        Ok(report)
    }

    /// Appends a `LESSON END` event for lessons that are complete in the cached
    /// details but have no end event yet.
    ///
    /// The event is dated at the latest quiz update in the lesson, else the
    /// progress row's `updated_at`.
    ///
    /// # Errors
    ///
    /// Same as `sync_competencies`.
    pub async fn backfill_lesson_end_dates(
        &self,
        chunk_size: u32,
    ) -> Result<BulkReport, LessonDateError> {
        let mut report = BulkReport::default();
        self.for_each_enrolment(
            chunk_size,
            |enrolment| async move { self.backfill_enrolment(&enrolment).await },
            &mut report,
        )
        .await?;
        info!(
            processed = report.processed,
            written = report.written,
            failed = report.failures.len(),
            "lesson end date backfill finished"
        );
        Ok(report)
    }

    async fn backfill_enrolment(
        &self,
        enrolment: &StudentCourseEnrolment,
    ) -> Result<usize, LessonDateError> {
        let (user_id, course_id) = (enrolment.user_id, enrolment.course_id);
        let Some(progress) = self.progress.get_progress(user_id, course_id).await? else {
            return Ok(0);
        };
        let events = self.activity.list_activity(user_id, course_id).await?;

        let mut written = 0;
        for (lesson_id, lesson) in &progress.details.lessons {
            if !lesson_is_complete(Some(lesson)) {
                continue;
            }
            if events
                .iter()
                .any(|e| e.is_for_lesson(*lesson_id, ActivityKind::LessonEnd))
            {
                continue;
            }
            let occurred_at = lesson
                .topics
                .values()
                .flat_map(|t| t.quizzes.values())
                .filter_map(|q| q.updated_at)
                .max()
                .unwrap_or(progress.updated_at);
            self.activity
                .append_activity(&ActivityEvent {
                    user_id,
                    course_id,
                    lesson_id: Some(*lesson_id),
                    kind: ActivityKind::LessonEnd,
                    occurred_at,
                })
                .await?;
            written += 1;
        }
        Ok(written)
    }

    async fn for_each_enrolment<F, Fut>(
        &self,
        chunk_size: u32,
        mut work: F,
        report: &mut BulkReport,
    ) -> Result<(), LessonDateError>
    where
        F: FnMut(StudentCourseEnrolment) -> Fut,
        Fut: std::future::Future<Output = Result<usize, LessonDateError>>,
    {
        if chunk_size == 0 {
            return Err(LessonDateError::InvalidChunk);
        }
        let mut offset = 0_u64;
        loop {
            let page = self.enrolments.list_enrolments_page(offset, chunk_size).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as u64;
            let last_page = page.len() < chunk_size as usize;

            for enrolment in page {
                let (user_id, course_id) = (enrolment.user_id, enrolment.course_id);
                report.processed += 1;
                match work(enrolment).await {
                    Ok(written) => report.written += written,
                    Err(err) => {
                        warn!(user = %user_id, course = %course_id, error = %err, "bulk item failed");
                        report.failures.push(ItemFailure {
                            user_id,
                            course_id,
                            message: err.to_string(),
                        });
                    }
                }
            }
            if last_page {
                break;
            }
        }
        Ok(())
    }

    /// Compares stored competency starts with freshly resolved lesson dates.
    ///
    /// # Errors
    ///
    /// Returns `LessonDateError` if the course is missing or reads fail.
    pub async fn competency_mismatches(
        &self,
        enrolment: &StudentCourseEnrolment,
    ) -> Result<Vec<CompetencyMismatch>, LessonDateError> {
        let (user_id, course_id) = (enrolment.user_id, enrolment.course_id);
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or(LessonDateError::CourseNotFound(course_id))?;
        let events = self.activity.list_activity(user_id, course_id).await?;
        let stored = self.competencies.list_competencies(user_id, course_id).await?;
        let now = self.clock.now();

        let mut mismatches = Vec::new();
        for lesson in course.lessons() {
            let resolved = resolve_lesson_dates(Some(enrolment), lesson.id, &events, self.tz, now);
            let stored_start = stored
                .iter()
                .find(|c| c.lesson_id == lesson.id)
                .map(|c| c.started_at);
            if stored_start != Some(resolved.start_utc()) {
                mismatches.push(CompetencyMismatch {
                    lesson_id: lesson.id,
                    stored_start,
                    resolved_start: resolved.start_utc(),
                });
            }
        }
        Ok(mismatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lms_core::model::course::fixtures::two_lesson_course;
    use lms_core::lesson_dates::StartSource;
    use lms_core::model::{CourseProgress, NewEnrolment, QuizId, QuizStatus};
    use lms_core::time::{fixed_clock, fixed_now};
    use storage::repository::InMemoryRepository;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn service(repo: &InMemoryRepository) -> LessonDateService {
        LessonDateService::new(
            fixed_clock(),
            utc(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        )
    }

    async fn enrol(repo: &InMemoryRepository, user: u64, course: u64) -> StudentCourseEnrolment {
        repo.insert_enrolment(NewEnrolment {
            user_id: UserId::new(user),
            course_id: CourseId::new(course),
            course_start_at: fixed_now() - Duration::days(2),
            course_ends_at: fixed_now() + Duration::days(28),
            is_chargeable: false,
            registered_by_link: false,
            created_at: fixed_now(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn lesson_dates_fall_back_to_enrolment_start() {
        let repo = InMemoryRepository::new();
        repo.upsert_course(&two_lesson_course(1)).await.unwrap();
        let enrolment = enrol(&repo, 1, 1).await;

        let dates = service(&repo)
            .lesson_dates(UserId::new(1), CourseId::new(1), LessonId::new(10))
            .await
            .unwrap();
        assert_eq!(dates.start_source, StartSource::Enrolment);
        assert_eq!(dates.start_utc(), enrolment.course_start_at);

        let err = service(&repo)
            .lesson_dates(UserId::new(1), CourseId::new(1), LessonId::new(99))
            .await
            .unwrap_err();
        assert!(matches!(err, LessonDateError::LessonNotFound { .. }));
    }

    #[tokio::test]
    async fn sync_collects_failures_and_continues() {
        let repo = InMemoryRepository::new();
        repo.upsert_course(&two_lesson_course(1)).await.unwrap();
        enrol(&repo, 1, 1).await;
        enrol(&repo, 2, 404).await;
        enrol(&repo, 3, 1).await;

        let report = service(&repo).sync_competencies(2).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.written, 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].course_id, CourseId::new(404));
        assert_eq!(repo.list_competencies(UserId::new(3), CourseId::new(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn completed_lessons_are_competent_and_backfilled() {
        let repo = InMemoryRepository::new();
        let course = two_lesson_course(1);
        repo.upsert_course(&course).await.unwrap();
        let enrolment = enrol(&repo, 1, 1).await;

        let mut progress = CourseProgress::zeroed(UserId::new(1), &course, fixed_now());
        let done_at = fixed_now() - Duration::hours(3);
        for quiz in [1, 2] {
            progress
                .details
                .set_quiz(&course, QuizId::new(quiz), QuizStatus::Passed, Some(1), Some(done_at));
        }
        lms_core::aggregator::refresh_statuses(&course, &mut progress.details);
        repo.upsert_progress(&progress).await.unwrap();

        let svc = service(&repo);
        svc.sync_enrolment(&enrolment).await.unwrap();
        let rows = repo.list_competencies(UserId::new(1), CourseId::new(1)).await.unwrap();
        let competent: Vec<_> = rows.iter().filter(|c| c.is_competent).map(|c| c.lesson_id).collect();
        assert_eq!(competent, vec![LessonId::new(10)]);

        let first = svc.backfill_lesson_end_dates(10).await.unwrap();
        assert_eq!(first.written, 1);
        let again = svc.backfill_lesson_end_dates(10).await.unwrap();
        assert_eq!(again.written, 0);

        let dates = svc
            .lesson_dates(UserId::new(1), CourseId::new(1), LessonId::new(10))
            .await
            .unwrap();
        assert_eq!(dates.end_utc(), Some(done_at));
    }

    #[tokio::test]
    async fn zero_chunk_is_rejected() {
        let repo = InMemoryRepository::new();
        let err = service(&repo).sync_competencies(0).await.unwrap_err();
        assert!(matches!(err, LessonDateError::InvalidChunk));
    }
}
