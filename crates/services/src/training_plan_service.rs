use std::sync::Arc;

use lms_core::model::{CourseId, EnrolmentStatus, UserId};
use lms_core::training_plan::{PlanEntry, TrainingPlan, TrainingPlanSettings, plan_entry};
use storage::repository::{
    CourseRepository, EnrolmentRepository, ProgressRepository, QuizAttemptRepository,
};
use tracing::warn;

use crate::Clock;
use crate::error::TrainingPlanError;

/// Expected-vs-actual completion for the training plan view.
#[derive(Clone)]
pub struct TrainingPlanService {
    clock: Clock,
    settings: TrainingPlanSettings,
    courses: Arc<dyn CourseRepository>,
    enrolments: Arc<dyn EnrolmentRepository>,
    attempts: Arc<dyn QuizAttemptRepository>,
    progress: Arc<dyn ProgressRepository>,
}

impl TrainingPlanService {
    #[must_use]
    pub fn new(
        clock: Clock,
        settings: TrainingPlanSettings,
        courses: Arc<dyn CourseRepository>,
        enrolments: Arc<dyn EnrolmentRepository>,
        attempts: Arc<dyn QuizAttemptRepository>,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock,
            settings,
            courses,
            enrolments,
            attempts,
            progress,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &TrainingPlanSettings {
        &self.settings
    }

    /// # Errors
    ///
    /// Returns `TrainingPlanError::CourseNotFound` or `NotEnrolled` when the pair
    /// cannot be planned.
    pub async fn course_entry(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<PlanEntry, TrainingPlanError> {
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or(TrainingPlanError::CourseNotFound(course_id))?;
        let enrolment = self
            .enrolments
            .get_enrolment(user_id, course_id)
            .await?
            .ok_or(TrainingPlanError::NotEnrolled {
                user: user_id,
                course: course_id,
            })?;
        let attempts = self.attempts.list_attempts(user_id, course_id).await?;
        let recorded = self.progress.get_progress(user_id, course_id).await?;
        Ok(plan_entry(
            &course,
            &enrolment,
            &attempts,
            recorded.as_ref().map(|p| &p.details),
            &self.settings,
            self.clock.now(),
        ))
    }

    /// Plan across every non-delisted enrolment of the student.
    ///
    /// Enrolments whose course no longer exists are skipped.
    ///
    /// # Errors
    ///
    /// Returns `TrainingPlanError::Storage` if reads fail.
    pub async fn student_plan(&self, user_id: UserId) -> Result<TrainingPlan, TrainingPlanError> {
        let now = self.clock.now();
        let mut entries = Vec::new();
        for enrolment in self.enrolments.list_enrolments_for_user(user_id).await? {
            if enrolment.status == EnrolmentStatus::Delist {
                continue;
            }
            let Some(course) = self.courses.get_course(enrolment.course_id).await? else {
                warn!(user = %user_id, course = %enrolment.course_id, "enrolment references missing course");
                continue;
            };
            let attempts = self.attempts.list_attempts(user_id, course.id()).await?;
            let recorded = self.progress.get_progress(user_id, course.id()).await?;
            entries.push(plan_entry(
                &course,
                &enrolment,
                &attempts,
                recorded.as_ref().map(|p| &p.details),
                &self.settings,
                now,
            ));
        }
        Ok(TrainingPlan::build(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lms_core::model::course::fixtures::two_lesson_course;
    use lms_core::model::{CourseProgress, LessonId, NewEnrolment, Percentage};
    use lms_core::time::{fixed_clock, fixed_now};
    use lms_core::training_plan::PlanKind;
    use storage::repository::InMemoryRepository;

    async fn enrol(repo: &InMemoryRepository, course: u64, started_days_ago: i64) {
        let start = fixed_now() - Duration::days(started_days_ago);
        repo.insert_enrolment(NewEnrolment {
            user_id: UserId::new(1),
            course_id: CourseId::new(course),
            course_start_at: start,
            course_ends_at: start + Duration::days(30),
            is_chargeable: true,
            registered_by_link: false,
            created_at: start,
        })
        .await
        .unwrap();
    }

    fn service(repo: &InMemoryRepository, lln: &[u64]) -> TrainingPlanService {
        let settings = TrainingPlanSettings {
            lln_course_ids: lln.iter().copied().map(CourseId::new).collect(),
            ..TrainingPlanSettings::default()
        };
        TrainingPlanService::new(
            fixed_clock(),
            settings,
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        )
    }

    #[tokio::test]
    async fn entry_requires_an_enrolment() {
        let repo = InMemoryRepository::new();
        repo.upsert_course(&two_lesson_course(1)).await.unwrap();
        let err = service(&repo, &[])
            .course_entry(UserId::new(1), CourseId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingPlanError::NotEnrolled { .. }));
    }

    #[tokio::test]
    async fn entry_reads_overrides_from_the_progress_row() {
        let repo = InMemoryRepository::new();
        let course = two_lesson_course(1);
        repo.upsert_course(&course).await.unwrap();
        enrol(&repo, 1, 0).await;
        let mut progress = CourseProgress::zeroed(UserId::new(1), &course, fixed_now());
        progress.details.mark_lesson_passed(LessonId::new(20));
        repo.upsert_progress(&progress).await.unwrap();

        let entry = service(&repo, &[])
            .course_entry(UserId::new(1), CourseId::new(1))
            .await
            .unwrap();
        assert_eq!(entry.actual.value(), 50);
    }

    #[tokio::test]
    async fn plan_skips_delisted_and_averages_standard_courses() {
        let repo = InMemoryRepository::new();
        for id in [1, 2, 3] {
            repo.upsert_course(&two_lesson_course(id)).await.unwrap();
        }
        enrol(&repo, 1, 15).await;
        enrol(&repo, 2, 3).await;
        enrol(&repo, 3, 0).await;
        let mut delisted = repo
            .get_enrolment(UserId::new(1), CourseId::new(3))
            .await
            .unwrap()
            .unwrap();
        delisted.delist(fixed_now());
        repo.update_enrolment(&delisted).await.unwrap();

        let plan = service(&repo, &[2]).student_plan(UserId::new(1)).await.unwrap();
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.entries[1].kind, PlanKind::Lln);
        assert_eq!(plan.overall_actual, Percentage::ZERO);
        assert_eq!(plan.overall_expected, Some(Percentage::clamped(50)));
    }
}
