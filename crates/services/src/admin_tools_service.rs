use std::sync::Arc;

use lms_core::model::{CourseId, Percentage, UserId, parse_id_list};
use lms_core::training_plan::PlanKind;
use serde::Serialize;
use storage::repository::{
    EnrolmentRepository, PurgeSummary, StorageError, StudentDataRepository, UserRepository,
};
use tracing::{info, warn};

use crate::admin_report_service::AdminReportService;
use crate::course_progress_service::CourseProgressService;
use crate::error::AdminToolError;
use crate::lesson_date_service::{CompetencyMismatch, LessonDateService};
use crate::training_plan_service::TrainingPlanService;

/// Points two percentages may differ by before they count as disagreeing.
pub const PARITY_TOLERANCE: u8 = 1;

/// Outcome for one user of `sync_student_profiles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSyncResult {
    pub user_id: UserId,
    pub success: bool,
    pub courses_synced: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSyncReport {
    /// True only when every user synced.
    pub success: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ProfileSyncResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub success: bool,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub plan_kind: PlanKind,
    pub aggregator_percentage: Percentage,
    pub training_plan_percentage: Percentage,
    /// `None` for LLN/PTR courses, which follow their own rule.
    pub calculators_agree: Option<bool>,
    pub stored_percentage: Option<Percentage>,
    pub stored_matches_fresh: bool,
    pub competency_mismatches: Vec<CompetencyMismatch>,
    pub mismatches: Vec<String>,
}

impl ConsistencyReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub success: bool,
    pub user_id: UserId,
    pub removed: PurgeSummary,
}

/// Back-office maintenance operations behind the admin tool endpoints.
#[derive(Clone)]
pub struct AdminToolsService {
    users: Arc<dyn UserRepository>,
    enrolments: Arc<dyn EnrolmentRepository>,
    student_data: Arc<dyn StudentDataRepository>,
    progress: Arc<CourseProgressService>,
    plans: Arc<TrainingPlanService>,
    reports: Arc<AdminReportService>,
    lesson_dates: Arc<LessonDateService>,
}

impl AdminToolsService {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserRepository>,
        enrolments: Arc<dyn EnrolmentRepository>,
        student_data: Arc<dyn StudentDataRepository>,
        progress: Arc<CourseProgressService>,
        plans: Arc<TrainingPlanService>,
        reports: Arc<AdminReportService>,
        lesson_dates: Arc<LessonDateService>,
    ) -> Self {
        Self {
            users,
            enrolments,
            student_data,
            progress,
            plans,
            reports,
            lesson_dates,
        }
    }

    /// Recomputes progress, competencies and report rows for each listed user.
    ///
    /// The whole list is parsed before anything is touched. One user's failure
    /// is recorded in their result and the run moves on.
    ///
    /// # Errors
    ///
    /// Returns `AdminToolError::BadRequest` for a malformed or empty id list.
    pub async fn sync_student_profiles(
        &self,
        raw_ids: &str,
    ) -> Result<ProfileSyncReport, AdminToolError> {
        let user_ids = parse_id_list::<UserId>(raw_ids)?;
        if user_ids.is_empty() {
            return Err(AdminToolError::BadRequest("no user ids given".into()));
        }

        let mut results = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            let result = match self.sync_profile(user_id).await {
                Ok(courses_synced) => ProfileSyncResult {
                    user_id,
                    success: true,
                    courses_synced,
                    message: None,
                },
                Err(err) => {
                    warn!(user = %user_id, error = %err, "profile sync failed");
                    ProfileSyncResult {
                        user_id,
                        success: false,
                        courses_synced: 0,
                        message: Some(err.to_string()),
                    }
                }
            };
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        info!(succeeded, failed, "student profiles synced");
        Ok(ProfileSyncReport {
            success: failed == 0,
            succeeded,
            failed,
            results,
        })
    }

    async fn sync_profile(&self, user_id: UserId) -> Result<usize, AdminToolError> {
        self.require_user(user_id).await?;
        let enrolments = self.enrolments.list_enrolments_for_user(user_id).await?;
        for enrolment in &enrolments {
            self.progress.recalculate(user_id, enrolment.course_id).await?;
            self.lesson_dates.sync_enrolment(enrolment).await?;
        }
        self.reports.sync_student(user_id).await?;
        Ok(enrolments.len())
    }

    /// Cross-checks the calculators for one enrolment.
    ///
    /// Disagreements are listed in the report; they never make the call fail.
    ///
    /// # Errors
    ///
    /// Returns `AdminToolError::NotFound` for an unknown user, course or
    /// enrolment.
    pub async fn test_service_consistency(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<ConsistencyReport, AdminToolError> {
        self.require_user(user_id).await?;
        self.progress.course(course_id).await?;
        let enrolment = self
            .enrolments
            .get_enrolment(user_id, course_id)
            .await?
            .ok_or_else(|| {
                AdminToolError::NotFound(format!("user {user_id} is not enrolled in course {course_id}"))
            })?;

        let fresh = self.progress.preview(user_id, course_id).await?;
        let entry = self.plans.course_entry(user_id, course_id).await?;
        let competency_mismatches = self.lesson_dates.competency_mismatches(&enrolment).await?;

        let aggregator = fresh.progress.percentage;
        let mut mismatches = Vec::new();

        let calculators_agree = (entry.kind == PlanKind::Standard)
            .then(|| aggregator.distance(entry.actual) <= PARITY_TOLERANCE);
        if calculators_agree == Some(false) {
            mismatches.push(format!(
                "aggregator reports {aggregator}% but training plan reports {}%",
                entry.actual
            ));
        }

        let stored_matches_fresh = fresh.previous == Some(aggregator);
        if !stored_matches_fresh {
            mismatches.push(match fresh.previous {
                Some(stored) => format!("stored percentage {stored}% differs from fresh {aggregator}%"),
                None => "no stored progress row".to_string(),
            });
        }

        for m in &competency_mismatches {
            mismatches.push(match m.stored_start {
                Some(stored) => format!(
                    "lesson {} competency starts {stored} but resolves to {}",
                    m.lesson_id, m.resolved_start
                ),
                None => format!("lesson {} has no competency row", m.lesson_id),
            });
        }

        for message in &mismatches {
            warn!(user = %user_id, course = %course_id, "{message}");
        }

        Ok(ConsistencyReport {
            success: true,
            user_id,
            course_id,
            plan_kind: entry.kind,
            aggregator_percentage: aggregator,
            training_plan_percentage: entry.actual,
            calculators_agree,
            stored_percentage: fresh.previous,
            stored_matches_fresh,
            competency_mismatches,
            mismatches,
        })
    }

    /// Deletes the student and everything they own.
    ///
    /// # Errors
    ///
    /// Returns `AdminToolError::NotFound` when the user does not exist.
    pub async fn purge_student(&self, user_id: UserId) -> Result<PurgeReport, AdminToolError> {
        let removed = self
            .student_data
            .purge_student(user_id)
            .await
            .map_err(|err| match err {
                StorageError::NotFound => AdminToolError::NotFound(format!("user {user_id} not found")),
                other => other.into(),
            })?;
        info!(user = %user_id, enrolments = removed.enrolments, "student purged");
        Ok(PurgeReport {
            success: true,
            user_id,
            removed,
        })
    }

    async fn require_user(&self, user_id: UserId) -> Result<(), AdminToolError> {
        match self.users.get_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(AdminToolError::NotFound(format!("user {user_id} not found"))),
        }
    }
}
