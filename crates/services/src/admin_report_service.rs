use std::sync::Arc;

use lms_core::model::{AdminReport, CourseId, Percentage, ReportSources, UserId};
use storage::repository::{
    AdminReportRepository, CourseRepository, EnrolmentRepository, ProgressRepository,
    UserRepository,
};
use tracing::{debug, info};

use crate::error::ReportSyncError;

/// What a sync did to the report row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportSync {
    Upserted(Box<AdminReport>),
    /// The enrolment is gone, so the row was dropped.
    Removed,
}

/// Rebuilds `admin_reports` rows from the source tables.
///
/// Writes are last-write-wins. A sync is a pure function of the current
/// source rows, so repeating it without intervening changes is a no-op.
#[derive(Clone)]
pub struct AdminReportService {
    users: Arc<dyn UserRepository>,
    courses: Arc<dyn CourseRepository>,
    enrolments: Arc<dyn EnrolmentRepository>,
    progress: Arc<dyn ProgressRepository>,
    reports: Arc<dyn AdminReportRepository>,
}

impl AdminReportService {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserRepository>,
        courses: Arc<dyn CourseRepository>,
        enrolments: Arc<dyn EnrolmentRepository>,
        progress: Arc<dyn ProgressRepository>,
        reports: Arc<dyn AdminReportRepository>,
    ) -> Self {
        Self {
            users,
            courses,
            enrolments,
            progress,
            reports,
        }
    }

    /// Rebuilds the row for one (student, course).
    ///
    /// # Errors
    ///
    /// Returns `ReportSyncError::UserNotFound` or `CourseNotFound` for unknown ids.
    /// Returns `ReportSyncError::Storage` if reads or the write fail.
    pub async fn sync(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<ReportSync, ReportSyncError> {
        let student = self
            .users
            .get_user(user_id)
            .await?
            .ok_or(ReportSyncError::UserNotFound(user_id))?;
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or(ReportSyncError::CourseNotFound(course_id))?;

        let Some(enrolment) = self.enrolments.get_enrolment(user_id, course_id).await? else {
            self.reports.delete_report(user_id, course_id).await?;
            debug!(user = %user_id, course = %course_id, "no enrolment; report row removed");
            return Ok(ReportSync::Removed);
        };

        let company = match student.company_id {
            Some(company_id) => self.users.get_company(company_id).await?,
            None => None,
        };
        let assignment = self.users.get_assignment(user_id).await?;
        let trainers = self.users.get_users(&assignment.trainer_ids).await?;
        let leaders = self.users.get_users(&assignment.leader_ids).await?;
        let progress = self.progress.get_progress(user_id, course_id).await?;

        let report = AdminReport::build(ReportSources {
            student: &student,
            company: company.as_ref(),
            trainers: &trainers,
            leaders: &leaders,
            course: course.info(),
            enrolment: &enrolment,
            percentage: progress.as_ref().map_or(Percentage::ZERO, |p| p.percentage),
            progress_updated_at: progress.as_ref().map(|p| p.updated_at),
        });
        self.reports.upsert_report(&report).await?;
        debug!(user = %user_id, course = %course_id, "report row synced");
        Ok(ReportSync::Upserted(Box::new(report)))
    }

    /// Syncs every enrolment of the student and returns how many rows were written.
    ///
    /// # Errors
    ///
    /// Returns `ReportSyncError` on the first failing course.
    pub async fn sync_student(&self, user_id: UserId) -> Result<usize, ReportSyncError> {
        let mut written = 0;
        for enrolment in self.enrolments.list_enrolments_for_user(user_id).await? {
            if let ReportSync::Upserted(_) = self.sync(user_id, enrolment.course_id).await? {
                written += 1;
            }
        }
        info!(user = %user_id, rows = written, "student reports synced");
        Ok(written)
    }

    /// # Errors
    ///
    /// Returns `ReportSyncError::Storage` if the delete fails.
    pub async fn remove(&self, user_id: UserId, course_id: CourseId) -> Result<bool, ReportSyncError> {
        Ok(self.reports.delete_report(user_id, course_id).await?)
    }
}
