use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::course::CourseInfo;
use crate::model::enrolment::{EnrolmentStatus, StudentCourseEnrolment};
use crate::model::ids::{CompanyId, CourseId, UserId};
use crate::model::progress::Percentage;
use crate::model::user::{Company, User};

/// Denormalised (student, course) row for fast admin listing.
///
/// Always rebuildable from source tables; never the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminReport {
    pub student_id: UserId,
    pub course_id: CourseId,
    pub student_name: String,
    pub student_email: String,
    pub student_active: bool,
    pub company_id: Option<CompanyId>,
    pub company_name: Option<String>,
    pub trainer_names: String,
    pub leader_names: String,
    pub course_title: String,
    pub course_category: Option<String>,
    pub enrolment_status: EnrolmentStatus,
    pub course_start_at: DateTime<Utc>,
    pub course_ends_at: DateTime<Utc>,
    pub deferred: bool,
    pub progress_percentage: Percentage,
    /// Latest `updated_at` among the sources the row was built from.
    pub source_updated_at: DateTime<Utc>,
}

/// Everything a report row is derived from.
#[derive(Debug, Clone, Copy)]
pub struct ReportSources<'a> {
    pub student: &'a User,
    pub company: Option<&'a Company>,
    pub trainers: &'a [User],
    pub leaders: &'a [User],
    pub course: &'a CourseInfo,
    pub enrolment: &'a StudentCourseEnrolment,
    pub percentage: Percentage,
    pub progress_updated_at: Option<DateTime<Utc>>,
}

impl AdminReport {
    /// Pure projection of the sources; the same inputs always give the same row.
    #[must_use]
    pub fn build(sources: ReportSources<'_>) -> Self {
        let enrolment = sources.enrolment;
        let source_updated_at = sources
            .progress_updated_at
            .map_or(enrolment.updated_at, |p| p.max(enrolment.updated_at));

        Self {
            student_id: sources.student.id,
            course_id: sources.course.id,
            student_name: sources.student.full_name(),
            student_email: sources.student.email.trim().to_lowercase(),
            student_active: sources.student.is_active,
            company_id: sources.company.map(|c| c.id),
            company_name: sources.company.map(|c| c.name.clone()),
            trainer_names: joined_names(sources.trainers),
            leader_names: joined_names(sources.leaders),
            course_title: sources.course.title.clone(),
            course_category: sources.course.category.clone(),
            enrolment_status: enrolment.status,
            course_start_at: enrolment.course_start_at,
            course_ends_at: enrolment.course_ends_at,
            deferred: enrolment.is_deferred(),
            progress_percentage: sources.percentage,
            source_updated_at,
        }
    }
}

fn joined_names(users: &[User]) -> String {
    let mut sorted: Vec<&User> = users.iter().collect();
    sorted.sort_by_key(|u| u.id);
    sorted.dedup_by_key(|u| u.id);
    sorted
        .iter()
        .map(|u| u.full_name())
        .collect::<Vec<_>>()
        .join(", ")
}
