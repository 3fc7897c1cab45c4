use lms_core::model::{AdminReport, CourseId, EnrolmentStatus, Percentage, UserId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    company_id_from_i64, conn, course_id_from_i64, id_i64, invalid, ser, user_id_from_i64,
};
use crate::repository::{AdminReportRepository, StorageError};

const REPORT_COLUMNS: &str = r"
    student_id, course_id, student_name, student_email, student_active, company_id,
    company_name, trainer_names, leader_names, course_title, course_category,
    enrolment_status, course_start_at, course_ends_at, deferred, progress_percentage,
    source_updated_at
";

#[async_trait::async_trait]
impl AdminReportRepository for SqliteRepository {
    async fn upsert_report(&self, report: &AdminReport) -> Result<(), StorageError> {
        let company_id = report
            .company_id
            .map(|id| id_i64("company_id", id.value()))
            .transpose()?;

        sqlx::query(
            r"
            INSERT INTO admin_reports (
                student_id, course_id, student_name, student_email, student_active, company_id,
                company_name, trainer_names, leader_names, course_title, course_category,
                enrolment_status, course_start_at, course_ends_at, deferred, progress_percentage,
                source_updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(student_id, course_id) DO UPDATE SET
                student_name = excluded.student_name,
                student_email = excluded.student_email,
                student_active = excluded.student_active,
                company_id = excluded.company_id,
                company_name = excluded.company_name,
                trainer_names = excluded.trainer_names,
                leader_names = excluded.leader_names,
                course_title = excluded.course_title,
                course_category = excluded.course_category,
                enrolment_status = excluded.enrolment_status,
                course_start_at = excluded.course_start_at,
                course_ends_at = excluded.course_ends_at,
                deferred = excluded.deferred,
                progress_percentage = excluded.progress_percentage,
                source_updated_at = excluded.source_updated_at
            ",
        )
        .bind(id_i64("student_id", report.student_id.value())?)
        .bind(id_i64("course_id", report.course_id.value())?)
        .bind(report.student_name.clone())
        .bind(report.student_email.clone())
        .bind(report.student_active)
        .bind(company_id)
        .bind(report.company_name.clone())
        .bind(report.trainer_names.clone())
        .bind(report.leader_names.clone())
        .bind(report.course_title.clone())
        .bind(report.course_category.clone())
        .bind(report.enrolment_status.as_str())
        .bind(report.course_start_at)
        .bind(report.course_ends_at)
        .bind(report.deferred)
        .bind(report.progress_percentage.to_string())
        .bind(report.source_updated_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn get_report(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<AdminReport>, StorageError> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM admin_reports WHERE student_id = ?1 AND course_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("student_id", user_id.value())?)
            .bind(id_i64("course_id", course_id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(report_from_row).transpose()
    }

    async fn delete_report(&self, user_id: UserId, course_id: CourseId) -> Result<bool, StorageError> {
        let res = sqlx::query("DELETE FROM admin_reports WHERE student_id = ?1 AND course_id = ?2")
            .bind(id_i64("student_id", user_id.value())?)
            .bind(id_i64("course_id", course_id.value())?)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_reports_page(&self, offset: u64, limit: u32) -> Result<Vec<AdminReport>, StorageError> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM admin_reports ORDER BY student_id ASC, course_id ASC LIMIT ?1 OFFSET ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .bind(id_i64("offset", offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        rows.iter().map(report_from_row).collect()
    }
}

fn report_from_row(row: &SqliteRow) -> Result<AdminReport, StorageError> {
    let status: EnrolmentStatus = row
        .try_get::<String, _>("enrolment_status")
        .map_err(ser)?
        .parse()
        .map_err(invalid)?;
    let percentage: Percentage = row
        .try_get::<String, _>("progress_percentage")
        .map_err(ser)?
        .parse()
        .map_err(invalid)?;

    Ok(AdminReport {
        student_id: user_id_from_i64(row.try_get("student_id").map_err(ser)?)?,
        course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        student_name: row.try_get("student_name").map_err(ser)?,
        student_email: row.try_get("student_email").map_err(ser)?,
        student_active: row.try_get("student_active").map_err(ser)?,
        company_id: row
            .try_get::<Option<i64>, _>("company_id")
            .map_err(ser)?
            .map(company_id_from_i64)
            .transpose()?,
        company_name: row.try_get("company_name").map_err(ser)?,
        trainer_names: row.try_get("trainer_names").map_err(ser)?,
        leader_names: row.try_get("leader_names").map_err(ser)?,
        course_title: row.try_get("course_title").map_err(ser)?,
        course_category: row.try_get("course_category").map_err(ser)?,
        enrolment_status: status,
        course_start_at: row.try_get("course_start_at").map_err(ser)?,
        course_ends_at: row.try_get("course_ends_at").map_err(ser)?,
        deferred: row.try_get("deferred").map_err(ser)?,
        progress_percentage: percentage,
        source_updated_at: row.try_get("source_updated_at").map_err(ser)?,
    })
}
