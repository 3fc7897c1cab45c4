use lms_core::model::{
    CourseId, CourseProgress, EnrolmentStatus, NewEnrolment, Percentage, StudentAssignment,
    StudentCourseEnrolment, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    conn, course_id_from_i64, enrolment_id_from_i64, id_i64, invalid, ser, user_id_from_i64, write_err,
};
use super::progress_repo::{insert_progress_if_missing, write_progress};
use super::user_repo::{insert_user, replace_assignment};
use crate::repository::{
    AssignmentRecord, EnrolmentRepository, SignupOutcome, SignupRecord, StorageError,
};

const ENROLMENT_COLUMNS: &str = r"
    id, user_id, course_id, course_start_at, course_ends_at, status, deferred_at,
    is_chargeable, registered_by_link, certificate_issued_at, updated_at
";

async fn insert_enrolment_row(
    conn_ref: &mut sqlx::SqliteConnection,
    enrolment: NewEnrolment,
) -> Result<StudentCourseEnrolment, StorageError> {
    enrolment.validate().map_err(ser)?;

    let res = sqlx::query(
        r"
        INSERT INTO student_course_enrolments (
            user_id, course_id, course_start_at, course_ends_at, status, deferred_at,
            is_chargeable, registered_by_link, certificate_issued_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, NULL, ?8)
        ",
    )
    .bind(id_i64("user_id", enrolment.user_id.value())?)
    .bind(id_i64("course_id", enrolment.course_id.value())?)
    .bind(enrolment.course_start_at)
    .bind(enrolment.course_ends_at)
    .bind(EnrolmentStatus::Enrolled.as_str())
    .bind(enrolment.is_chargeable)
    .bind(enrolment.registered_by_link)
    .bind(enrolment.created_at)
    .execute(&mut *conn_ref)
    .await
    .map_err(write_err)?;

    let id = enrolment_id_from_i64(res.last_insert_rowid())?;
    Ok(enrolment.assign_id(id))
}

#[async_trait::async_trait]
impl EnrolmentRepository for SqliteRepository {
    async fn insert_enrolment(
        &self,
        enrolment: NewEnrolment,
    ) -> Result<StudentCourseEnrolment, StorageError> {
        let mut c = self.pool.acquire().await.map_err(conn)?;
        insert_enrolment_row(&mut c, enrolment).await
    }

    async fn update_enrolment(&self, enrolment: &StudentCourseEnrolment) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE student_course_enrolments SET
                course_start_at = ?2,
                course_ends_at = ?3,
                status = ?4,
                deferred_at = ?5,
                is_chargeable = ?6,
                registered_by_link = ?7,
                certificate_issued_at = ?8,
                updated_at = ?9
            WHERE id = ?1
            ",
        )
        .bind(id_i64("enrolment_id", enrolment.id.value())?)
        .bind(enrolment.course_start_at)
        .bind(enrolment.course_ends_at)
        .bind(enrolment.status.as_str())
        .bind(enrolment.deferred_at)
        .bind(enrolment.is_chargeable)
        .bind(enrolment.registered_by_link)
        .bind(enrolment.certificate_issued_at)
        .bind(enrolment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_enrolment(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<StudentCourseEnrolment>, StorageError> {
        let sql = format!(
            "SELECT {ENROLMENT_COLUMNS} FROM student_course_enrolments WHERE user_id = ?1 AND course_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("user_id", user_id.value())?)
            .bind(id_i64("course_id", course_id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(enrolment_from_row).transpose()
    }

    async fn list_enrolments_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<StudentCourseEnrolment>, StorageError> {
        let sql = format!(
            "SELECT {ENROLMENT_COLUMNS} FROM student_course_enrolments WHERE user_id = ?1 ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(id_i64("user_id", user_id.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        rows.iter().map(enrolment_from_row).collect()
    }

    async fn list_enrolments_page(
        &self,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<StudentCourseEnrolment>, StorageError> {
        let sql = format!(
            "SELECT {ENROLMENT_COLUMNS} FROM student_course_enrolments ORDER BY id ASC LIMIT ?1 OFFSET ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .bind(id_i64("offset", offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        rows.iter().map(enrolment_from_row).collect()
    }

    async fn commit_signup(&self, signup: SignupRecord) -> Result<SignupOutcome, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let student_id = insert_user(&mut tx, &signup.student).await?;
        let mut assignment = StudentAssignment::empty(student_id);
        assignment.leader_ids.extend(signup.leader_id);
        replace_assignment(&mut tx, &assignment).await?;

        let mut enrolments = Vec::with_capacity(signup.plan.entries.len());
        for new in signup
            .plan
            .into_new_enrolments(student_id, signup.is_chargeable, signup.created_at)
        {
            enrolments.push(insert_enrolment_row(&mut tx, new).await?);
        }

        for (course_id, details) in signup.initial_progress {
            let progress = CourseProgress {
                user_id: student_id,
                course_id,
                details,
                percentage: Percentage::ZERO,
                updated_at: signup.created_at,
            };
            write_progress(&mut tx, &progress).await?;
        }

        // Dropping `tx` on an early return rolls everything back.
        tx.commit().await.map_err(conn)?;
        Ok(SignupOutcome {
            student_id,
            enrolments,
        })
    }

    async fn commit_assignment(
        &self,
        assignment: AssignmentRecord,
    ) -> Result<StudentCourseEnrolment, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let enrolment = insert_enrolment_row(&mut tx, assignment.enrolment).await?;
        let progress = CourseProgress {
            user_id: enrolment.user_id,
            course_id: enrolment.course_id,
            details: assignment.initial_progress,
            percentage: Percentage::ZERO,
            updated_at: enrolment.updated_at,
        };
        insert_progress_if_missing(&mut tx, &progress).await?;
        tx.commit().await.map_err(conn)?;
        Ok(enrolment)
    }
}

fn enrolment_from_row(row: &SqliteRow) -> Result<StudentCourseEnrolment, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    Ok(StudentCourseEnrolment {
        id: enrolment_id_from_i64(row.try_get("id").map_err(ser)?)?,
        user_id: user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        course_start_at: row.try_get("course_start_at").map_err(ser)?,
        course_ends_at: row.try_get("course_ends_at").map_err(ser)?,
        status: status.parse::<EnrolmentStatus>().map_err(invalid)?,
        deferred_at: row.try_get("deferred_at").map_err(ser)?,
        is_chargeable: row.try_get("is_chargeable").map_err(ser)?,
        registered_by_link: row.try_get("registered_by_link").map_err(ser)?,
        certificate_issued_at: row.try_get("certificate_issued_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}
