use lms_core::model::UserId;

use super::SqliteRepository;
use super::mapping::{conn, id_i64};
use crate::repository::{PurgeSummary, StorageError, StudentDataRepository};

/// Tables keyed by the student, with the column that holds the student id.
const OWNED_TABLES: &[(&str, &str)] = &[
    ("student_course_enrolments", "user_id"),
    ("course_progress", "user_id"),
    ("quiz_attempts", "user_id"),
    ("activity_log", "user_id"),
    ("competencies", "user_id"),
    ("admin_reports", "student_id"),
    ("work_placements", "user_id"),
];

#[async_trait::async_trait]
impl StudentDataRepository for SqliteRepository {
    async fn purge_student(&self, user_id: UserId) -> Result<PurgeSummary, StorageError> {
        let id = id_i64("user_id", user_id.value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let exists = sqlx::query("SELECT 1 FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }

        let mut counts = Vec::with_capacity(OWNED_TABLES.len());
        for (table, column) in OWNED_TABLES {
            let sql = format!("DELETE FROM {table} WHERE {column} = ?1");
            let res = sqlx::query(&sql)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            counts.push(res.rows_affected());
        }

        let notes = sqlx::query("DELETE FROM notes WHERE subject_kind = 'student' AND subject_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?
            .rows_affected();

        sqlx::query("DELETE FROM student_assignments WHERE student_id = ?1 OR staff_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        let users = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?
            .rows_affected();

        tx.commit().await.map_err(conn)?;

        Ok(PurgeSummary {
            users,
            enrolments: counts[0],
            progress: counts[1],
            attempts: counts[2],
            activities: counts[3],
            competencies: counts[4],
            reports: counts[5],
            notes,
            placements: counts[6],
        })
    }
}
