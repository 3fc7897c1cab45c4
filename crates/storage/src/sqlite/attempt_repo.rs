use lms_core::model::{
    AttemptError, AttemptId, AttemptStatus, CourseId, QuizAttempt, SystemResult, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    attempt_id_from_i64, conn, course_id_from_i64, from_json, id_i64, invalid, quiz_id_from_i64, ser,
    to_json, u32_from_i64, user_id_from_i64,
};
use crate::repository::{NewAttemptRecord, QuizAttemptRepository, StorageError};

#[async_trait::async_trait]
impl QuizAttemptRepository for SqliteRepository {
    async fn insert_new_attempt(&self, attempt: NewAttemptRecord) -> Result<AttemptId, StorageError> {
        if attempt.attempt == 0 {
            return Err(ser(AttemptError::InvalidAttemptNumber));
        }
        let res = sqlx::query(
            r"
            INSERT INTO quiz_attempts (
                user_id, course_id, quiz_id, attempt, answers, system_result,
                status, submitted_at, evaluated_at, created_at
            )
            VALUES (?1, ?2, ?3, ?4, 'null', ?5, ?6, NULL, NULL, ?7)
            ",
        )
        .bind(id_i64("user_id", attempt.user_id.value())?)
        .bind(id_i64("course_id", attempt.course_id.value())?)
        .bind(id_i64("quiz_id", attempt.quiz_id.value())?)
        .bind(i64::from(attempt.attempt))
        .bind(SystemResult::InProgress.as_str())
        .bind(AttemptStatus::Attempting.as_str())
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        attempt_id_from_i64(res.last_insert_rowid())
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<Option<QuizAttempt>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, course_id, quiz_id, attempt, answers, system_result,
                   status, submitted_at, evaluated_at, created_at
            FROM quiz_attempts WHERE id = ?1
            ",
        )
        .bind(id_i64("attempt_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(attempt_from_row).transpose()
    }

    async fn upsert_attempt(&self, attempt: &QuizAttempt) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO quiz_attempts (
                id, user_id, course_id, quiz_id, attempt, answers, system_result,
                status, submitted_at, evaluated_at, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                answers = excluded.answers,
                system_result = excluded.system_result,
                status = excluded.status,
                submitted_at = excluded.submitted_at,
                evaluated_at = excluded.evaluated_at
            ",
        )
        .bind(id_i64("attempt_id", attempt.id.value())?)
        .bind(id_i64("user_id", attempt.user_id.value())?)
        .bind(id_i64("course_id", attempt.course_id.value())?)
        .bind(id_i64("quiz_id", attempt.quiz_id.value())?)
        .bind(i64::from(attempt.attempt))
        .bind(to_json(&attempt.answers)?)
        .bind(attempt.system_result().as_str())
        .bind(attempt.status().as_str())
        .bind(attempt.submitted_at)
        .bind(attempt.evaluated_at)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn list_attempts(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<QuizAttempt>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, course_id, quiz_id, attempt, answers, system_result,
                   status, submitted_at, evaluated_at, created_at
            FROM quiz_attempts
            WHERE user_id = ?1 AND course_id = ?2
            ORDER BY id ASC
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(attempt_from_row).collect()
    }
}

fn attempt_from_row(row: &SqliteRow) -> Result<QuizAttempt, StorageError> {
    let status: AttemptStatus = row
        .try_get::<String, _>("status")
        .map_err(ser)?
        .parse()
        .map_err(invalid)?;
    let system_result: SystemResult = row
        .try_get::<String, _>("system_result")
        .map_err(ser)?
        .parse()
        .map_err(invalid)?;

    Ok(QuizAttempt::from_persisted(
        attempt_id_from_i64(row.try_get("id").map_err(ser)?)?,
        user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        quiz_id_from_i64(row.try_get("quiz_id").map_err(ser)?)?,
        u32_from_i64("attempt", row.try_get("attempt").map_err(ser)?)?,
        from_json("answers", &row.try_get::<String, _>("answers").map_err(ser)?)?,
        status,
        system_result,
        row.try_get("submitted_at").map_err(ser)?,
        row.try_get("evaluated_at").map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
    ))
}
