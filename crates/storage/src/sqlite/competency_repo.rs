use lms_core::model::{Competency, CourseId, UserId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, course_id_from_i64, id_i64, lesson_id_from_i64, ser, user_id_from_i64};
use crate::repository::{CompetencyRepository, StorageError};

#[async_trait::async_trait]
impl CompetencyRepository for SqliteRepository {
    async fn upsert_competency(&self, competency: &Competency) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO competencies (user_id, course_id, lesson_id, started_at, ended_at, is_competent)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, course_id, lesson_id) DO UPDATE SET
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                is_competent = excluded.is_competent
            ",
        )
        .bind(id_i64("user_id", competency.user_id.value())?)
        .bind(id_i64("course_id", competency.course_id.value())?)
        .bind(id_i64("lesson_id", competency.lesson_id.value())?)
        .bind(competency.started_at)
        .bind(competency.ended_at)
        .bind(competency.is_competent)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn list_competencies(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<Competency>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT user_id, course_id, lesson_id, started_at, ended_at, is_competent
            FROM competencies
            WHERE user_id = ?1 AND course_id = ?2
            ORDER BY lesson_id ASC
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Competency {
                user_id: user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
                course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
                lesson_id: lesson_id_from_i64(row.try_get("lesson_id").map_err(ser)?)?,
                started_at: row.try_get("started_at").map_err(ser)?,
                ended_at: row.try_get("ended_at").map_err(ser)?,
                is_competent: row.try_get("is_competent").map_err(ser)?,
            });
        }
        Ok(out)
    }
}
