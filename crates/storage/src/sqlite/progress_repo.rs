use lms_core::model::{CourseId, CourseProgress, Percentage, ProgressDetails, UserId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{
    conn, course_id_from_i64, from_json, id_i64, invalid, ser, to_json, user_id_from_i64,
};
use crate::repository::{ProgressRepository, StorageError};

pub(crate) async fn write_progress(
    conn_ref: &mut sqlx::SqliteConnection,
    progress: &CourseProgress,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        INSERT INTO course_progress (user_id, course_id, details, percentage, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(user_id, course_id) DO UPDATE SET
            details = excluded.details,
            percentage = excluded.percentage,
            updated_at = excluded.updated_at
        ",
    )
    .bind(id_i64("user_id", progress.user_id.value())?)
    .bind(id_i64("course_id", progress.course_id.value())?)
    .bind(to_json(&progress.details)?)
    .bind(progress.percentage.to_string())
    .bind(progress.updated_at)
    .execute(&mut *conn_ref)
    .await
    .map_err(conn)?;
    Ok(())
}

/// Inserts the row unless the pair already has one.
pub(crate) async fn insert_progress_if_missing(
    conn_ref: &mut sqlx::SqliteConnection,
    progress: &CourseProgress,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        INSERT INTO course_progress (user_id, course_id, details, percentage, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(user_id, course_id) DO NOTHING
        ",
    )
    .bind(id_i64("user_id", progress.user_id.value())?)
    .bind(id_i64("course_id", progress.course_id.value())?)
    .bind(to_json(&progress.details)?)
    .bind(progress.percentage.to_string())
    .bind(progress.updated_at)
    .execute(&mut *conn_ref)
    .await
    .map_err(conn)?;
    Ok(())
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT user_id, course_id, details, percentage, updated_at
            FROM course_progress WHERE user_id = ?1 AND course_id = ?2
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let details: ProgressDetails =
            from_json("details", &row.try_get::<String, _>("details").map_err(ser)?)?;
        let percentage: Percentage = row
            .try_get::<String, _>("percentage")
            .map_err(ser)?
            .parse()
            .map_err(invalid)?;

        Ok(Some(CourseProgress {
            user_id: user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
            course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
            details,
            percentage,
            updated_at: row.try_get("updated_at").map_err(ser)?,
        }))
    }

    async fn upsert_progress(&self, progress: &CourseProgress) -> Result<(), StorageError> {
        let mut c = self.pool.acquire().await.map_err(conn)?;
        write_progress(&mut c, progress).await
    }
}
