use lms_core::model::{ActivityEvent, ActivityKind, CourseId, UserId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, course_id_from_i64, id_i64, lesson_id_from_i64, ser, user_id_from_i64};
use crate::repository::{ActivityRepository, StorageError};

#[async_trait::async_trait]
impl ActivityRepository for SqliteRepository {
    async fn append_activity(&self, event: &ActivityEvent) -> Result<(), StorageError> {
        let lesson_id = event
            .lesson_id
            .map(|id| id_i64("lesson_id", id.value()))
            .transpose()?;

        sqlx::query(
            r"
            INSERT INTO activity_log (user_id, course_id, lesson_id, kind, occurred_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(id_i64("user_id", event.user_id.value())?)
        .bind(id_i64("course_id", event.course_id.value())?)
        .bind(lesson_id)
        .bind(event.kind.as_str())
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn list_activity(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<ActivityEvent>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT user_id, course_id, lesson_id, kind, occurred_at
            FROM activity_log
            WHERE user_id = ?1 AND course_id = ?2
            ORDER BY occurred_at ASC, id ASC
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .bind(id_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: ActivityKind = row
                .try_get::<String, _>("kind")
                .map_err(ser)?
                .parse()
                .map_err(ser)?;
            events.push(ActivityEvent {
                user_id: user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
                course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
                lesson_id: row
                    .try_get::<Option<i64>, _>("lesson_id")
                    .map_err(ser)?
                    .map(lesson_id_from_i64)
                    .transpose()?,
                kind,
                occurred_at: row.try_get("occurred_at").map_err(ser)?,
            });
        }
        Ok(events)
    }
}
