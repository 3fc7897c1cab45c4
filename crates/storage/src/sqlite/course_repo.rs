use lms_core::model::{Course, CourseId, CourseInfo, Lesson};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    conn, course_id_from_i64, from_json, id_i64, invalid, ser, to_json, u32_from_i64,
};
use crate::repository::{CourseRepository, StorageError};

#[async_trait::async_trait]
impl CourseRepository for SqliteRepository {
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError> {
        let info = course.info();
        let next_course_id = info
            .next_course_id
            .map(|id| id_i64("next_course_id", id.value()))
            .transpose()?;

        sqlx::query(
            r"
            INSERT INTO courses (
                id, title, category, length_days, auto_register_next_course,
                next_course_id, is_main_course, lessons
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                category = excluded.category,
                length_days = excluded.length_days,
                auto_register_next_course = excluded.auto_register_next_course,
                next_course_id = excluded.next_course_id,
                is_main_course = excluded.is_main_course,
                lessons = excluded.lessons
            ",
        )
        .bind(id_i64("course_id", info.id.value())?)
        .bind(info.title.clone())
        .bind(info.category.clone())
        .bind(i64::from(info.length_days))
        .bind(info.auto_register_next_course)
        .bind(next_course_id)
        .bind(info.is_main_course)
        .bind(to_json(&course.lessons())?)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, title, category, length_days, auto_register_next_course,
                   next_course_id, is_main_course, lessons
            FROM courses WHERE id = ?1
            ",
        )
        .bind(id_i64("course_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(course_from_row).transpose()
    }
}

fn course_from_row(row: &SqliteRow) -> Result<Course, StorageError> {
    let info = CourseInfo {
        id: course_id_from_i64(row.try_get("id").map_err(ser)?)?,
        title: row.try_get("title").map_err(ser)?,
        category: row.try_get("category").map_err(ser)?,
        length_days: u32_from_i64("length_days", row.try_get("length_days").map_err(ser)?)?,
        auto_register_next_course: row.try_get("auto_register_next_course").map_err(ser)?,
        next_course_id: row
            .try_get::<Option<i64>, _>("next_course_id")
            .map_err(ser)?
            .map(course_id_from_i64)
            .transpose()?,
        is_main_course: row.try_get("is_main_course").map_err(ser)?,
    };
    let lessons: Vec<Lesson> = from_json("lessons", &row.try_get::<String, _>("lessons").map_err(ser)?)?;
    Course::new(info, lessons).map_err(invalid)
}
