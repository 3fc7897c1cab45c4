use lms_core::model::{FieldChange, UserId, WorkPlacement, WorkPlacementId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    conn, course_id_from_i64, from_json, id_i64, placement_id_from_i64, ser, to_json,
    user_id_from_i64,
};
use crate::repository::{StorageError, WorkPlacementRepository};

const PLACEMENT_COLUMNS: &str = r"
    id, user_id, course_id, employer_name, contact_name, contact_email, contact_phone,
    start_date, end_date, field_changes, created_at
";

#[async_trait::async_trait]
impl WorkPlacementRepository for SqliteRepository {
    async fn insert_new_placement(
        &self,
        placement: &WorkPlacement,
    ) -> Result<WorkPlacementId, StorageError> {
        placement.validate().map_err(ser)?;

        let res = sqlx::query(
            r"
            INSERT INTO work_placements (
                user_id, course_id, employer_name, contact_name, contact_email, contact_phone,
                start_date, end_date, field_changes, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
        )
        .bind(id_i64("user_id", placement.user_id.value())?)
        .bind(id_i64("course_id", placement.course_id.value())?)
        .bind(placement.employer_name.clone())
        .bind(placement.contact_name.clone())
        .bind(placement.contact_email.clone())
        .bind(placement.contact_phone.clone())
        .bind(placement.start_date)
        .bind(placement.end_date)
        .bind(to_json(&placement.field_changes)?)
        .bind(placement.created_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        placement_id_from_i64(res.last_insert_rowid())
    }

    async fn update_placement(&self, placement: &WorkPlacement) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE work_placements
            SET employer_name = ?2,
                contact_name = ?3,
                contact_email = ?4,
                contact_phone = ?5,
                start_date = ?6,
                end_date = ?7,
                field_changes = ?8
            WHERE id = ?1
            ",
        )
        .bind(id_i64("placement_id", placement.id.value())?)
        .bind(placement.employer_name.clone())
        .bind(placement.contact_name.clone())
        .bind(placement.contact_email.clone())
        .bind(placement.contact_phone.clone())
        .bind(placement.start_date)
        .bind(placement.end_date)
        .bind(to_json(&placement.field_changes)?)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_placement(&self, id: WorkPlacementId) -> Result<Option<WorkPlacement>, StorageError> {
        let sql = format!("SELECT {PLACEMENT_COLUMNS} FROM work_placements WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("placement_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(placement_from_row).transpose()
    }

    async fn list_placements(&self, user_id: UserId) -> Result<Vec<WorkPlacement>, StorageError> {
        let sql = format!(
            "SELECT {PLACEMENT_COLUMNS} FROM work_placements WHERE user_id = ?1 ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(id_i64("user_id", user_id.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        rows.iter().map(placement_from_row).collect()
    }
}

fn placement_from_row(row: &SqliteRow) -> Result<WorkPlacement, StorageError> {
    let field_changes: Vec<FieldChange> = from_json(
        "field_changes",
        &row.try_get::<String, _>("field_changes").map_err(ser)?,
    )?;

    Ok(WorkPlacement {
        id: placement_id_from_i64(row.try_get("id").map_err(ser)?)?,
        user_id: user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        course_id: course_id_from_i64(row.try_get("course_id").map_err(ser)?)?,
        employer_name: row.try_get("employer_name").map_err(ser)?,
        contact_name: row.try_get("contact_name").map_err(ser)?,
        contact_email: row.try_get("contact_email").map_err(ser)?,
        contact_phone: row.try_get("contact_phone").map_err(ser)?,
        start_date: row.try_get("start_date").map_err(ser)?,
        end_date: row.try_get("end_date").map_err(ser)?,
        field_changes,
        created_at: row.try_get("created_at").map_err(ser)?,
    })
}
