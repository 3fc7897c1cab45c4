use lms_core::model::{Note, NoteId, NoteSubject, PinLogEntry};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    conn, from_json, i64_to_u64, id_i64, invalid, note_id_from_i64, ser, to_json, user_id_from_i64,
};
use crate::repository::{NewNoteRecord, NoteRepository, StorageError};

#[async_trait::async_trait]
impl NoteRepository for SqliteRepository {
    async fn insert_new_note(&self, note: NewNoteRecord) -> Result<NoteId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO notes (subject_kind, subject_id, author_id, body, is_pinned, pin_log, created_at)
            VALUES (?1, ?2, ?3, ?4, 0, '[]', ?5)
            ",
        )
        .bind(note.subject.kind())
        .bind(id_i64("subject_id", note.subject.raw_id())?)
        .bind(id_i64("author_id", note.author_id.value())?)
        .bind(note.body)
        .bind(note.created_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        note_id_from_i64(res.last_insert_rowid())
    }

    async fn update_note(&self, note: &Note) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE notes SET body = ?2, is_pinned = ?3, pin_log = ?4
            WHERE id = ?1
            ",
        )
        .bind(id_i64("note_id", note.id.value())?)
        .bind(note.body.clone())
        .bind(note.is_pinned())
        .bind(to_json(&note.pin_log())?)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_note(&self, id: NoteId) -> Result<Option<Note>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, subject_kind, subject_id, author_id, body, is_pinned, pin_log, created_at
            FROM notes WHERE id = ?1
            ",
        )
        .bind(id_i64("note_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(note_from_row).transpose()
    }

    async fn list_notes(&self, subject: NoteSubject) -> Result<Vec<Note>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, subject_kind, subject_id, author_id, body, is_pinned, pin_log, created_at
            FROM notes
            WHERE subject_kind = ?1 AND subject_id = ?2
            ORDER BY created_at DESC, id DESC
            ",
        )
        .bind(subject.kind())
        .bind(id_i64("subject_id", subject.raw_id())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(note_from_row).collect()
    }

    async fn count_pinned(&self, subject: NoteSubject) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM notes
            WHERE subject_kind = ?1 AND subject_id = ?2 AND is_pinned = 1
            ",
        )
        .bind(subject.kind())
        .bind(id_i64("subject_id", subject.raw_id())?)
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;

        usize::try_from(count).map_err(ser)
    }
}

fn note_from_row(row: &SqliteRow) -> Result<Note, StorageError> {
    let kind: String = row.try_get("subject_kind").map_err(ser)?;
    let subject_id = i64_to_u64("subject_id", row.try_get("subject_id").map_err(ser)?)?;
    let subject = NoteSubject::from_parts(&kind, subject_id).map_err(invalid)?;
    let pin_log: Vec<PinLogEntry> =
        from_json("pin_log", &row.try_get::<String, _>("pin_log").map_err(ser)?)?;

    Ok(Note::from_persisted(
        note_id_from_i64(row.try_get("id").map_err(ser)?)?,
        subject,
        user_id_from_i64(row.try_get("author_id").map_err(ser)?)?,
        row.try_get("body").map_err(ser)?,
        row.try_get("is_pinned").map_err(ser)?,
        pin_log,
        row.try_get("created_at").map_err(ser)?,
    ))
}
