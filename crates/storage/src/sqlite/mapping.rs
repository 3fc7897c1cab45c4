use lms_core::model::{
    AttemptId, CompanyId, CourseId, EnrolmentId, LessonId, NoteId, QuizId, UserId,
    WorkPlacementId,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Stored values the domain model rejects.
pub(crate) fn invalid<E: Into<lms_core::Error>>(e: E) -> StorageError {
    StorageError::Serialization(format!("invalid stored row: {}", e.into()))
}

pub(crate) fn conn(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

/// Like `conn`, but reports unique-key violations as `Conflict`.
pub(crate) fn write_err(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
        _ => StorageError::Connection(e.to_string()),
    }
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn company_id_from_i64(v: i64) -> Result<CompanyId, StorageError> {
    Ok(CompanyId::new(i64_to_u64("company_id", v)?))
}

pub(crate) fn course_id_from_i64(v: i64) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64("course_id", v)?))
}

pub(crate) fn lesson_id_from_i64(v: i64) -> Result<LessonId, StorageError> {
    Ok(LessonId::new(i64_to_u64("lesson_id", v)?))
}

pub(crate) fn quiz_id_from_i64(v: i64) -> Result<QuizId, StorageError> {
    Ok(QuizId::new(i64_to_u64("quiz_id", v)?))
}

pub(crate) fn enrolment_id_from_i64(v: i64) -> Result<EnrolmentId, StorageError> {
    Ok(EnrolmentId::new(i64_to_u64("enrolment_id", v)?))
}

pub(crate) fn attempt_id_from_i64(v: i64) -> Result<AttemptId, StorageError> {
    Ok(AttemptId::new(i64_to_u64("attempt_id", v)?))
}

pub(crate) fn note_id_from_i64(v: i64) -> Result<NoteId, StorageError> {
    Ok(NoteId::new(i64_to_u64("note_id", v)?))
}

pub(crate) fn placement_id_from_i64(v: i64) -> Result<WorkPlacementId, StorageError> {
    Ok(WorkPlacementId::new(i64_to_u64("placement_id", v)?))
}

/// JSON columns: progress details, pin logs, field changes, answers, lesson trees.
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

pub(crate) fn from_json<T: DeserializeOwned>(field: &'static str, raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::Serialization(format!("invalid {field} json: {e}")))
}
