use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS courses (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            category TEXT,
            length_days INTEGER NOT NULL CHECK (length_days > 0),
            auto_register_next_course INTEGER NOT NULL DEFAULT 0,
            next_course_id INTEGER,
            is_main_course INTEGER NOT NULL DEFAULT 0,
            lessons TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS companies (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            role TEXT NOT NULL,
            company_id INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS student_assignments (
            student_id INTEGER NOT NULL,
            staff_id INTEGER NOT NULL,
            relation TEXT NOT NULL CHECK (relation IN ('trainer', 'leader')),
            PRIMARY KEY (student_id, staff_id, relation)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS student_course_enrolments (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            course_start_at TEXT NOT NULL,
            course_ends_at TEXT NOT NULL,
            status TEXT NOT NULL,
            deferred_at TEXT,
            is_chargeable INTEGER NOT NULL DEFAULT 0,
            registered_by_link INTEGER NOT NULL DEFAULT 0,
            certificate_issued_at TEXT,
            updated_at TEXT NOT NULL,
            UNIQUE (user_id, course_id)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS course_progress (
            user_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            details TEXT NOT NULL,
            percentage TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, course_id)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS quiz_attempts (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            quiz_id INTEGER NOT NULL,
            attempt INTEGER NOT NULL CHECK (attempt > 0),
            answers TEXT NOT NULL,
            system_result TEXT NOT NULL,
            status TEXT NOT NULL,
            submitted_at TEXT,
            evaluated_at TEXT,
            created_at TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            lesson_id INTEGER,
            kind TEXT NOT NULL,
            occurred_at TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS competencies (
            user_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            lesson_id INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            is_competent INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, course_id, lesson_id)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS admin_reports (
            student_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            student_name TEXT NOT NULL,
            student_email TEXT NOT NULL,
            student_active INTEGER NOT NULL,
            company_id INTEGER,
            company_name TEXT,
            trainer_names TEXT NOT NULL,
            leader_names TEXT NOT NULL,
            course_title TEXT NOT NULL,
            course_category TEXT,
            enrolment_status TEXT NOT NULL,
            course_start_at TEXT NOT NULL,
            course_ends_at TEXT NOT NULL,
            deferred INTEGER NOT NULL,
            progress_percentage TEXT NOT NULL,
            source_updated_at TEXT NOT NULL,
            PRIMARY KEY (student_id, course_id)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS notes (
            id INTEGER PRIMARY KEY,
            subject_kind TEXT NOT NULL CHECK (subject_kind IN ('company', 'student')),
            subject_id INTEGER NOT NULL,
            author_id INTEGER NOT NULL,
            body TEXT NOT NULL,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            pin_log TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS work_placements (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            employer_name TEXT NOT NULL,
            contact_name TEXT,
            contact_email TEXT,
            contact_phone TEXT,
            start_date TEXT,
            end_date TEXT,
            field_changes TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_enrolments_user
            ON student_course_enrolments (user_id, course_id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_attempts_user_course_quiz
            ON quiz_attempts (user_id, course_id, quiz_id, attempt);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_activity_user_course_occurred
            ON activity_log (user_id, course_id, occurred_at);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_notes_subject_pinned
            ON notes (subject_kind, subject_id, is_pinned);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_placements_user
            ON work_placements (user_id);
    ",
];

/// Runs a single, consolidated migration for the current schema.
///
/// Creates courses, users and assignments, enrolments, the progress and
/// report caches, quiz attempts, the activity log, competencies, notes and
/// work placements.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
