use lms_core::model::{Company, CompanyId, Role, StudentAssignment, User, UserId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    company_id_from_i64, conn, id_i64, invalid, ser, user_id_from_i64, write_err,
};
use crate::repository::{NewUserRecord, StorageError, UserRepository};

pub(crate) async fn insert_user(
    conn_ref: &mut sqlx::SqliteConnection,
    user: &NewUserRecord,
) -> Result<UserId, StorageError> {
    let company_id = user
        .company_id
        .map(|id| id_i64("company_id", id.value()))
        .transpose()?;

    let res = sqlx::query(
        r"
        INSERT INTO users (first_name, last_name, email, role, company_id, is_active)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
    )
    .bind(user.first_name.clone())
    .bind(user.last_name.clone())
    .bind(user.email.trim().to_string())
    .bind(user.role.as_str())
    .bind(company_id)
    .bind(user.is_active)
    .execute(&mut *conn_ref)
    .await
    .map_err(write_err)?;

    user_id_from_i64(res.last_insert_rowid())
}

pub(crate) async fn replace_assignment(
    conn_ref: &mut sqlx::SqliteConnection,
    assignment: &StudentAssignment,
) -> Result<(), StorageError> {
    let student_id = id_i64("student_id", assignment.student_id.value())?;
    sqlx::query("DELETE FROM student_assignments WHERE student_id = ?1")
        .bind(student_id)
        .execute(&mut *conn_ref)
        .await
        .map_err(conn)?;

    let staff = assignment
        .trainer_ids
        .iter()
        .map(|id| (id, "trainer"))
        .chain(assignment.leader_ids.iter().map(|id| (id, "leader")));
    for (staff_id, relation) in staff {
        sqlx::query(
            r"
            INSERT INTO student_assignments (student_id, staff_id, relation)
            VALUES (?1, ?2, ?3)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(student_id)
        .bind(id_i64("staff_id", staff_id.value())?)
        .bind(relation)
        .execute(&mut *conn_ref)
        .await
        .map_err(conn)?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl UserRepository for SqliteRepository {
    async fn insert_new_user(&self, user: NewUserRecord) -> Result<UserId, StorageError> {
        let mut c = self.pool.acquire().await.map_err(conn)?;
        insert_user(&mut c, &user).await
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StorageError> {
        let company_id = user
            .company_id
            .map(|id| id_i64("company_id", id.value()))
            .transpose()?;

        sqlx::query(
            r"
            INSERT INTO users (id, first_name, last_name, email, role, company_id, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                email = excluded.email,
                role = excluded.role,
                company_id = excluded.company_id,
                is_active = excluded.is_active
            ",
        )
        .bind(id_i64("user_id", user.id.value())?)
        .bind(user.first_name.clone())
        .bind(user.last_name.clone())
        .bind(user.email.trim().to_string())
        .bind(user.role.as_str())
        .bind(company_id)
        .bind(user.is_active)
        .execute(&self.pool)
        .await
        .map_err(write_err)?;

        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, first_name, last_name, email, role, company_id, is_active
            FROM users WHERE id = ?1
            ",
        )
        .bind(id_i64("user_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>, StorageError> {
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = self.get_user(*id).await? {
                users.push(user);
            }
        }
        users.sort_by_key(|u| u.id);
        users.dedup_by_key(|u| u.id);
        Ok(users)
    }

    async fn upsert_company(&self, company: &Company) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO companies (id, name) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            ",
        )
        .bind(id_i64("company_id", company.id.value())?)
        .bind(company.name.clone())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn get_company(&self, id: CompanyId) -> Result<Option<Company>, StorageError> {
        let row = sqlx::query("SELECT id, name FROM companies WHERE id = ?1")
            .bind(id_i64("company_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        match row {
            Some(row) => Ok(Some(Company {
                id: company_id_from_i64(row.try_get("id").map_err(ser)?)?,
                name: row.try_get("name").map_err(ser)?,
            })),
            None => Ok(None),
        }
    }

    async fn set_assignment(&self, assignment: &StudentAssignment) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        replace_assignment(&mut tx, assignment).await?;
        tx.commit().await.map_err(conn)
    }

    async fn get_assignment(&self, student_id: UserId) -> Result<StudentAssignment, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT staff_id, relation FROM student_assignments
            WHERE student_id = ?1
            ORDER BY staff_id ASC
            ",
        )
        .bind(id_i64("student_id", student_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut assignment = StudentAssignment::empty(student_id);
        for row in rows {
            let staff_id = user_id_from_i64(row.try_get("staff_id").map_err(ser)?)?;
            let relation: String = row.try_get("relation").map_err(ser)?;
            match relation.as_str() {
                "trainer" => assignment.trainer_ids.push(staff_id),
                "leader" => assignment.leader_ids.push(staff_id),
                other => {
                    return Err(StorageError::Serialization(format!(
                        "invalid relation: {other}"
                    )));
                }
            }
        }
        Ok(assignment)
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User, StorageError> {
    let role: String = row.try_get("role").map_err(ser)?;
    Ok(User {
        id: user_id_from_i64(row.try_get("id").map_err(ser)?)?,
        first_name: row.try_get("first_name").map_err(ser)?,
        last_name: row.try_get("last_name").map_err(ser)?,
        email: row.try_get("email").map_err(ser)?,
        role: role.parse::<Role>().map_err(invalid)?,
        company_id: row
            .try_get::<Option<i64>, _>("company_id")
            .map_err(ser)?
            .map(company_id_from_i64)
            .transpose()?,
        is_active: row.try_get("is_active").map_err(ser)?,
    })
}
