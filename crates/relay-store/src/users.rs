use chrono::{SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

const COLUMNS: &str = "id, name, email, role, created_at, updated_at";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Writable user fields, shared by create and update.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: String,
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Clone)]
pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All users, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<UserRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM users ORDER BY id"))?;
            let rows = stmt
                .query_map([], map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM users WHERE id = ?1"),
                [id],
                map_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
        })
    }

    /// Insert a user. A duplicate email is a [`StoreError::Conflict`].
    #[instrument(skip(self, user), fields(email = %user.email))]
    pub fn create(&self, user: &NewUser) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO users (name, email, role, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![user.name, user.email, user.role, ts],
            )?;
            Ok(UserRow {
                id: conn.last_insert_rowid(),
                name: user.name.clone(),
                email: user.email.clone(),
                role: user.role.clone(),
                created_at: ts.clone(),
                updated_at: ts,
            })
        })
    }

    /// Replace name, email and role, bumping `updated_at`.
    #[instrument(skip(self, user))]
    pub fn update(&self, id: i64, user: &NewUser) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET name = ?1, email = ?2, role = ?3, updated_at = ?4 WHERE id = ?5",
                params![user.name, user.email, user.role, now(), id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(conn.query_row(
                &format!("SELECT {COLUMNS} FROM users WHERE id = ?1"),
                [id],
                map_row,
            )?)
        })
    }

    /// Delete by id. Returns whether a row was removed; deleting a missing user is not an error.
    #[instrument(skip(self))]
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }
}
