//! User rows. Password hashes are opaque PHC strings owned by `core::auth`.

use super::models::User;
use super::{RowExt, Store};
use crate::error::{Error, Result};
use sqlx::any::AnyRow;

fn map_user(row: &AnyRow) -> Result<User> {
    Ok(User {
        id: row.col("id")?,
        username: row.col("username")?,
        password_hash: row.col("password_hash")?,
        created_at: row.ts("created_at")?,
    })
}

impl Store {
    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::InvalidInput("username must not be empty".into()));
        }

        let now = super::now_ts();
        let sql = self
            .dialect()
            .insert_sql("INSERT INTO users (username, password_hash, created_at) VALUES (?, ?, ?)");
        let query = sqlx::query(&sql)
            .bind(username)
            .bind(password_hash)
            .bind(&now);
        let id = self
            .fetch_insert_id(query)
            .await
            .map_err(|e| Error::db("create user", e))?;

        Ok(User {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: super::parse_ts(&now)?,
        })
    }

    pub async fn user_by_username(&self, username: &str) -> Result<User> {
        let row = sqlx::query(&self.sql(
            "SELECT id, username, password_hash, created_at FROM users WHERE username = ?",
        ))
        .bind(username)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::db("load user", e))?
        .ok_or_else(|| Error::NotFound(format!("user {username}")))?;

        map_user(&row)
    }

    /// Number of registered users. Registration is blocked once this is
    /// non-zero.
    pub async fn user_count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool())
            .await
            .map_err(|e| Error::db("count users", e))
    }

    pub async fn update_user_password(&self, username: &str, password_hash: &str) -> Result<()> {
        let result =
            sqlx::query(&self.sql("UPDATE users SET password_hash = ? WHERE username = ?"))
                .bind(password_hash)
                .bind(username)
                .execute(self.pool())
                .await
                .map_err(|e| Error::db("update password", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {username}")));
        }
        Ok(())
    }
}
