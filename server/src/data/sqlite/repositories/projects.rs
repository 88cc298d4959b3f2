//! Project repository

use sqlx::SqliteConnection;

use crate::data::sqlite::SqliteError;
use crate::utils::time::now_micros;

/// Resolve a project by name, creating it on first reference
pub async fn get_or_create_project(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<i64, SqliteError> {
    let now = now_micros();
    sqlx::query(
        "INSERT INTO projects (name, created_at, updated_at) VALUES (?, ?, ?) ON CONFLICT(name) DO NOTHING",
    )
    .bind(name)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM projects WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}
