//! Trace and project session repository
//!
//! Trace and session bounds only ever widen: every write takes the MIN of
//! start times and the MAX of end times.

use sqlx::SqliteConnection;

use crate::data::sqlite::SqliteError;

/// Stored state of a trace after an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRow {
    pub id: i64,
    pub project_id: i64,
    pub project_session_id: Option<i64>,
    pub start_time: i64,
    pub end_time: i64,
}

/// Stored bounds of a project session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRow {
    pub id: i64,
    pub project_id: i64,
    pub start_time: i64,
    pub end_time: i64,
}

type TraceTuple = (i64, i64, Option<i64>, i64, i64);

fn trace_from_tuple(
    (id, project_id, project_session_id, start_time, end_time): TraceTuple,
) -> TraceRow {
    TraceRow {
        id,
        project_id,
        project_session_id,
        start_time,
        end_time,
    }
}

/// Create the trace or widen its bounds to include `[start_time, end_time]`
pub async fn upsert_trace(
    conn: &mut SqliteConnection,
    project_id: i64,
    trace_id: &str,
    start_time: i64,
    end_time: i64,
) -> Result<TraceRow, SqliteError> {
    let row = sqlx::query_as::<_, TraceTuple>(
        r#"
        INSERT INTO traces (trace_id, project_id, start_time, end_time)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(trace_id) DO UPDATE SET
            start_time = MIN(start_time, excluded.start_time),
            end_time = MAX(end_time, excluded.end_time)
        RETURNING id, project_id, project_session_id, start_time, end_time
        "#,
    )
    .bind(trace_id)
    .bind(project_id)
    .bind(start_time)
    .bind(end_time)
    .fetch_one(&mut *conn)
    .await?;
    Ok(trace_from_tuple(row))
}

/// Row id of a trace, if it has arrived
pub async fn get_trace_rowid(
    conn: &mut SqliteConnection,
    trace_id: &str,
) -> Result<Option<i64>, SqliteError> {
    let id = sqlx::query_scalar("SELECT id FROM traces WHERE trace_id = ?")
        .bind(trace_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn get_trace(
    conn: &mut SqliteConnection,
    trace_id: &str,
) -> Result<Option<TraceRow>, SqliteError> {
    let row = sqlx::query_as::<_, TraceTuple>(
        "SELECT id, project_id, project_session_id, start_time, end_time FROM traces WHERE trace_id = ?",
    )
    .bind(trace_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(trace_from_tuple))
}

/// Create the session or widen its bounds to include `[start_time, end_time]`
pub async fn upsert_session(
    conn: &mut SqliteConnection,
    project_id: i64,
    session_id: &str,
    start_time: i64,
    end_time: i64,
) -> Result<i64, SqliteError> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO project_sessions (session_id, project_id, start_time, end_time)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(session_id) DO UPDATE SET
            start_time = MIN(start_time, excluded.start_time),
            end_time = MAX(end_time, excluded.end_time)
        RETURNING id
        "#,
    )
    .bind(session_id)
    .bind(project_id)
    .bind(start_time)
    .bind(end_time)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Widen an existing session's bounds by row id
pub async fn widen_session(
    conn: &mut SqliteConnection,
    session_rowid: i64,
    start_time: i64,
    end_time: i64,
) -> Result<(), SqliteError> {
    sqlx::query(
        "UPDATE project_sessions SET start_time = MIN(start_time, ?), end_time = MAX(end_time, ?) WHERE id = ?",
    )
    .bind(start_time)
    .bind(end_time)
    .bind(session_rowid)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Link a trace to a session unless it already belongs to one
pub async fn link_trace_to_session(
    conn: &mut SqliteConnection,
    trace_rowid: i64,
    session_rowid: i64,
) -> Result<bool, SqliteError> {
    let result = sqlx::query(
        "UPDATE traces SET project_session_id = ? WHERE id = ? AND project_session_id IS NULL",
    )
    .bind(session_rowid)
    .bind(trace_rowid)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_session(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> Result<Option<SessionRow>, SqliteError> {
    let row = sqlx::query_as::<_, (i64, i64, i64, i64)>(
        "SELECT id, project_id, start_time, end_time FROM project_sessions WHERE session_id = ?",
    )
    .bind(session_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(id, project_id, start_time, end_time)| SessionRow {
        id,
        project_id,
        start_time,
        end_time,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sqlite::SqliteService;
    use crate::data::sqlite::repositories::get_or_create_project;

    #[tokio::test]
    async fn test_upsert_trace_widens_only() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let project_id = get_or_create_project(&mut conn, "default").await.unwrap();

        let created = upsert_trace(&mut conn, project_id, "t1", 100, 200).await.unwrap();
        assert_eq!((created.start_time, created.end_time), (100, 200));

        let narrower = upsert_trace(&mut conn, project_id, "t1", 120, 180).await.unwrap();
        assert_eq!(narrower.id, created.id);
        assert_eq!((narrower.start_time, narrower.end_time), (100, 200));

        let wider = upsert_trace(&mut conn, project_id, "t1", 50, 300).await.unwrap();
        assert_eq!((wider.start_time, wider.end_time), (50, 300));

        assert_eq!(get_trace_rowid(&mut conn, "t1").await.unwrap(), Some(created.id));
        assert_eq!(get_trace_rowid(&mut conn, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_session_link_and_widen() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let project_id = get_or_create_project(&mut conn, "default").await.unwrap();
        let trace = upsert_trace(&mut conn, project_id, "t1", 100, 200).await.unwrap();

        let session = upsert_session(&mut conn, project_id, "chat", 100, 200).await.unwrap();
        assert!(link_trace_to_session(&mut conn, trace.id, session).await.unwrap());

        let other = upsert_session(&mut conn, project_id, "other", 0, 1).await.unwrap();
        assert!(!link_trace_to_session(&mut conn, trace.id, other).await.unwrap());

        widen_session(&mut conn, session, 150, 400).await.unwrap();
        let row = get_session(&mut conn, "chat").await.unwrap().unwrap();
        assert_eq!((row.start_time, row.end_time), (100, 400));

        let trace = get_trace(&mut conn, "t1").await.unwrap().unwrap();
        assert_eq!(trace.project_session_id, Some(session));
    }
}
