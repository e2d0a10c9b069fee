use crate::dashboard::types::ConnectionState;
use crate::{error::AppError, state::AppState};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Instant;
use tauri::State;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub db: &'static str,
    pub connection: ConnectionState,
    pub degraded: bool,
}

pub async fn build_health_response(
    started_at: Instant,
    pool: &SqlitePool,
    connection: ConnectionState,
    degraded: bool,
) -> HealthResponse {
    let db_status = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
    {
        Ok(_) => "ok",
        Err(_) => "error",
    };

    let status = if db_status == "ok" && !degraded {
        "ok"
    } else {
        "degraded"
    };

    HealthResponse {
        status,
        uptime_ms: started_at.elapsed().as_millis(),
        db: db_status,
        connection,
        degraded,
    }
}

#[tauri::command]
pub async fn health(state: State<'_, AppState>) -> Result<HealthResponse, AppError> {
    let (connection, degraded) = {
        let readable = state.connection_status.read();
        (readable.state, readable.degraded)
    };
    Ok(build_health_response(state.started_at, &state.db_pool, connection, degraded).await)
}
