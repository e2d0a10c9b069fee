use crate::dashboard::now_unix_ms;
use crate::dashboard::types::{Theme, ThemeSnapshot};
use crate::error::AppError;
use sqlx::{Row, SqlitePool};

const DEFAULT_THEME: Theme = Theme::Dark;

fn map_theme_row(row: &sqlx::sqlite::SqliteRow) -> Result<ThemeSnapshot, AppError> {
    let theme_raw: String = row.try_get("theme")?;
    let updated_at_ms: i64 = row.try_get("updated_at_ms")?;

    Ok(ThemeSnapshot {
        theme: Theme::parse_str(&theme_raw)?,
        updated_at_ms,
    })
}

async fn ensure_ui_preferences_seed(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::query("INSERT OR IGNORE INTO ui_preferences (id, theme, updated_at_ms) VALUES (1, ?, ?)")
        .bind(DEFAULT_THEME.as_str())
        .bind(now_unix_ms())
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn get_theme(pool: &SqlitePool) -> Result<ThemeSnapshot, AppError> {
    ensure_ui_preferences_seed(pool).await?;

    let row = sqlx::query("SELECT theme, updated_at_ms FROM ui_preferences WHERE id = 1")
        .fetch_one(pool)
        .await?;

    map_theme_row(&row)
}

pub async fn save_theme(pool: &SqlitePool, theme: Theme) -> Result<ThemeSnapshot, AppError> {
    sqlx::query(
        "INSERT INTO ui_preferences (id, theme, updated_at_ms) VALUES (1, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET theme=excluded.theme, updated_at_ms=excluded.updated_at_ms",
    )
    .bind(theme.as_str())
    .bind(now_unix_ms())
    .execute(pool)
    .await?;

    get_theme(pool).await
}

pub async fn toggle_theme(pool: &SqlitePool) -> Result<ThemeSnapshot, AppError> {
    let current = get_theme(pool).await?;
    save_theme(pool, current.theme.toggled()).await
}
