use crate::dashboard::persistence::{get_theme, toggle_theme};
use crate::dashboard::types::ThemeSnapshot;
use crate::error::AppError;
use crate::state::AppState;
use tauri::State;

#[tauri::command]
pub async fn theme_get(state: State<'_, AppState>) -> Result<ThemeSnapshot, AppError> {
    get_theme(&state.db_pool).await
}

#[tauri::command]
pub async fn theme_toggle(state: State<'_, AppState>) -> Result<ThemeSnapshot, AppError> {
    toggle_theme(&state.db_pool).await
}
