use crate::dashboard::runtime::DashboardEvent;
use crate::error::AppError;
use crate::state::AppState;
use serde::Deserialize;
use tauri::State;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToastArgs {
    pub id: u64,
}

async fn forward(state: &AppState, event: DashboardEvent) -> Result<(), AppError> {
    let link = state.dashboard_link().await?;
    link.events.send(event).await?;
    Ok(())
}

#[tauri::command]
pub async fn toast_hover(state: State<'_, AppState>, args: ToastArgs) -> Result<(), AppError> {
    forward(&state, DashboardEvent::ToastHover { id: args.id }).await
}

#[tauri::command]
pub async fn toast_leave(state: State<'_, AppState>, args: ToastArgs) -> Result<(), AppError> {
    forward(&state, DashboardEvent::ToastLeave { id: args.id }).await
}

#[tauri::command]
pub async fn toast_dismiss(state: State<'_, AppState>, args: ToastArgs) -> Result<(), AppError> {
    forward(&state, DashboardEvent::ToastDismiss { id: args.id }).await
}
