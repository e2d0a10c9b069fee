use crate::dashboard::bot_api::build_http_client;
use crate::dashboard::pipeline::{run_dashboard_session, DashboardSessionChannels};
use crate::dashboard::polling::{refresh, PollingContext};
use crate::dashboard::runtime::{RefreshOutcome, SnapshotOrigin};
use crate::dashboard::types::{
    ConnectionStatusSnapshot, DashboardSession, DashboardSessionStopResult, StartDashboardArgs,
};
use crate::error::AppError;
use crate::state::{AppState, DashboardHandle};
use std::sync::Arc;
use tauri::{AppHandle, State};
use tokio_util::sync::CancellationToken;

#[tauri::command]
pub async fn start_dashboard_session(
    app: AppHandle,
    state: State<'_, AppState>,
    args: Option<StartDashboardArgs>,
) -> Result<DashboardSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;
    let client = build_http_client()?;

    let existing_handle = {
        let mut session_slot = state.dashboard.lock().await;
        session_slot.take()
    };
    if let Some(handle) = existing_handle {
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
    }

    let cancellation_token = CancellationToken::new();
    let task_token = cancellation_token.clone();
    let status_store = Arc::clone(&state.connection_status);
    let channels = DashboardSessionChannels::new();
    let events = channels.events_tx.clone();
    let runtime_config = config.clone();
    let runtime_client = client.clone();
    let app_handle = app.clone();

    let join_handle = tauri::async_runtime::spawn(async move {
        run_dashboard_session(
            app_handle,
            runtime_config,
            runtime_client,
            status_store,
            channels,
            task_token,
        )
        .await;
    });

    {
        let mut session_slot = state.dashboard.lock().await;
        *session_slot = Some(DashboardHandle {
            cancellation_token,
            join_handle,
            events,
            client,
            config: config.clone(),
        });
    }

    Ok(DashboardSession::from_config(&config))
}

#[tauri::command]
pub async fn stop_dashboard_session(
    state: State<'_, AppState>,
) -> Result<DashboardSessionStopResult, AppError> {
    let existing_handle = {
        let mut session_slot = state.dashboard.lock().await;
        session_slot.take()
    };

    let stopped = if let Some(handle) = existing_handle {
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
        true
    } else {
        false
    };

    {
        let backend_url = state.connection_status.read().backend_url.clone();
        let mut writable = state.connection_status.write();
        *writable = ConnectionStatusSnapshot::stopped(
            backend_url,
            Some("session stopped by command".to_string()),
        );
    }

    Ok(DashboardSessionStopResult { stopped })
}

#[tauri::command]
pub async fn dashboard_session_status(
    state: State<'_, AppState>,
) -> Result<ConnectionStatusSnapshot, AppError> {
    let snapshot = state.connection_status.read().clone();
    Ok(snapshot)
}

#[tauri::command]
pub async fn refresh_data(state: State<'_, AppState>) -> Result<RefreshOutcome, AppError> {
    let link = state.dashboard_link().await?;
    let context = PollingContext {
        client: link.client,
        base_url: link.base_url,
        events: link.events,
    };
    refresh(&context, SnapshotOrigin::Manual).await
}
