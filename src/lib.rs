mod commands;
mod dashboard;
mod db;
mod error;
mod state;

use commands::{
    bot_control::{close_position, start_bot, stop_bot},
    dashboard_session::{
        dashboard_session_status, refresh_data, start_dashboard_session, stop_dashboard_session,
    },
    health::health,
    preferences::{theme_get, theme_toggle},
    toasts::{toast_dismiss, toast_hover, toast_leave},
    trade_history::{select_history_symbol, trade_history_query},
};
use db::initialize_pool;
use state::AppState;
use tauri::Manager;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn run() {
    init_tracing();

    tauri::Builder::default()
        .setup(|app| {
            let app_handle = app.handle().clone();
            let db_pool =
                tauri::async_runtime::block_on(async move { initialize_pool(&app_handle).await })?;
            app.manage(AppState::new(db_pool));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            health,
            start_dashboard_session,
            stop_dashboard_session,
            dashboard_session_status,
            refresh_data,
            start_bot,
            stop_bot,
            close_position,
            toast_hover,
            toast_leave,
            toast_dismiss,
            trade_history_query,
            select_history_symbol,
            theme_get,
            theme_toggle
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
