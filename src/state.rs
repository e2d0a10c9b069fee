use crate::dashboard::runtime::DashboardEvent;
use crate::dashboard::types::{resolve_default_backend_url, ConnectionStatusSnapshot, DashboardConfig};
use crate::error::AppError;
use parking_lot::RwLock;
use reqwest::Client;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub struct DashboardHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: tauri::async_runtime::JoinHandle<()>,
    pub events: mpsc::Sender<DashboardEvent>,
    pub client: Client,
    pub config: DashboardConfig,
}

/// What commands need to talk to a running session without holding the slot lock.
#[derive(Clone)]
pub struct DashboardLink {
    pub events: mpsc::Sender<DashboardEvent>,
    pub client: Client,
    pub base_url: String,
}

pub struct AppState {
    pub started_at: Instant,
    pub db_pool: SqlitePool,
    pub dashboard: Mutex<Option<DashboardHandle>>,
    pub connection_status: Arc<RwLock<ConnectionStatusSnapshot>>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool) -> Self {
        let connection_status = ConnectionStatusSnapshot::stopped(
            resolve_default_backend_url(),
            Some("session idle".to_string()),
        );

        Self {
            started_at: Instant::now(),
            db_pool,
            dashboard: Mutex::new(None),
            connection_status: Arc::new(RwLock::new(connection_status)),
        }
    }

    pub async fn dashboard_link(&self) -> Result<DashboardLink, AppError> {
        let slot = self.dashboard.lock().await;
        let handle = slot.as_ref().ok_or(AppError::SessionNotRunning)?;
        Ok(DashboardLink {
            events: handle.events.clone(),
            client: handle.client.clone(),
            base_url: handle.config.backend_url.clone(),
        })
    }
}
