use crate::dashboard::connection::{run_push_channel, BackoffPolicy, PushChannelContext};
use crate::dashboard::polling::{check_bot_status, refresh, run_health_checks, PollingContext};
use crate::dashboard::runtime::{DashboardEvent, DashboardRuntime, RuntimeCommand};
use crate::dashboard::types::{ConnectionState, ConnectionStatusSnapshot, DashboardConfig};
use crate::dashboard::now_unix_ms;
use crate::error::AppError;
use parking_lot::RwLock;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tauri::{AppHandle, Manager};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DASHBOARD_EVENT_BUFFER: usize = 256;

pub struct DashboardSessionChannels {
    pub events_tx: mpsc::Sender<DashboardEvent>,
    pub events_rx: mpsc::Receiver<DashboardEvent>,
}

impl DashboardSessionChannels {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(DASHBOARD_EVENT_BUFFER);
        Self {
            events_tx,
            events_rx,
        }
    }
}

impl Default for DashboardSessionChannels {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run_dashboard_session(
    app_handle: AppHandle,
    config: DashboardConfig,
    client: Client,
    status_store: Arc<RwLock<ConnectionStatusSnapshot>>,
    channels: DashboardSessionChannels,
    cancel_token: CancellationToken,
) {
    let window = match app_handle.get_webview_window("main") {
        Some(window) => window,
        None => {
            let mut snapshot = ConnectionStatusSnapshot::stopped(
                config.backend_url.clone(),
                Some(AppError::WindowNotFound("main".to_string()).to_string()),
            );
            snapshot.state = ConnectionState::Error;
            let mut writable = status_store.write();
            *writable = snapshot;
            return;
        }
    };

    let DashboardSessionChannels {
        events_tx,
        mut events_rx,
    } = channels;

    let mut runtime = DashboardRuntime::new(window, &config, Arc::clone(&status_store));
    runtime.start(Instant::now());
    info!(backend_url = %config.backend_url, "dashboard session started");

    let polling = PollingContext {
        client,
        base_url: config.backend_url.clone(),
        events: events_tx.clone(),
    };

    let push_handle = tauri::async_runtime::spawn(run_push_channel(PushChannelContext {
        base_url: config.backend_url.clone(),
        policy: BackoffPolicy::from(&config),
        handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
        events: events_tx.clone(),
        cancel_token: cancel_token.clone(),
    }));

    let health_handle = tauri::async_runtime::spawn(run_health_checks(
        polling.clone(),
        Duration::from_millis(config.health_interval_ms),
        cancel_token.clone(),
    ));

    loop {
        let deadline = runtime.next_deadline();
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            event = events_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                for command in runtime.handle(event, Instant::now(), now_unix_ms()) {
                    spawn_command(&polling, command, &cancel_token);
                }
            }
            _ = sleep_until_deadline(deadline) => {
                runtime.on_timer(Instant::now());
            }
        }
    }

    if let Err(error) = push_handle.await {
        warn!(error = %error, "push channel task ended abnormally");
    }
    if let Err(error) = health_handle.await {
        warn!(error = %error, "health check task ended abnormally");
    }

    runtime.shutdown(Some("session stopped".to_string()));
    info!("dashboard session stopped");
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn spawn_command(polling: &PollingContext, command: RuntimeCommand, cancel_token: &CancellationToken) {
    let context = polling.clone();
    let cancel = cancel_token.clone();

    tauri::async_runtime::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = run_command(&context, command) => {}
        }
    });
}

async fn run_command(context: &PollingContext, command: RuntimeCommand) {
    match command {
        RuntimeCommand::Refresh { origin } => {
            if let Err(error) = refresh(context, origin).await {
                debug!(?origin, error = %error, "background refresh did not apply");
            }
        }
        RuntimeCommand::ResyncBotStatus => {
            if let Err(error) = check_bot_status(context).await {
                debug!(error = %error, "resync aborted");
            }
        }
    }
}
