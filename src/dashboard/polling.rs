use crate::dashboard::bot_api::{fetch_bot_status, fetch_snapshot, fetch_system_status};
use crate::dashboard::runtime::{DashboardEvent, RefreshOutcome, SnapshotOrigin};
use crate::error::AppError;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// REST side of the dashboard. Results go back to the runtime as events.
#[derive(Debug, Clone)]
pub struct PollingContext {
    pub client: Client,
    pub base_url: String,
    pub events: mpsc::Sender<DashboardEvent>,
}

/// Pulls `/api/data` and waits until the runtime has gated and reconciled it.
pub async fn refresh(
    context: &PollingContext,
    origin: SnapshotOrigin,
) -> Result<RefreshOutcome, AppError> {
    let (ack, answer) = oneshot::channel();
    let event = match fetch_snapshot(&context.client, &context.base_url).await {
        Ok(Some(snapshot)) => DashboardEvent::Snapshot {
            snapshot,
            origin,
            ack: Some(ack),
        },
        Ok(None) => DashboardEvent::NotModified {
            origin,
            ack: Some(ack),
        },
        Err(error) => DashboardEvent::RefreshFailed {
            origin,
            error,
            ack: Some(ack),
        },
    };

    context.events.send(event).await?;
    answer.await?
}

/// Full resync after a (re)connect: bot status, then data whatever the bot state.
pub async fn check_bot_status(context: &PollingContext) -> Result<(), AppError> {
    let status = match fetch_bot_status(&context.client, &context.base_url).await {
        Ok(status) => status,
        Err(error) => {
            context
                .events
                .send(DashboardEvent::RefreshFailed {
                    origin: SnapshotOrigin::Resync,
                    error,
                    ack: None,
                })
                .await?;
            return Ok(());
        }
    };

    resync_after_status(context, status.running).await
}

async fn resync_after_status(context: &PollingContext, running: bool) -> Result<(), AppError> {
    context
        .events
        .send(DashboardEvent::BotStatus { running })
        .await?;

    // A stopped bot never pushes data, so the snapshot has to be pulled here.
    let outcome = refresh(context, SnapshotOrigin::Resync).await?;
    debug!(?outcome, running, "resync refresh finished");
    Ok(())
}

pub async fn run_health_checks(
    context: PollingContext,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                let probe = fetch_system_status(&context.client, &context.base_url)
                    .await
                    .map_err(|error| error.to_string());
                if context.events.send(DashboardEvent::HealthProbe(probe)).await.is_err() {
                    break;
                }
            }
        }
    }
}
