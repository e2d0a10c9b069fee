use crate::dashboard::connection::DisconnectReason;
use crate::dashboard::freshness::{Admission, FreshnessGate};
use crate::dashboard::frame::{BotStatusView, HistoryFilterView, HistoryView, SystemStatusView, UiFrame};
use crate::dashboard::reconcile::{ReconcileSettings, Reconciler};
use crate::dashboard::scheduler::{TaskKey, TaskScheduler};
use crate::dashboard::toast::{ToastCenter, ToastKind};
use crate::dashboard::types::{
    ActionEnvelope, BotRunState, ConnectionState, ConnectionStatusSnapshot, DashboardConfig,
    HistoryWindow, Snapshot, SystemStatusWire, TradeHistoryQueryArgs,
};
use crate::dashboard::{CONNECTION_STATUS_EVENT, DASHBOARD_FRAME_EVENT};
use crate::error::AppError;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tauri::{Emitter, WebviewWindow};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const STATUS_ERROR_THROTTLE_MS: u64 = 500;

/// Where the runtime's output goes. The webview in production, a recorder in tests.
pub trait FrameSink {
    fn emit_frame(&self, frame: &UiFrame) -> Result<(), AppError>;
    fn emit_status(&self, status: &ConnectionStatusSnapshot) -> Result<(), AppError>;
}

impl FrameSink for WebviewWindow {
    fn emit_frame(&self, frame: &UiFrame) -> Result<(), AppError> {
        self.emit(DASHBOARD_FRAME_EVENT, frame)?;
        Ok(())
    }

    fn emit_status(&self, status: &ConnectionStatusSnapshot) -> Result<(), AppError> {
        self.emit(CONNECTION_STATUS_EVENT, status)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RefreshOutcome {
    Accepted,
    Duplicate,
    Stale,
    NotModified,
}

pub type RefreshAck = oneshot::Sender<Result<RefreshOutcome, AppError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    Push,
    Manual,
    Staleness,
    Resync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotAction {
    Start,
    Stop,
}

#[derive(Debug)]
pub enum DashboardEvent {
    Connected {
        reconnected: bool,
    },
    ConnectError {
        attempt: u32,
        message: String,
    },
    GaveUp {
        attempt: u32,
        retry_in_ms: u64,
    },
    ReconnectAttempt {
        attempt: u32,
    },
    Disconnected {
        reason: DisconnectReason,
    },
    Snapshot {
        snapshot: Snapshot,
        origin: SnapshotOrigin,
        ack: Option<RefreshAck>,
    },
    NotModified {
        origin: SnapshotOrigin,
        ack: Option<RefreshAck>,
    },
    RefreshFailed {
        origin: SnapshotOrigin,
        error: AppError,
        ack: Option<RefreshAck>,
    },
    Ping {
        timestamp: Option<i64>,
    },
    BotStatus {
        running: bool,
    },
    HealthProbe(Result<SystemStatusWire, String>),
    HistoryQuery {
        args: TradeHistoryQueryArgs,
        ack: oneshot::Sender<HistoryView>,
    },
    SelectHistorySymbol {
        symbol: String,
        ack: oneshot::Sender<HistoryFilterView>,
    },
    ToastHover {
        id: u64,
    },
    ToastLeave {
        id: u64,
    },
    ToastDismiss {
        id: u64,
    },
    ClosePending {
        symbol: String,
    },
    CloseFinished {
        symbol: String,
        result: Result<ActionEnvelope, String>,
    },
    BotActionFinished {
        action: BotAction,
        result: Result<ActionEnvelope, String>,
    },
}

/// Follow-up I/O the runtime asks its owner to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeCommand {
    Refresh { origin: SnapshotOrigin },
    ResyncBotStatus,
}

#[derive(Debug, Default)]
struct StatusPublishThrottle {
    last_state: Option<ConnectionState>,
    last_reason: Option<String>,
    last_emit: Option<Instant>,
}

impl StatusPublishThrottle {
    fn allow(&mut self, state: ConnectionState, reason: &Option<String>, now: Instant) -> bool {
        let should_throttle = matches!(
            state,
            ConnectionState::Error | ConnectionState::Reconnecting
        );

        if should_throttle
            && self.last_state == Some(state)
            && self.last_reason == *reason
            && self
                .last_emit
                .map(|instant| {
                    now.saturating_duration_since(instant)
                        < Duration::from_millis(STATUS_ERROR_THROTTLE_MS)
                })
                .unwrap_or(false)
        {
            return false;
        }

        self.last_state = Some(state);
        self.last_reason = reason.clone();
        self.last_emit = Some(now);
        true
    }
}

/// Owns every piece of mutable dashboard state. Driven by one task; each
/// event produces at most one frame.
pub struct DashboardRuntime<S: FrameSink> {
    sink: S,
    backend_url: String,
    gate: FreshnessGate,
    reconciler: Reconciler,
    scheduler: TaskScheduler<TaskKey>,
    toasts: ToastCenter,
    status_store: Arc<RwLock<ConnectionStatusSnapshot>>,
    status_throttle: StatusPublishThrottle,
    degraded: bool,
    bot_running: bool,
    stale_refresh_in_flight: bool,
    history_window: HistoryWindow,
    last_snapshot_at_ms: Option<i64>,
}

impl<S: FrameSink> DashboardRuntime<S> {
    pub fn new(
        sink: S,
        config: &DashboardConfig,
        status_store: Arc<RwLock<ConnectionStatusSnapshot>>,
    ) -> Self {
        Self {
            sink,
            backend_url: config.backend_url.clone(),
            gate: FreshnessGate::default(),
            reconciler: Reconciler::new(ReconcileSettings::from(config)),
            scheduler: TaskScheduler::default(),
            toasts: ToastCenter::default(),
            status_store,
            status_throttle: StatusPublishThrottle::default(),
            degraded: false,
            bot_running: false,
            stale_refresh_in_flight: false,
            history_window: HistoryWindow::All,
            last_snapshot_at_ms: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.publish_status(ConnectionState::Connecting, 0, None, None, now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn bot_running(&self) -> bool {
        self.bot_running
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn pending_tasks(&self) -> usize {
        self.scheduler.len()
    }

    pub fn handle(
        &mut self,
        event: DashboardEvent,
        now: Instant,
        now_unix_ms: i64,
    ) -> Vec<RuntimeCommand> {
        let mut frame = UiFrame::default();
        let mut commands = Vec::new();

        match event {
            DashboardEvent::Connected { reconnected } => {
                self.set_degraded(&mut frame, false);
                self.publish_status(ConnectionState::Live, 0, None, None, now);
                if reconnected {
                    self.toast(
                        &mut frame,
                        ToastKind::Success,
                        "Reconnected",
                        "Connection to the server restored",
                        now,
                    );
                } else {
                    self.toast(
                        &mut frame,
                        ToastKind::Success,
                        "Connected",
                        "Connection established with the server",
                        now,
                    );
                }
                commands.push(RuntimeCommand::ResyncBotStatus);
            }
            DashboardEvent::ConnectError { attempt, message } => {
                debug!(attempt, reason = %message, "connect error");
                self.publish_status(
                    ConnectionState::Reconnecting,
                    attempt,
                    None,
                    Some(message),
                    now,
                );
            }
            DashboardEvent::GaveUp {
                attempt,
                retry_in_ms,
            } => {
                self.publish_status(
                    ConnectionState::Error,
                    attempt,
                    Some(retry_in_ms),
                    Some(format!("gave up after {attempt} attempts")),
                    now,
                );
                self.toast(
                    &mut frame,
                    ToastKind::Error,
                    "Connection problem",
                    format!(
                        "Unable to connect to the server. Retrying in {}s.",
                        retry_in_ms.div_ceil(1_000)
                    ),
                    now,
                );
            }
            DashboardEvent::ReconnectAttempt { attempt } => {
                self.set_degraded(&mut frame, true);
                self.publish_status(ConnectionState::Reconnecting, attempt, None, None, now);
            }
            DashboardEvent::Disconnected { reason } => {
                let (kind, title, message) = match reason {
                    DisconnectReason::ServerDisconnect => (
                        ToastKind::Warning,
                        "Disconnected",
                        "Connection lost, reconnecting...",
                    ),
                    DisconnectReason::TransportClose | DisconnectReason::PingTimeout => (
                        ToastKind::Warning,
                        "Unstable connection",
                        "Attempting to reconnect...",
                    ),
                    DisconnectReason::TransportError(_) | DisconnectReason::ClientStop => (
                        ToastKind::Error,
                        "Disconnected",
                        "Connection to the server lost",
                    ),
                };
                self.toast(&mut frame, kind, title, message, now);
                let detail = match &reason {
                    DisconnectReason::TransportError(detail) => {
                        format!("{}: {detail}", reason.as_str())
                    }
                    _ => reason.as_str().to_string(),
                };
                self.publish_status(ConnectionState::Reconnecting, 0, None, Some(detail), now);
            }
            DashboardEvent::Snapshot {
                snapshot,
                origin,
                ack,
            } => {
                if origin == SnapshotOrigin::Staleness {
                    self.stale_refresh_in_flight = false;
                }
                if origin == SnapshotOrigin::Push {
                    self.set_degraded(&mut frame, false);
                }
                let outcome = self.admit_snapshot(&snapshot, &mut frame, now, now_unix_ms);
                if let Some(ack) = ack {
                    let _ = ack.send(outcome);
                }
            }
            DashboardEvent::NotModified { origin, ack } => {
                if origin == SnapshotOrigin::Staleness {
                    self.stale_refresh_in_flight = false;
                }
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(RefreshOutcome::NotModified));
                }
            }
            DashboardEvent::RefreshFailed { origin, error, ack } => {
                if origin == SnapshotOrigin::Staleness {
                    self.stale_refresh_in_flight = false;
                }
                warn!(?origin, error = %error, "refresh failed");
                let message = match origin {
                    SnapshotOrigin::Resync => "Failed to check bot status",
                    _ => "Failed to refresh data",
                };
                self.toast(&mut frame, ToastKind::Error, "Error", message, now);
                if let Some(ack) = ack {
                    let _ = ack.send(Err(error));
                }
            }
            DashboardEvent::Ping { timestamp } => {
                self.set_degraded(&mut frame, false);
                if let Some(server_ts) = timestamp {
                    if self.gate.is_stale(server_ts) && !self.stale_refresh_in_flight {
                        self.stale_refresh_in_flight = true;
                        commands.push(RuntimeCommand::Refresh {
                            origin: SnapshotOrigin::Staleness,
                        });
                    }
                }
            }
            DashboardEvent::BotStatus { running } => {
                self.bot_running = running;
                frame.bot_status = Some(BotStatusView::from_running(running));
            }
            DashboardEvent::HealthProbe(probe) => match probe {
                Ok(status) if status.reports_running() => {
                    frame.system_status = Some(SystemStatusView::from_probe(&status));
                }
                Ok(_) => {
                    if self.bot_running {
                        self.toast(
                            &mut frame,
                            ToastKind::Warning,
                            "Warning",
                            "The bot seems to have stopped responding",
                            now,
                        );
                    }
                }
                Err(message) => {
                    if self.bot_running {
                        warn!(reason = %message, "health probe failed");
                        self.toast(
                            &mut frame,
                            ToastKind::Error,
                            "Connection problem",
                            "Unable to reach the server",
                            now,
                        );
                    }
                }
            },
            DashboardEvent::HistoryQuery { args, ack } => {
                if let Some(window) = args.window {
                    self.history_window = window;
                }
                let ledger = self.reconciler.ledger_mut();
                let filter = args
                    .symbol
                    .as_deref()
                    .map(|symbol| ledger.select_symbol(symbol));
                let view = ledger.query(
                    &ledger.selected_symbol().to_string(),
                    self.history_window,
                    now_unix_ms,
                );
                let _ = ack.send(view.clone());
                frame.history_filter = filter;
                frame.history = Some(view);
            }
            DashboardEvent::SelectHistorySymbol { symbol, ack } => {
                let ledger = self.reconciler.ledger_mut();
                let filter = ledger.select_symbol(&symbol);
                let view = ledger.query(&filter.selected, self.history_window, now_unix_ms);
                let _ = ack.send(filter.clone());
                frame.history_filter = Some(filter);
                frame.history = Some(view);
            }
            DashboardEvent::ToastHover { id } => {
                frame.toasts = self.toasts.hover(id, now, &mut self.scheduler);
            }
            DashboardEvent::ToastLeave { id } => {
                frame.toasts = self.toasts.leave(id, now, &mut self.scheduler);
            }
            DashboardEvent::ToastDismiss { id } => {
                frame.toasts = self.toasts.dismiss(id, now, &mut self.scheduler);
            }
            DashboardEvent::ClosePending { symbol } => {
                frame.positions = self.reconciler.mark_closing(&symbol);
                self.toast(
                    &mut frame,
                    ToastKind::Info,
                    "Closing Position",
                    format!("Closing position for {symbol}..."),
                    now,
                );
            }
            DashboardEvent::CloseFinished { symbol, result } => match result {
                Ok(envelope) if envelope.is_success() => {
                    info!(symbol = %symbol, "position closed");
                    frame.positions =
                        self.reconciler
                            .confirm_closed(&symbol, now, &mut self.scheduler);
                    self.toast(
                        &mut frame,
                        ToastKind::Success,
                        "Position Closed",
                        format!("Successfully closed position for {symbol}"),
                        now,
                    );
                    commands.push(RuntimeCommand::Refresh {
                        origin: SnapshotOrigin::Manual,
                    });
                }
                Ok(envelope) => {
                    frame.positions = self.reconciler.revert_closing(&symbol);
                    let message = envelope
                        .message
                        .unwrap_or_else(|| "Failed to close position".to_string());
                    self.toast(&mut frame, ToastKind::Error, "Error", message, now);
                }
                Err(reason) => {
                    warn!(symbol = %symbol, reason = %reason, "close position request failed");
                    frame.positions = self.reconciler.revert_closing(&symbol);
                    self.toast(
                        &mut frame,
                        ToastKind::Error,
                        "Error",
                        "Failed to close position: Network error",
                        now,
                    );
                }
            },
            DashboardEvent::BotActionFinished { action, result } => match result {
                Ok(envelope) if envelope.is_success() => {
                    let running = action == BotAction::Start;
                    self.bot_running = running;
                    frame.bot_status = Some(BotStatusView::from_running(running));
                    let (kind, title, message) = match action {
                        BotAction::Start => (
                            ToastKind::Success,
                            "Bot Started",
                            "The trading bot has been started successfully",
                        ),
                        BotAction::Stop => (
                            ToastKind::Info,
                            "Bot Stopped",
                            "The trading bot has been stopped successfully",
                        ),
                    };
                    self.toast(&mut frame, kind, title, message, now);
                }
                Ok(envelope) => {
                    let message = envelope
                        .message
                        .unwrap_or_else(|| bot_action_failure(action).to_string());
                    self.toast(&mut frame, ToastKind::Error, "Error", message, now);
                }
                Err(reason) => {
                    warn!(?action, reason = %reason, "bot action request failed");
                    self.toast(
                        &mut frame,
                        ToastKind::Error,
                        "Error",
                        bot_action_failure(action),
                        now,
                    );
                }
            },
        }

        self.flush(frame);
        commands
    }

    /// Runs every scheduled task due at `now` and emits their combined patches.
    pub fn on_timer(&mut self, now: Instant) {
        let mut frame = UiFrame::default();

        for key in self.scheduler.drain_due(now) {
            match key {
                TaskKey::Pulse(symbol) => {
                    frame.positions.extend(self.reconciler.finish_pulse(&symbol));
                }
                TaskKey::RowRemoval(symbol) => {
                    frame.positions.extend(self.reconciler.finish_removal(&symbol));
                }
                TaskKey::ChartRedraw => {
                    frame.balance_series = Some(self.reconciler.balance_series());
                }
                TaskKey::ToastExpire(id) => {
                    frame
                        .toasts
                        .extend(self.toasts.dismiss(id, now, &mut self.scheduler));
                }
                TaskKey::ToastRemove(id) => {
                    frame.toasts.extend(self.toasts.finish_exit(id));
                }
            }
        }

        self.flush(frame);
    }

    /// Publishes the final status of a session. Pending animations are dropped.
    pub fn shutdown(&mut self, reason: Option<String>) {
        debug!(pending = self.scheduler.len(), "dropping scheduled tasks");
        self.scheduler.clear();
        let mut snapshot = ConnectionStatusSnapshot::stopped(self.backend_url.clone(), reason);
        snapshot.last_snapshot_at_ms = self.last_snapshot_at_ms;
        {
            let mut writable = self.status_store.write();
            *writable = snapshot.clone();
        }
        if let Err(error) = self.sink.emit_status(&snapshot) {
            warn!(error = %error, "failed to emit final connection status");
        }
    }

    fn admit_snapshot(
        &mut self,
        snapshot: &Snapshot,
        frame: &mut UiFrame,
        now: Instant,
        now_unix_ms: i64,
    ) -> Result<RefreshOutcome, AppError> {
        if snapshot.unchanged {
            return Ok(RefreshOutcome::NotModified);
        }

        if snapshot.status == Some(BotRunState::Error) {
            let message = snapshot
                .message
                .clone()
                .unwrap_or_else(|| "The bot reported an error".to_string());
            warn!(reason = %message, "bot reported an error snapshot");
            if !self.toasts.is_showing(ToastKind::Error, &message) {
                self.toast(frame, ToastKind::Error, "Bot error", message.clone(), now);
            }
            return Err(AppError::Backend(message));
        }

        match self.gate.admit(snapshot, now_unix_ms) {
            Admission::Duplicate => Ok(RefreshOutcome::Duplicate),
            Admission::Stale {
                incoming_ts,
                newest_ts,
            } => {
                debug!(incoming_ts, newest_ts, "dropping stale snapshot");
                Ok(RefreshOutcome::Stale)
            }
            Admission::Accepted { .. } => {
                let mut applied =
                    self.reconciler
                        .apply(snapshot, now, now_unix_ms, &mut self.scheduler);
                if applied.history_filter.is_some() {
                    let ledger = self.reconciler.ledger();
                    applied.history = Some(ledger.query(
                        ledger.selected_symbol(),
                        self.history_window,
                        now_unix_ms,
                    ));
                }
                if let Some(status) = snapshot.status {
                    self.bot_running = status == BotRunState::Running;
                }
                self.last_snapshot_at_ms = Some(now_unix_ms);
                self.status_store.write().last_snapshot_at_ms = Some(now_unix_ms);
                frame.merge(applied);
                Ok(RefreshOutcome::Accepted)
            }
        }
    }

    fn toast(
        &mut self,
        frame: &mut UiFrame,
        kind: ToastKind,
        title: &str,
        message: impl Into<String>,
        now: Instant,
    ) {
        let patches = self
            .toasts
            .push(kind, title, message, now, &mut self.scheduler);
        frame.toasts.extend(patches);
    }

    fn set_degraded(&mut self, frame: &mut UiFrame, degraded: bool) {
        if self.degraded == degraded {
            return;
        }
        self.degraded = degraded;
        frame.degraded = Some(degraded);
        self.status_store.write().degraded = degraded;
    }

    fn publish_status(
        &mut self,
        state: ConnectionState,
        attempt: u32,
        next_retry_ms: Option<u64>,
        reason: Option<String>,
        now: Instant,
    ) {
        if !self.status_throttle.allow(state, &reason, now) {
            return;
        }

        let snapshot = ConnectionStatusSnapshot {
            state,
            backend_url: self.backend_url.clone(),
            attempt,
            next_retry_ms,
            degraded: self.degraded,
            last_snapshot_at_ms: self.last_snapshot_at_ms,
            reason,
        };

        {
            let mut writable = self.status_store.write();
            *writable = snapshot.clone();
        }

        if let Err(error) = self.sink.emit_status(&snapshot) {
            warn!(error = %error, "failed to emit connection status");
        }
    }

    fn flush(&self, frame: UiFrame) {
        if frame.is_empty() {
            return;
        }
        if let Err(error) = self.sink.emit_frame(&frame) {
            warn!(error = %error, "failed to emit dashboard frame");
        }
    }
}

fn bot_action_failure(action: BotAction) -> &'static str {
    match action {
        BotAction::Start => "Failed to start the bot",
        BotAction::Stop => "Failed to stop the bot",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::frame::RowPatch;
    use crate::dashboard::toast::ToastPatch;
    use crate::dashboard::types::{ActionStatus, Direction, Position};
    use parking_lot::Mutex;

    const NOW_MS: i64 = 1_714_557_600_000;

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<UiFrame>>>,
        statuses: Arc<Mutex<Vec<ConnectionStatusSnapshot>>>,
    }

    impl RecordingSink {
        fn take_frames(&self) -> Vec<UiFrame> {
            std::mem::take(&mut *self.frames.lock())
        }

        fn last_status(&self) -> Option<ConnectionStatusSnapshot> {
            self.statuses.lock().last().cloned()
        }
    }

    impl FrameSink for RecordingSink {
        fn emit_frame(&self, frame: &UiFrame) -> Result<(), AppError> {
            self.frames.lock().push(frame.clone());
            Ok(())
        }

        fn emit_status(&self, status: &ConnectionStatusSnapshot) -> Result<(), AppError> {
            self.statuses.lock().push(status.clone());
            Ok(())
        }
    }

    fn runtime() -> (DashboardRuntime<RecordingSink>, RecordingSink) {
        let sink = RecordingSink::default();
        let config = DashboardConfig::default();
        let store = Arc::new(RwLock::new(ConnectionStatusSnapshot::stopped(
            config.backend_url.clone(),
            None,
        )));
        (DashboardRuntime::new(sink.clone(), &config, store), sink)
    }

    fn position(symbol: &str, current: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            direction: Direction::Long,
            entry_price: 100.0,
            current_price: Some(current),
            leverage: 1,
            quantity: Some(1.0),
            stop_loss: None,
            take_profit: None,
            entry_time: None,
        }
    }

    fn snapshot(positions: Vec<Position>, timestamp: i64) -> Snapshot {
        Snapshot {
            status: Some(BotRunState::Running),
            balance: Some(1_000.0),
            positions: Some(positions),
            timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    fn push(snapshot: Snapshot) -> DashboardEvent {
        DashboardEvent::Snapshot {
            snapshot,
            origin: SnapshotOrigin::Push,
            ack: None,
        }
    }

    fn success() -> ActionEnvelope {
        ActionEnvelope {
            status: ActionStatus::Success,
            message: None,
        }
    }

    #[test]
    fn reconnect_attempt_raises_degraded_until_data_arrives() {
        let (mut runtime, sink) = runtime();
        let now = Instant::now();

        runtime.handle(DashboardEvent::ReconnectAttempt { attempt: 1 }, now, NOW_MS);
        assert!(runtime.is_degraded());
        assert_eq!(sink.take_frames()[0].degraded, Some(true));
        assert_eq!(
            sink.last_status().map(|status| status.state),
            Some(ConnectionState::Reconnecting)
        );

        runtime.handle(DashboardEvent::Ping { timestamp: None }, now, NOW_MS);
        assert!(!runtime.is_degraded());
        assert_eq!(sink.take_frames()[0].degraded, Some(false));
    }

    #[test]
    fn connect_requests_resync_and_reports_live() {
        let (mut runtime, sink) = runtime();
        let commands = runtime.handle(
            DashboardEvent::Connected { reconnected: false },
            Instant::now(),
            NOW_MS,
        );

        assert_eq!(commands, vec![RuntimeCommand::ResyncBotStatus]);
        assert_eq!(
            sink.last_status().map(|status| status.state),
            Some(ConnectionState::Live)
        );
        let frames = sink.take_frames();
        assert!(matches!(
            frames[0].toasts.as_slice(),
            [ToastPatch::Show { .. }]
        ));
    }

    #[test]
    fn one_frame_per_accepted_snapshot_and_none_for_duplicates() {
        let (mut runtime, sink) = runtime();
        let now = Instant::now();
        let first = snapshot(vec![position("BTC", 110.0)], NOW_MS);

        runtime.handle(push(first.clone()), now, NOW_MS);
        let frames = sink.take_frames();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0].positions.as_slice(), [RowPatch::Insert { .. }]));

        runtime.handle(push(first), now, NOW_MS);
        assert!(sink.take_frames().is_empty());
    }

    #[tokio::test]
    async fn manual_refresh_ack_reports_outcomes() {
        let (mut runtime, _sink) = runtime();
        let now = Instant::now();

        let (ack, answer) = oneshot::channel();
        runtime.handle(
            DashboardEvent::Snapshot {
                snapshot: snapshot(Vec::new(), NOW_MS + 1_000),
                origin: SnapshotOrigin::Manual,
                ack: Some(ack),
            },
            now,
            NOW_MS,
        );
        assert_eq!(
            answer.await.expect("ack").expect("refresh ok"),
            RefreshOutcome::Accepted
        );

        let (ack, answer) = oneshot::channel();
        runtime.handle(
            DashboardEvent::Snapshot {
                snapshot: snapshot(vec![position("ETH", 101.0)], NOW_MS),
                origin: SnapshotOrigin::Manual,
                ack: Some(ack),
            },
            now,
            NOW_MS,
        );
        assert_eq!(
            answer.await.expect("ack").expect("refresh ok"),
            RefreshOutcome::Stale
        );

        let (ack, answer) = oneshot::channel();
        runtime.handle(
            DashboardEvent::NotModified {
                origin: SnapshotOrigin::Manual,
                ack: Some(ack),
            },
            now,
            NOW_MS,
        );
        assert_eq!(
            answer.await.expect("ack").expect("refresh ok"),
            RefreshOutcome::NotModified
        );
    }

    #[tokio::test]
    async fn error_snapshot_is_not_admitted() {
        let (mut runtime, sink) = runtime();
        let (ack, answer) = oneshot::channel();
        let rejected = Snapshot {
            status: Some(BotRunState::Error),
            message: Some("exchange unreachable".to_string()),
            ..Default::default()
        };

        runtime.handle(
            DashboardEvent::Snapshot {
                snapshot: rejected,
                origin: SnapshotOrigin::Manual,
                ack: Some(ack),
            },
            Instant::now(),
            NOW_MS,
        );

        assert!(answer.await.expect("ack").is_err());
        let frames = sink.take_frames();
        assert!(frames[0].positions.is_empty());
        assert_eq!(frames[0].toasts.len(), 1);
    }

    #[test]
    fn repeated_error_snapshots_share_one_toast() {
        let (mut runtime, sink) = runtime();
        let start = Instant::now();
        let failing = || {
            push(Snapshot {
                status: Some(BotRunState::Error),
                message: Some("exchange unreachable".to_string()),
                ..Default::default()
            })
        };
        let shown = |frames: Vec<UiFrame>| {
            frames
                .iter()
                .flat_map(|frame| frame.toasts.iter())
                .filter(|patch| matches!(patch, ToastPatch::Show { .. }))
                .count()
        };

        for offset in [0, 1_000, 2_000] {
            runtime.handle(failing(), start + Duration::from_millis(offset), NOW_MS);
        }
        assert_eq!(shown(sink.take_frames()), 1);

        runtime.on_timer(start + Duration::from_millis(5_000));
        runtime.handle(failing(), start + Duration::from_millis(5_100), NOW_MS);
        assert_eq!(shown(sink.take_frames()), 1);
    }

    #[test]
    fn stale_pings_coalesce_into_one_refresh() {
        let (mut runtime, _sink) = runtime();
        let now = Instant::now();
        runtime.handle(push(snapshot(Vec::new(), NOW_MS)), now, NOW_MS);

        let newer = DashboardEvent::Ping {
            timestamp: Some(NOW_MS + 5_000),
        };
        assert_eq!(
            runtime.handle(newer, now, NOW_MS),
            vec![RuntimeCommand::Refresh {
                origin: SnapshotOrigin::Staleness
            }]
        );
        assert!(runtime
            .handle(
                DashboardEvent::Ping {
                    timestamp: Some(NOW_MS + 6_000)
                },
                now,
                NOW_MS
            )
            .is_empty());

        runtime.handle(
            DashboardEvent::NotModified {
                origin: SnapshotOrigin::Staleness,
                ack: None,
            },
            now,
            NOW_MS,
        );
        assert_eq!(
            runtime.handle(
                DashboardEvent::Ping {
                    timestamp: Some(NOW_MS + 7_000)
                },
                now,
                NOW_MS
            ),
            vec![RuntimeCommand::Refresh {
                origin: SnapshotOrigin::Staleness
            }]
        );
    }

    #[test]
    fn ping_at_or_before_freshness_mark_is_ignored() {
        let (mut runtime, _sink) = runtime();
        let now = Instant::now();
        runtime.handle(push(snapshot(Vec::new(), NOW_MS)), now, NOW_MS);

        assert!(runtime
            .handle(DashboardEvent::Ping { timestamp: Some(NOW_MS) }, now, NOW_MS)
            .is_empty());
    }

    #[test]
    fn removal_finishes_on_timer_and_shows_placeholder() {
        let (mut runtime, sink) = runtime();
        let start = Instant::now();
        runtime.handle(push(snapshot(vec![position("BTC", 110.0)], NOW_MS)), start, NOW_MS);
        runtime.handle(push(snapshot(Vec::new(), NOW_MS + 1)), start, NOW_MS + 1);
        sink.take_frames();

        runtime.on_timer(start + Duration::from_millis(600));
        let frames = sink.take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].positions,
            vec![
                RowPatch::Remove {
                    symbol: "BTC".to_string()
                },
                RowPatch::placeholder()
            ]
        );
        assert!(frames[0].balance_series.is_some());
    }

    #[test]
    fn close_flow_sets_loading_then_removes_row() {
        let (mut runtime, sink) = runtime();
        let now = Instant::now();
        runtime.handle(push(snapshot(vec![position("BTC", 110.0)], NOW_MS)), now, NOW_MS);
        sink.take_frames();

        runtime.handle(
            DashboardEvent::ClosePending {
                symbol: "BTC".to_string(),
            },
            now,
            NOW_MS,
        );
        assert!(matches!(
            sink.take_frames()[0].positions.as_slice(),
            [RowPatch::SetLoading { .. }]
        ));

        let commands = runtime.handle(
            DashboardEvent::CloseFinished {
                symbol: "BTC".to_string(),
                result: Ok(success()),
            },
            now,
            NOW_MS,
        );
        assert_eq!(
            commands,
            vec![RuntimeCommand::Refresh {
                origin: SnapshotOrigin::Manual
            }]
        );
        assert!(matches!(
            sink.take_frames()[0].positions.as_slice(),
            [RowPatch::BeginRemoval { .. }]
        ));
        assert!(runtime.reconciler().is_removing("BTC"));
    }

    #[test]
    fn failed_close_reverts_loading_with_shake() {
        let (mut runtime, sink) = runtime();
        let now = Instant::now();
        runtime.handle(push(snapshot(vec![position("BTC", 110.0)], NOW_MS)), now, NOW_MS);
        sink.take_frames();

        runtime.handle(
            DashboardEvent::CloseFinished {
                symbol: "BTC".to_string(),
                result: Ok(ActionEnvelope {
                    status: ActionStatus::Error,
                    message: Some("No active position for BTC".to_string()),
                }),
            },
            now,
            NOW_MS,
        );

        let frames = sink.take_frames();
        assert_eq!(
            frames[0].positions,
            vec![RowPatch::RevertLoading {
                symbol: "BTC".to_string(),
                shake: true
            }]
        );
        assert_eq!(runtime.reconciler().rendered_symbols(), vec!["BTC".to_string()]);
    }

    #[test]
    fn health_probe_warns_only_when_bot_expected_running() {
        let (mut runtime, sink) = runtime();
        let now = Instant::now();
        let idle = SystemStatusWire {
            bot_status: Some("stopped".to_string()),
            uptime: 0.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            positions_count: None,
            message: None,
        };

        runtime.handle(DashboardEvent::HealthProbe(Ok(idle.clone())), now, NOW_MS);
        assert!(sink.take_frames().is_empty());

        runtime.handle(DashboardEvent::BotStatus { running: true }, now, NOW_MS);
        sink.take_frames();
        runtime.handle(DashboardEvent::HealthProbe(Ok(idle)), now, NOW_MS);
        assert_eq!(sink.take_frames()[0].toasts.len(), 1);

        runtime.handle(
            DashboardEvent::HealthProbe(Err("connection refused".to_string())),
            now,
            NOW_MS,
        );
        assert_eq!(sink.take_frames()[0].toasts.len(), 1);
    }

    #[test]
    fn toast_expires_through_scheduler() {
        let (mut runtime, sink) = runtime();
        let start = Instant::now();
        runtime.handle(
            DashboardEvent::BotActionFinished {
                action: BotAction::Stop,
                result: Ok(success()),
            },
            start,
            NOW_MS,
        );
        assert!(!runtime.bot_running());
        sink.take_frames();

        runtime.on_timer(start + Duration::from_millis(5_000));
        assert!(matches!(
            sink.take_frames()[0].toasts.as_slice(),
            [ToastPatch::BeginExit { .. }]
        ));
        runtime.on_timer(start + Duration::from_millis(5_300));
        assert!(matches!(
            sink.take_frames()[0].toasts.as_slice(),
            [ToastPatch::Remove { .. }]
        ));
        assert_eq!(runtime.pending_tasks(), 0);
    }

    #[test]
    fn repeated_connect_errors_are_throttled() {
        let (mut runtime, sink) = runtime();
        let now = Instant::now();
        let failure = || DashboardEvent::ConnectError {
            attempt: 1,
            message: "connection refused".to_string(),
        };

        runtime.handle(failure(), now, NOW_MS);
        runtime.handle(failure(), now + Duration::from_millis(100), NOW_MS);
        assert_eq!(sink.statuses.lock().len(), 1);

        runtime.handle(failure(), now + Duration::from_millis(700), NOW_MS);
        assert_eq!(sink.statuses.lock().len(), 2);
    }

    #[test]
    fn shutdown_publishes_stopped_status() {
        let (mut runtime, sink) = runtime();
        runtime.shutdown(Some("session stopped".to_string()));
        let status = sink.last_status().expect("final status");
        assert_eq!(status.state, ConnectionState::Stopped);
        assert_eq!(status.reason.as_deref(), Some("session stopped"));
    }
}
