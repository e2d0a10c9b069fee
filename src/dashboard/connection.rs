use crate::dashboard::bot_api::{connect_push_stream, BotPushStream};
use crate::dashboard::runtime::{DashboardEvent, SnapshotOrigin};
use crate::dashboard::socketio::{
    decode_frame, encode_connect, encode_disconnect, encode_event, encode_pong, EnginePacket,
    OpenHandshake, SocketPacket, BOT_STATUS_EVENT, DATA_PING_EVENT, DATA_UPDATE_EVENT,
    START_BACKGROUND_TASK_EVENT,
};
use crate::dashboard::types::{BotStatusPush, DashboardConfig, DataPing, Snapshot, BACKOFF_FACTOR};
use crate::error::AppError;
use futures_util::{SinkExt, StreamExt};
use simd_json::OwnedValue;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
    pub transport_delay_max_ms: u64,
}

impl From<&DashboardConfig> for BackoffPolicy {
    fn from(config: &DashboardConfig) -> Self {
        Self {
            initial_ms: config.initial_backoff_ms,
            cap_ms: config.backoff_cap_ms,
            max_attempts: config.max_attempts,
            transport_delay_max_ms: config.transport_delay_max_ms,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the transport's own retry number `attempt` (1-based).
    pub fn transport_retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay_ms = self
            .initial_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.transport_delay_max_ms);
        Duration::from_millis(delay_ms)
    }

    /// Delay of the give-up number `give_ups` (0-based).
    pub fn manual_reconnect_delay(&self, give_ups: u32) -> Duration {
        let grown = self.initial_ms as f64 * BACKOFF_FACTOR.powi(give_ups.min(64) as i32);
        let delay_ms = grown.round().min(self.cap_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    ServerDisconnect,
    TransportClose,
    PingTimeout,
    TransportError(String),
    ClientStop,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ServerDisconnect => "io server disconnect",
            Self::TransportClose => "transport close",
            Self::PingTimeout => "ping timeout",
            Self::TransportError(_) => "transport error",
            Self::ClientStop => "io client disconnect",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    AutoRetry { delay: Duration },
    GiveUp { delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    ReconnectNow,
    AutoRetry { delay: Duration },
    Stop,
}

/// Attempt accounting for the push channel. Holds no I/O so the retry policy
/// can be driven step by step.
#[derive(Debug)]
pub struct ConnectionManager {
    policy: BackoffPolicy,
    attempts: u32,
    give_ups: u32,
    manual_pending: bool,
    retrying: bool,
    ever_connected: bool,
}

impl ConnectionManager {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            give_ups: 0,
            manual_pending: false,
            retrying: false,
            ever_connected: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_retrying(&self) -> bool {
        self.retrying
    }

    pub fn current_manual_delay(&self) -> Duration {
        self.policy.manual_reconnect_delay(self.give_ups)
    }

    /// Returns true when this connection ends a reconnection cycle.
    pub fn on_connected(&mut self) -> bool {
        let reconnected = self.retrying && self.ever_connected;
        self.attempts = 0;
        self.give_ups = 0;
        self.manual_pending = false;
        self.retrying = false;
        self.ever_connected = true;
        reconnected
    }

    pub fn on_connect_error(&mut self) -> FailureAction {
        self.attempts = self.attempts.saturating_add(1);
        self.retrying = true;

        if self.attempts >= self.policy.max_attempts {
            self.manual_pending = true;
            FailureAction::GiveUp {
                delay: self.current_manual_delay(),
            }
        } else {
            FailureAction::AutoRetry {
                delay: self.policy.transport_retry_delay(self.attempts),
            }
        }
    }

    /// Called when a scheduled manual reconnect fires. Grows the next give-up delay.
    pub fn begin_manual_reconnect(&mut self) {
        if self.manual_pending {
            self.manual_pending = false;
            self.give_ups = self.give_ups.saturating_add(1);
        }
    }

    pub fn on_disconnect(&mut self, reason: &DisconnectReason) -> DisconnectAction {
        match reason {
            DisconnectReason::ClientStop => DisconnectAction::Stop,
            DisconnectReason::ServerDisconnect => {
                self.retrying = true;
                DisconnectAction::ReconnectNow
            }
            DisconnectReason::TransportClose
            | DisconnectReason::PingTimeout
            | DisconnectReason::TransportError(_) => {
                self.retrying = true;
                DisconnectAction::AutoRetry {
                    delay: self.policy.transport_retry_delay(1),
                }
            }
        }
    }
}

pub struct PushChannelContext {
    pub base_url: String,
    pub policy: BackoffPolicy,
    pub handshake_timeout: Duration,
    pub events: mpsc::Sender<DashboardEvent>,
    pub cancel_token: CancellationToken,
}

impl PushChannelContext {
    async fn notify(&self, event: DashboardEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// Keeps the Socket.IO push channel alive until cancelled. Every lifecycle
/// change is reported to the runtime as an event; nothing is returned.
pub async fn run_push_channel(context: PushChannelContext) {
    let mut manager = ConnectionManager::new(context.policy);
    let mut pending_delay: Option<Duration> = None;

    while !context.cancel_token.is_cancelled() {
        if let Some(delay) = pending_delay.take() {
            tokio::select! {
                _ = context.cancel_token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            manager.begin_manual_reconnect();
        }

        if manager.is_retrying() {
            let attempt = manager.attempts().saturating_add(1);
            if !context.notify(DashboardEvent::ReconnectAttempt { attempt }).await {
                break;
            }
        }

        let opened = tokio::select! {
            _ = context.cancel_token.cancelled() => break,
            opened = tokio::time::timeout(
                context.handshake_timeout,
                open_session(&context.base_url),
            ) => opened,
        };
        let session = match opened {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "push handshake exceeded {}ms",
                context.handshake_timeout.as_millis()
            ))),
        };

        match session {
            Ok((stream, handshake)) => {
                let reconnected = manager.on_connected();
                info!(
                    sid = %handshake.sid,
                    ping_interval_ms = handshake.ping_interval,
                    max_payload = ?handshake.max_payload,
                    upgrades = ?handshake.upgrades,
                    reconnected,
                    "push channel connected"
                );
                if !context.notify(DashboardEvent::Connected { reconnected }).await {
                    break;
                }

                let reason = pump_session(stream, &handshake, &context).await;
                if reason == DisconnectReason::ClientStop {
                    break;
                }
                warn!(reason = reason.as_str(), "push channel disconnected");
                match manager.on_disconnect(&reason) {
                    DisconnectAction::ReconnectNow => pending_delay = None,
                    DisconnectAction::AutoRetry { delay } => pending_delay = Some(delay),
                    DisconnectAction::Stop => break,
                }
                if !context.notify(DashboardEvent::Disconnected { reason }).await {
                    break;
                }
            }
            Err(error) => {
                let action = manager.on_connect_error();
                let attempt = manager.attempts();
                warn!(attempt, error = %error, "push channel connect failed");
                if !context
                    .notify(DashboardEvent::ConnectError {
                        attempt,
                        message: error.to_string(),
                    })
                    .await
                {
                    break;
                }

                match action {
                    FailureAction::AutoRetry { delay } => pending_delay = Some(delay),
                    FailureAction::GiveUp { delay } => {
                        let delay_ms = delay.as_millis().min(u64::MAX as u128) as u64;
                        info!(attempt, delay_ms, "push channel gave up, manual reconnect scheduled");
                        pending_delay = Some(delay);
                        if !context
                            .notify(DashboardEvent::GaveUp {
                                attempt,
                                retry_in_ms: delay_ms,
                            })
                            .await
                        {
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn open_session(base_url: &str) -> Result<(BotPushStream, OpenHandshake), AppError> {
    let mut stream = connect_push_stream(base_url).await?;

    let handshake = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if let EnginePacket::Open(handshake) = decode_frame(&text)? {
                    break handshake;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(AppError::Protocol(
                    "push channel closed during handshake".to_string(),
                ))
            }
            Some(Ok(_)) => {}
            Some(Err(error)) => return Err(error.into()),
        }
    };

    stream.send(Message::Text(encode_connect())).await?;
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match decode_frame(&text)? {
                EnginePacket::Message(SocketPacket::Connect) => return Ok((stream, handshake)),
                EnginePacket::Message(SocketPacket::ConnectError { message }) => {
                    return Err(AppError::Backend(message))
                }
                EnginePacket::Ping => stream.send(Message::Text(encode_pong())).await?,
                _ => {}
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(AppError::Protocol(
                    "push channel closed before namespace connect".to_string(),
                ))
            }
            Some(Ok(_)) => {}
            Some(Err(error)) => return Err(error.into()),
        }
    }
}

async fn pump_session(
    stream: BotPushStream,
    handshake: &OpenHandshake,
    context: &PushChannelContext,
) -> DisconnectReason {
    let (mut writer, mut reader) = stream.split();

    let start_frame = match encode_event::<()>(START_BACKGROUND_TASK_EVENT, None) {
        Ok(frame) => frame,
        Err(error) => return DisconnectReason::TransportError(error.to_string()),
    };
    if let Err(error) = writer.send(Message::Text(start_frame)).await {
        return DisconnectReason::TransportError(error.to_string());
    }

    let ping_window = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let mut ping_deadline = Instant::now() + ping_window;

    loop {
        tokio::select! {
            _ = context.cancel_token.cancelled() => {
                let _ = writer.send(Message::Text(encode_disconnect())).await;
                let _ = writer.close().await;
                return DisconnectReason::ClientStop;
            }
            _ = tokio::time::sleep_until(ping_deadline) => {
                return DisconnectReason::PingTimeout;
            }
            message = reader.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return DisconnectReason::TransportClose,
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => return DisconnectReason::TransportError(error.to_string()),
                };

                match decode_frame(&text) {
                    Ok(EnginePacket::Ping) => {
                        ping_deadline = Instant::now() + ping_window;
                        if let Err(error) = writer.send(Message::Text(encode_pong())).await {
                            return DisconnectReason::TransportError(error.to_string());
                        }
                    }
                    Ok(EnginePacket::Close) => return DisconnectReason::TransportClose,
                    Ok(EnginePacket::Message(SocketPacket::Disconnect)) => {
                        return DisconnectReason::ServerDisconnect;
                    }
                    Ok(EnginePacket::Message(SocketPacket::Event { name, payload })) => {
                        match decode_push_event(&name, payload) {
                            Ok(Some(event)) => {
                                if !context.notify(event).await {
                                    return DisconnectReason::ClientStop;
                                }
                            }
                            Ok(None) => debug!(event = %name, "ignoring push event"),
                            Err(error) => warn!(event = %name, error = %error, "failed to decode push event"),
                        }
                    }
                    Ok(_) => {}
                    Err(error) => warn!(error = %error, "failed to decode engine.io frame"),
                }
            }
        }
    }
}

pub fn decode_push_event(
    name: &str,
    payload: OwnedValue,
) -> Result<Option<DashboardEvent>, AppError> {
    match name {
        DATA_UPDATE_EVENT => {
            let snapshot: Snapshot = simd_json::serde::from_owned_value(payload)?;
            Ok(Some(DashboardEvent::Snapshot {
                snapshot,
                origin: SnapshotOrigin::Push,
                ack: None,
            }))
        }
        DATA_PING_EVENT => {
            let ping: DataPing = simd_json::serde::from_owned_value(payload)?;
            Ok(Some(DashboardEvent::Ping {
                timestamp: ping.timestamp,
            }))
        }
        BOT_STATUS_EVENT => {
            let status: BotStatusPush = simd_json::serde::from_owned_value(payload)?;
            Ok(status.status.map(|status| DashboardEvent::BotStatus {
                running: status.eq_ignore_ascii_case("running"),
            }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::from(&DashboardConfig::default())
    }

    #[test]
    fn transport_retry_grows_then_caps() {
        let policy = policy();
        assert_eq!(policy.transport_retry_delay(1), Duration::from_millis(2_000));
        assert_eq!(policy.transport_retry_delay(2), Duration::from_millis(4_000));
        assert_eq!(policy.transport_retry_delay(3), Duration::from_millis(8_000));
        assert_eq!(policy.transport_retry_delay(4), Duration::from_millis(10_000));
        assert_eq!(policy.transport_retry_delay(40), Duration::from_millis(10_000));
    }

    #[test]
    fn gives_up_at_max_attempts_then_grows_manual_delay() {
        let policy = policy();
        let mut manager = ConnectionManager::new(policy);

        for _ in 1..policy.max_attempts {
            assert!(matches!(
                manager.on_connect_error(),
                FailureAction::AutoRetry { .. }
            ));
        }

        for give_up in 0..12_u32 {
            let action = manager.on_connect_error();
            let expected_ms = (2_000.0 * 1.5_f64.powi(give_up as i32)).round().min(30_000.0) as u64;
            assert_eq!(
                action,
                FailureAction::GiveUp {
                    delay: Duration::from_millis(expected_ms)
                }
            );
            assert!(expected_ms <= 30_000);
            manager.begin_manual_reconnect();
        }
    }

    #[test]
    fn successful_connect_resets_backoff() {
        let mut manager = ConnectionManager::new(policy());
        for _ in 0..6 {
            let _ = manager.on_connect_error();
            manager.begin_manual_reconnect();
        }
        assert!(manager.current_manual_delay() > Duration::from_millis(2_000));

        assert!(!manager.on_connected());
        assert_eq!(manager.attempts(), 0);
        assert_eq!(manager.current_manual_delay(), Duration::from_millis(2_000));
        assert!(!manager.is_retrying());
    }

    #[test]
    fn reconnect_is_reported_only_after_prior_connection() {
        let mut manager = ConnectionManager::new(policy());
        assert!(!manager.on_connected());

        assert_eq!(
            manager.on_disconnect(&DisconnectReason::TransportClose),
            DisconnectAction::AutoRetry {
                delay: Duration::from_millis(2_000)
            }
        );
        assert!(manager.is_retrying());
        assert!(manager.on_connected());
    }

    #[test]
    fn classifies_disconnect_reasons() {
        let mut manager = ConnectionManager::new(policy());
        assert_eq!(
            manager.on_disconnect(&DisconnectReason::ServerDisconnect),
            DisconnectAction::ReconnectNow
        );
        assert_eq!(
            manager.on_disconnect(&DisconnectReason::ClientStop),
            DisconnectAction::Stop
        );
        assert!(matches!(
            manager.on_disconnect(&DisconnectReason::PingTimeout),
            DisconnectAction::AutoRetry { .. }
        ));
        assert_eq!(DisconnectReason::PingTimeout.as_str(), "ping timeout");
        assert_eq!(
            DisconnectReason::ServerDisconnect.as_str(),
            "io server disconnect"
        );
    }

    #[test]
    fn decodes_known_push_events() {
        let EnginePacket::Message(SocketPacket::Event { name, payload }) =
            decode_frame(r#"42["bot_status",{"status":"stopped","timestamp":1}]"#)
                .expect("frame should decode")
        else {
            panic!("expected event");
        };
        let event = decode_push_event(&name, payload)
            .expect("payload should decode")
            .expect("bot status is handled");
        assert!(matches!(event, DashboardEvent::BotStatus { running: false }));

        let EnginePacket::Message(SocketPacket::Event { name, payload }) =
            decode_frame(r#"42["data_ping",{"timestamp":42}]"#).expect("frame should decode")
        else {
            panic!("expected event");
        };
        let event = decode_push_event(&name, payload)
            .expect("payload should decode")
            .expect("ping is handled");
        assert!(matches!(
            event,
            DashboardEvent::Ping {
                timestamp: Some(42)
            }
        ));

        assert!(decode_push_event("chat", OwnedValue::default())
            .expect("unknown events are ignored")
            .is_none());
    }
}
