use crate::error::AppError;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";
pub const BACKEND_URL_ENV: &str = "BOT_DASHBOARD_BACKEND_URL";
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 2_000;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
pub const BACKOFF_FACTOR: f64 = 1.5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TRANSPORT_DELAY_MAX_MS: u64 = 10_000;
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_PULSE_THRESHOLD_PCT: f64 = 0.01;
pub const DEFAULT_PULSE_COOLDOWN_MS: u64 = 2_000;
pub const DEFAULT_CHART_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_HISTORY_CAP: usize = 500;
pub const MIN_INITIAL_BACKOFF_MS: u64 = 100;
pub const MAX_INITIAL_BACKOFF_MS: u64 = 30_000;
pub const MIN_BACKOFF_CAP_MS: u64 = 1_000;
pub const MAX_BACKOFF_CAP_MS: u64 = 300_000;
pub const MIN_MAX_ATTEMPTS: u32 = 1;
pub const MAX_MAX_ATTEMPTS: u32 = 50;
pub const MIN_HANDSHAKE_TIMEOUT_MS: u64 = 1_000;
pub const MAX_HANDSHAKE_TIMEOUT_MS: u64 = 60_000;
pub const MIN_HEALTH_INTERVAL_MS: u64 = 5_000;
pub const MAX_HEALTH_INTERVAL_MS: u64 = 300_000;
pub const MIN_PULSE_COOLDOWN_MS: u64 = 250;
pub const MAX_PULSE_COOLDOWN_MS: u64 = 10_000;
pub const MIN_CHART_DEBOUNCE_MS: u64 = 50;
pub const MAX_CHART_DEBOUNCE_MS: u64 = 5_000;
pub const MIN_HISTORY_CAP: usize = 10;
pub const MAX_HISTORY_CAP: usize = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Live,
    Reconnecting,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusSnapshot {
    pub state: ConnectionState,
    pub backend_url: String,
    pub attempt: u32,
    pub next_retry_ms: Option<u64>,
    pub degraded: bool,
    pub last_snapshot_at_ms: Option<i64>,
    pub reason: Option<String>,
}

impl ConnectionStatusSnapshot {
    pub fn stopped(backend_url: String, reason: Option<String>) -> Self {
        Self {
            state: ConnectionState::Stopped,
            backend_url,
            attempt: 0,
            next_retry_ms: None,
            degraded: false,
            last_snapshot_at_ms: None,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartDashboardArgs {
    pub backend_url: Option<String>,
    pub initial_backoff_ms: Option<u64>,
    pub backoff_cap_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub handshake_timeout_ms: Option<u64>,
    pub health_interval_ms: Option<u64>,
    pub pulse_threshold_pct: Option<f64>,
    pub pulse_cooldown_ms: Option<u64>,
    pub chart_debounce_ms: Option<u64>,
    pub history_cap: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub backend_url: String,
    pub initial_backoff_ms: u64,
    pub backoff_cap_ms: u64,
    pub max_attempts: u32,
    pub handshake_timeout_ms: u64,
    pub transport_delay_max_ms: u64,
    pub health_interval_ms: u64,
    pub pulse_threshold_pct: f64,
    pub pulse_cooldown_ms: u64,
    pub chart_debounce_ms: u64,
    pub history_cap: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            transport_delay_max_ms: DEFAULT_TRANSPORT_DELAY_MAX_MS,
            health_interval_ms: DEFAULT_HEALTH_INTERVAL_MS,
            pulse_threshold_pct: DEFAULT_PULSE_THRESHOLD_PCT,
            pulse_cooldown_ms: DEFAULT_PULSE_COOLDOWN_MS,
            chart_debounce_ms: DEFAULT_CHART_DEBOUNCE_MS,
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

pub fn resolve_default_backend_url() -> String {
    std::env::var(BACKEND_URL_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
}

fn check_range<T>(name: &str, value: T, min: T, max: T) -> Result<T, AppError>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(AppError::InvalidArgument(format!(
            "{name} must be between {min} and {max}"
        )));
    }
    Ok(value)
}

impl StartDashboardArgs {
    pub fn normalize(self) -> Result<DashboardConfig, AppError> {
        let backend_url = self
            .backend_url
            .unwrap_or_else(resolve_default_backend_url)
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !(backend_url.starts_with("http://") || backend_url.starts_with("https://")) {
            return Err(AppError::InvalidArgument(
                "backendUrl must start with http:// or https://".to_string(),
            ));
        }

        let initial_backoff_ms = check_range(
            "initialBackoffMs",
            self.initial_backoff_ms.unwrap_or(DEFAULT_INITIAL_BACKOFF_MS),
            MIN_INITIAL_BACKOFF_MS,
            MAX_INITIAL_BACKOFF_MS,
        )?;
        let backoff_cap_ms = check_range(
            "backoffCapMs",
            self.backoff_cap_ms.unwrap_or(DEFAULT_BACKOFF_CAP_MS),
            MIN_BACKOFF_CAP_MS,
            MAX_BACKOFF_CAP_MS,
        )?;
        if backoff_cap_ms < initial_backoff_ms {
            return Err(AppError::InvalidArgument(
                "backoffCapMs must not be lower than initialBackoffMs".to_string(),
            ));
        }
        let max_attempts = check_range(
            "maxAttempts",
            self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            MIN_MAX_ATTEMPTS,
            MAX_MAX_ATTEMPTS,
        )?;
        let handshake_timeout_ms = check_range(
            "handshakeTimeoutMs",
            self.handshake_timeout_ms
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            MIN_HANDSHAKE_TIMEOUT_MS,
            MAX_HANDSHAKE_TIMEOUT_MS,
        )?;
        let health_interval_ms = check_range(
            "healthIntervalMs",
            self.health_interval_ms.unwrap_or(DEFAULT_HEALTH_INTERVAL_MS),
            MIN_HEALTH_INTERVAL_MS,
            MAX_HEALTH_INTERVAL_MS,
        )?;

        let pulse_threshold_pct = self
            .pulse_threshold_pct
            .unwrap_or(DEFAULT_PULSE_THRESHOLD_PCT);
        if !pulse_threshold_pct.is_finite() || pulse_threshold_pct < 0.0 {
            return Err(AppError::InvalidArgument(
                "pulseThresholdPct must be a finite non-negative number".to_string(),
            ));
        }

        let pulse_cooldown_ms = check_range(
            "pulseCooldownMs",
            self.pulse_cooldown_ms.unwrap_or(DEFAULT_PULSE_COOLDOWN_MS),
            MIN_PULSE_COOLDOWN_MS,
            MAX_PULSE_COOLDOWN_MS,
        )?;
        let chart_debounce_ms = check_range(
            "chartDebounceMs",
            self.chart_debounce_ms.unwrap_or(DEFAULT_CHART_DEBOUNCE_MS),
            MIN_CHART_DEBOUNCE_MS,
            MAX_CHART_DEBOUNCE_MS,
        )?;
        let history_cap = check_range(
            "historyCap",
            self.history_cap.unwrap_or(DEFAULT_HISTORY_CAP),
            MIN_HISTORY_CAP,
            MAX_HISTORY_CAP,
        )?;

        Ok(DashboardConfig {
            backend_url,
            initial_backoff_ms,
            backoff_cap_ms,
            max_attempts,
            handshake_timeout_ms,
            transport_delay_max_ms: DEFAULT_TRANSPORT_DELAY_MAX_MS.max(initial_backoff_ms),
            health_interval_ms,
            pulse_threshold_pct,
            pulse_cooldown_ms,
            chart_debounce_ms,
            history_cap,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSession {
    pub running: bool,
    pub backend_url: String,
    pub initial_backoff_ms: u64,
    pub backoff_cap_ms: u64,
    pub max_attempts: u32,
    pub handshake_timeout_ms: u64,
    pub health_interval_ms: u64,
    pub pulse_threshold_pct: f64,
    pub pulse_cooldown_ms: u64,
    pub chart_debounce_ms: u64,
    pub history_cap: usize,
}

impl DashboardSession {
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self {
            running: true,
            backend_url: config.backend_url.clone(),
            initial_backoff_ms: config.initial_backoff_ms,
            backoff_cap_ms: config.backoff_cap_ms,
            max_attempts: config.max_attempts,
            handshake_timeout_ms: config.handshake_timeout_ms,
            health_interval_ms: config.health_interval_ms,
            pulse_threshold_pct: config.pulse_threshold_pct,
            pulse_cooldown_ms: config.pulse_cooldown_ms,
            chart_debounce_ms: config.chart_debounce_ms,
            history_cap: config.history_cap,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSessionStopResult {
    pub stopped: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BotRunState {
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }
}

impl TryFrom<String> for Direction {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LONG" => Ok(Self::Long),
            "SHORT" => Ok(Self::Short),
            other => Err(AppError::InvalidArgument(format!(
                "unknown position direction '{other}'"
            ))),
        }
    }
}

impl From<Direction> for String {
    fn from(value: Direction) -> Self {
        value.as_str().to_string()
    }
}

fn default_leverage() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub entry_time: Option<String>,
}

impl Position {
    pub fn effective_leverage(&self) -> u32 {
        self.leverage.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum TradeAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Other(String),
}

impl From<String> for TradeAction {
    fn from(value: String) -> Self {
        let lowered = value.to_lowercase();
        if lowered.contains("ouverture_long") || lowered.contains("open_long") {
            Self::OpenLong
        } else if lowered.contains("ouverture_short") || lowered.contains("open_short") {
            Self::OpenShort
        } else if lowered.contains("fermeture_long") || lowered.contains("close_long") {
            Self::CloseLong
        } else if lowered.contains("fermeture_short") || lowered.contains("close_short") {
            Self::CloseShort
        } else {
            Self::Other(value)
        }
    }
}

impl TradeAction {
    pub fn label(&self) -> &str {
        match self {
            Self::OpenLong => "Open Long",
            Self::OpenShort => "Open Short",
            Self::CloseLong => "Close Long",
            Self::CloseShort => "Close Short",
            Self::Other(raw) => raw,
        }
    }

    pub fn direction_label(&self) -> &'static str {
        match self {
            Self::OpenLong | Self::CloseLong => "Long",
            Self::OpenShort | Self::CloseShort => "Short",
            Self::Other(raw) => {
                let lowered = raw.to_lowercase();
                if lowered.contains("long") {
                    "Long"
                } else if lowered.contains("short") {
                    "Short"
                } else {
                    ""
                }
            }
        }
    }

    fn canonical(&self) -> &str {
        match self {
            Self::OpenLong => "open_long",
            Self::OpenShort => "open_short",
            Self::CloseLong => "close_long",
            Self::CloseShort => "close_short",
            Self::Other(raw) => raw,
        }
    }
}

impl Default for TradeAction {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct Trade {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub action: TradeAction,
    #[serde(default)]
    pub entry_price: f64,
    #[serde(default)]
    pub exit_price: f64,
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub profit_percent: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub entry_time: String,
    #[serde(default)]
    pub exit_time: String,
    #[serde(default)]
    pub leverage: Option<u32>,
}

impl Trade {
    /// Identity used to dedupe the same closed trade across snapshots.
    pub fn identity(&self) -> (String, String, String, String) {
        (
            self.symbol.clone(),
            self.entry_time.clone(),
            self.exit_time.clone(),
            self.action.canonical().to_string(),
        )
    }
}

fn unknown_trend() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrendRow {
    pub symbol: String,
    #[serde(default = "unknown_trend")]
    pub trend_1m: String,
    #[serde(default = "unknown_trend")]
    pub trend_5m: String,
    #[serde(default = "unknown_trend")]
    pub trend_15m: String,
    #[serde(default = "unknown_trend")]
    pub trend_1h: String,
    #[serde(default)]
    pub alignment: f64,
    #[serde(default)]
    pub volatility: Option<f64>,
    #[serde(default)]
    pub signal_strength: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct Performance {
    #[serde(default)]
    pub win_rate: Option<f64>,
    #[serde(default)]
    pub total_profit: Option<f64>,
    #[serde(default)]
    pub roi: Option<f64>,
    #[serde(default)]
    pub drawdown: Option<f64>,
    #[serde(default)]
    pub winning_streak: Option<u64>,
    #[serde(default)]
    pub losing_streak: Option<u64>,
    #[serde(default)]
    pub total_trades: Option<u64>,
    #[serde(default)]
    pub winning_trades: Option<u64>,
    #[serde(default)]
    pub losing_trades: Option<u64>,
    #[serde(default)]
    pub sharpe_ratio: Option<f64>,
}

/// Full bot state at one instant, as pushed by `data_update` or served by `/api/data`.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct Snapshot {
    #[serde(default)]
    pub status: Option<BotRunState>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub initial_balance: Option<f64>,
    #[serde(default)]
    pub positions: Option<Vec<Position>>,
    #[serde(default)]
    pub recent_trades: Option<Vec<Trade>>,
    #[serde(default)]
    pub market_trends: Option<Vec<TrendRow>>,
    #[serde(default)]
    pub performance: Option<Performance>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Set by the bot when its own cache did not change since the last poll.
    #[serde(default)]
    pub unchanged: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DataPing {
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BotStatusPush {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BotStatusWire {
    #[serde(default)]
    pub running: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Error,
}

/// `{ status, message? }` answer of the bot's action endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionEnvelope {
    pub status: ActionStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl ActionEnvelope {
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SystemStatusWire {
    #[serde(default)]
    pub bot_status: Option<String>,
    #[serde(default)]
    pub uptime: f64,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub positions_count: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SystemStatusWire {
    pub fn reports_running(&self) -> bool {
        self.bot_status
            .as_deref()
            .map(|status| status.eq_ignore_ascii_case("running"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistoryWindow {
    #[default]
    All,
    Today,
    Week,
    Month,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TradeHistoryQueryArgs {
    pub symbol: Option<String>,
    pub window: Option<HistoryWindow>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }

    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Self::Dark),
            "light" => Ok(Self::Light),
            other => Err(AppError::InvalidArgument(format!("unknown theme '{other}'"))),
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThemeSnapshot {
    pub theme: Theme,
    pub updated_at_ms: i64,
}

/// `/api/data` body. The bot answers `null` until its first refresh tick.
pub fn parse_snapshot_payload(payload: &mut [u8]) -> Result<Option<Snapshot>, AppError> {
    Ok(simd_json::serde::from_slice(payload)?)
}

/// Parses the timestamp formats the bot emits: RFC 3339, HTTP dates and naive
/// ISO strings, the latter read as local time.
pub fn parse_timestamp_ms(raw: &str) -> Result<i64, AppError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.timestamp_millis());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(trimmed) {
        return Ok(parsed.timestamp_millis());
    }

    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.timestamp_millis())
        .ok_or_else(|| AppError::InvalidArgument(format!("ambiguous local timestamp '{trimmed}'")))
}
