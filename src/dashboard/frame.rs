use crate::dashboard::toast::ToastPatch;
use crate::dashboard::types::SystemStatusWire;
use serde::Serialize;

pub const POSITIONS_PLACEHOLDER_TEXT: &str = "No active positions";
pub const POSITIONS_COLSPAN: u8 = 10;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Tone {
    Profit,
    Loss,
    Neutral,
}

impl Tone {
    pub fn of_sign(value: f64) -> Self {
        if value > 0.0 {
            Self::Profit
        } else if value < 0.0 {
            Self::Loss
        } else {
            Self::Neutral
        }
    }

    /// Zero counts as profit, which is how the bot colors flat results.
    pub fn of_result(value: f64) -> Self {
        if value >= 0.0 {
            Self::Profit
        } else {
            Self::Loss
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionCells {
    pub symbol: String,
    pub display_symbol: String,
    pub direction: String,
    pub entry_price: String,
    pub current_price: String,
    pub pnl: String,
    pub pnl_tone: Option<Tone>,
    pub leverage: String,
    pub stop_loss: String,
    pub take_profit: String,
    pub entry_time: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "cell", rename_all = "camelCase")]
pub enum CellChange {
    CurrentPrice { text: String },
    Pnl { text: String, tone: Option<Tone> },
    Leverage { text: String },
    StopLoss { text: String },
    TakeProfit { text: String },
    EntryTime { text: String },
}

/// One mutation of the positions table. The webview applies them in order.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RowPatch {
    Insert { row: PositionCells },
    Update { symbol: String, changes: Vec<CellChange> },
    BeginRemoval { symbol: String, duration_ms: u64 },
    Remove { symbol: String },
    ShowPlaceholder { text: String, colspan: u8 },
    HidePlaceholder,
    Pulse { symbol: String, tone: Tone },
    ClearPulse { symbol: String },
    SetLoading { symbol: String },
    RevertLoading { symbol: String, shake: bool },
}

impl RowPatch {
    pub fn placeholder() -> Self {
        Self::ShowPlaceholder {
            text: POSITIONS_PLACEHOLDER_TEXT.to_string(),
            colspan: POSITIONS_COLSPAN,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeRowView {
    pub symbol: String,
    pub action: String,
    pub direction: String,
    pub entry_price: String,
    pub exit_price: String,
    pub profit: String,
    pub profit_tone: Tone,
    pub profit_percent: String,
    pub profit_percent_tone: Tone,
    pub leverage: String,
    pub entry_time: String,
    pub exit_time: String,
    pub duration: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecentTradesView {
    pub rows: Vec<TradeRowView>,
    pub badge_count: usize,
    pub badge_visible: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeStatsView {
    pub total_trades: usize,
    pub win_rate: String,
    pub total_profit: String,
    pub total_profit_tone: Tone,
    pub average_profit: String,
    pub average_profit_tone: Tone,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilterView {
    pub options: Vec<String>,
    pub selected: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    pub rows: Vec<TradeRowView>,
    pub no_match: bool,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendCell {
    pub label: String,
    pub tone: Tone,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendRowView {
    pub symbol: String,
    pub trend_1m: TrendCell,
    pub trend_5m: TrendCell,
    pub trend_15m: TrendCell,
    pub trend_1h: TrendCell,
    pub alignment: String,
    pub alignment_tone: Tone,
    pub volatility: String,
    pub signal_width_pct: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradingPairView {
    pub symbol: String,
    pub score: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendsView {
    pub rows: Vec<TrendRowView>,
    pub pairs: Vec<TradingPairView>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsView {
    pub balance: Option<String>,
    pub roi: String,
    pub win_rate: String,
    pub total_profit: String,
    pub total_profit_tone: Tone,
    pub performance_win_rate: String,
    pub winning_streak: String,
    pub losing_streak: String,
    pub total_trades: String,
    pub winning_trades: String,
    pub losing_trades: String,
    pub sharpe_ratio: String,
    pub max_drawdown: String,
    pub initial_balance: String,
    pub current_balance: String,
    pub portfolio_profit: String,
    pub portfolio_roi: String,
    pub active_positions: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BalancePoint {
    pub time_ms: i64,
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BotStatusView {
    pub running: bool,
    pub label: String,
    pub can_start: bool,
    pub can_stop: bool,
}

impl BotStatusView {
    pub fn from_running(running: bool) -> Self {
        Self {
            running,
            label: if running { "Running" } else { "Stopped" }.to_string(),
            can_start: !running,
            can_stop: running,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatusView {
    pub uptime: String,
    pub cpu_usage: String,
    pub memory_usage: String,
    pub positions_count: Option<u64>,
}

impl SystemStatusView {
    pub fn from_probe(probe: &SystemStatusWire) -> Self {
        let uptime_secs = probe.uptime.max(0.0) as u64;
        let hours = uptime_secs / 3_600;
        let minutes = (uptime_secs % 3_600) / 60;
        Self {
            uptime: if hours > 0 {
                format!("{hours}h {minutes}m")
            } else {
                format!("{minutes}m")
            },
            cpu_usage: format!("{:.1}%", probe.cpu_usage),
            memory_usage: format!("{:.0} MB", probe.memory_usage),
            positions_count: probe.positions_count,
        }
    }
}

/// Everything one runtime event changed, emitted to the webview in a single call.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UiFrame {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<RowPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_trades: Option<RecentTradesView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_stats: Option<TradeStatsView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_filter: Option<HistoryFilterView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trends: Option<TrendsView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_series: Option<Vec<BalancePoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_status: Option<BotStatusView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_status: Option<SystemStatusView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_ms: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub toasts: Vec<ToastPatch>,
}

impl UiFrame {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Folds `later` into this frame. Views set by `later` win; patches append.
    pub fn merge(&mut self, later: UiFrame) {
        self.positions.extend(later.positions);
        self.toasts.extend(later.toasts);
        self.recent_trades = later.recent_trades.or(self.recent_trades.take());
        self.trade_stats = later.trade_stats.or(self.trade_stats.take());
        self.history_filter = later.history_filter.or(self.history_filter.take());
        self.history = later.history.or(self.history.take());
        self.trends = later.trends.or(self.trends.take());
        self.metrics = later.metrics.or(self.metrics.take());
        self.balance_series = later.balance_series.or(self.balance_series.take());
        self.bot_status = later.bot_status.or(self.bot_status.take());
        self.system_status = later.system_status.or(self.system_status.take());
        self.degraded = later.degraded.or(self.degraded);
        self.last_update_ms = later.last_update_ms.or(self.last_update_ms);
    }
}
