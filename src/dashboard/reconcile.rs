use crate::dashboard::frame::{
    BalancePoint, BotStatusView, CellChange, HistoryFilterView, HistoryView, MetricsView,
    PositionCells, RecentTradesView, RowPatch, Tone, TradeRowView, TradeStatsView,
    TradingPairView, TrendCell, TrendRowView, TrendsView, UiFrame,
};
use crate::dashboard::scheduler::{TaskKey, TaskScheduler};
use crate::dashboard::types::{
    parse_timestamp_ms, BotRunState, DashboardConfig, Direction, HistoryWindow, Performance,
    Position, Snapshot, Trade, TrendRow,
};
use chrono::{Duration as ChronoDuration, Local, TimeZone};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

pub const REMOVAL_TRANSITION_MS: u64 = 500;
pub const RECENT_TRADES_LIMIT: usize = 5;
pub const BALANCE_HISTORY_CAP: usize = 100;
pub const ALL_SYMBOLS: &str = "all";
const QUOTE_SUFFIX: &str = "/USDT:USDT";
const PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, Copy)]
pub struct ReconcileSettings {
    pub pulse_threshold_pct: f64,
    pub pulse_cooldown: Duration,
    pub chart_debounce: Duration,
    pub history_cap: usize,
}

impl From<&DashboardConfig> for ReconcileSettings {
    fn from(config: &DashboardConfig) -> Self {
        Self {
            pulse_threshold_pct: config.pulse_threshold_pct,
            pulse_cooldown: Duration::from_millis(config.pulse_cooldown_ms),
            chart_debounce: Duration::from_millis(config.chart_debounce_ms),
            history_cap: config.history_cap,
        }
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self::from(&DashboardConfig::default())
    }
}

/// Leveraged PnL in percent, `None` while the position has no mark price.
pub fn pnl_percent(position: &Position) -> Option<f64> {
    let current = position.current_price?;
    if position.entry_price <= 0.0 {
        return None;
    }
    let leverage = f64::from(position.effective_leverage());
    let ratio = match position.direction {
        Direction::Long => (current - position.entry_price) / position.entry_price,
        Direction::Short => (position.entry_price - current) / position.entry_price,
    };
    Some(ratio * 100.0 * leverage)
}

pub fn format_elapsed(elapsed_minutes: i64) -> String {
    let minutes = elapsed_minutes.max(0);
    if minutes < 60 {
        format!("{minutes}m")
    } else {
        format!("{}h {}m", minutes / 60, minutes % 60)
    }
}

fn display_symbol(symbol: &str) -> String {
    symbol.replace(QUOTE_SUFFIX, "")
}

fn format_price(value: Option<f64>) -> String {
    value
        .map(|price| format!("{price:.4}"))
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

fn format_local(timestamp_ms: i64, pattern: &str) -> Option<String> {
    Local
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|local| local.format(pattern).to_string())
}

fn format_entry_time(entry_time: Option<&str>, now_unix_ms: i64) -> String {
    let Some(parsed_ms) = entry_time.and_then(|raw| parse_timestamp_ms(raw).ok()) else {
        return PLACEHOLDER.to_string();
    };
    let clock = format_local(parsed_ms, "%H:%M").unwrap_or_else(|| PLACEHOLDER.to_string());
    let elapsed_minutes = (now_unix_ms - parsed_ms).div_euclid(60_000);
    format!("{clock} ({})", format_elapsed(elapsed_minutes))
}

fn format_date_time(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    parse_timestamp_ms(raw)
        .ok()
        .and_then(|parsed| format_local(parsed, "%Y-%m-%d %H:%M"))
        .unwrap_or_else(|| raw.to_string())
}

fn render_position(position: &Position, now_unix_ms: i64) -> (PositionCells, Option<f64>) {
    let pnl = pnl_percent(position);
    let cells = PositionCells {
        symbol: position.symbol.clone(),
        display_symbol: display_symbol(&position.symbol),
        direction: position.direction.as_str().to_string(),
        entry_price: format_price(Some(position.entry_price)),
        current_price: format_price(position.current_price),
        pnl: pnl
            .map(|value| format!("{value:.2}%"))
            .unwrap_or_else(|| PLACEHOLDER.to_string()),
        pnl_tone: pnl.map(Tone::of_result),
        leverage: format!("{}x", position.effective_leverage()),
        stop_loss: format_price(position.stop_loss),
        take_profit: format_price(position.take_profit),
        entry_time: format_entry_time(position.entry_time.as_deref(), now_unix_ms),
    };
    (cells, pnl)
}

fn diff_cells(previous: &PositionCells, next: &PositionCells) -> Vec<CellChange> {
    let mut changes = Vec::new();
    if previous.current_price != next.current_price {
        changes.push(CellChange::CurrentPrice {
            text: next.current_price.clone(),
        });
    }
    if previous.pnl != next.pnl || previous.pnl_tone != next.pnl_tone {
        changes.push(CellChange::Pnl {
            text: next.pnl.clone(),
            tone: next.pnl_tone,
        });
    }
    if previous.leverage != next.leverage {
        changes.push(CellChange::Leverage {
            text: next.leverage.clone(),
        });
    }
    if previous.stop_loss != next.stop_loss {
        changes.push(CellChange::StopLoss {
            text: next.stop_loss.clone(),
        });
    }
    if previous.take_profit != next.take_profit {
        changes.push(CellChange::TakeProfit {
            text: next.take_profit.clone(),
        });
    }
    if previous.entry_time != next.entry_time {
        changes.push(CellChange::EntryTime {
            text: next.entry_time.clone(),
        });
    }
    changes
}

#[derive(Debug, Clone)]
struct RenderedRow {
    cells: PositionCells,
    pnl_cents: Option<i64>,
}

/// PnL at the precision the cell shows, so pulses follow the rendered value.
fn pnl_cents(pnl: Option<f64>) -> Option<i64> {
    pnl.map(|value| (value * 100.0).round() as i64)
}

type TradeIdentity = (String, String, String, String);

/// Every distinct closed trade seen this session, oldest first.
#[derive(Debug)]
pub struct TradeLedger {
    cap: usize,
    trades: VecDeque<Trade>,
    identities: HashSet<TradeIdentity>,
    selected_symbol: String,
}

impl TradeLedger {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            trades: VecDeque::new(),
            identities: HashSet::new(),
            selected_symbol: ALL_SYMBOLS.to_string(),
        }
    }

    /// Returns true when at least one new trade was recorded.
    pub fn absorb(&mut self, incoming: &[Trade]) -> bool {
        let mut changed = false;
        for trade in incoming {
            let identity = trade.identity();
            if self.identities.contains(&identity) {
                continue;
            }
            self.identities.insert(identity);
            self.trades.push_back(trade.clone());
            changed = true;

            while self.trades.len() > self.cap {
                if let Some(evicted) = self.trades.pop_front() {
                    self.identities.remove(&evicted.identity());
                }
            }
        }

        if changed && !self.symbol_known(&self.selected_symbol) {
            self.selected_symbol = ALL_SYMBOLS.to_string();
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn selected_symbol(&self) -> &str {
        &self.selected_symbol
    }

    fn symbol_known(&self, symbol: &str) -> bool {
        symbol == ALL_SYMBOLS || self.trades.iter().any(|trade| trade.symbol == symbol)
    }

    pub fn symbol_options(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut options = vec![ALL_SYMBOLS.to_string()];
        for trade in &self.trades {
            if seen.insert(trade.symbol.as_str()) {
                options.push(trade.symbol.clone());
            }
        }
        options
    }

    pub fn select_symbol(&mut self, symbol: &str) -> HistoryFilterView {
        self.selected_symbol = if self.symbol_known(symbol) {
            symbol.to_string()
        } else {
            ALL_SYMBOLS.to_string()
        };
        self.filter_view()
    }

    pub fn filter_view(&self) -> HistoryFilterView {
        HistoryFilterView {
            options: self.symbol_options(),
            selected: self.selected_symbol.clone(),
        }
    }

    pub fn stats(&self) -> TradeStatsView {
        let total_trades = self.trades.len();
        let winning_trades = self.trades.iter().filter(|trade| trade.profit > 0.0).count();
        let total_profit: f64 = self.trades.iter().map(|trade| trade.profit).sum();
        let (win_rate, average_profit) = if total_trades > 0 {
            (
                winning_trades as f64 / total_trades as f64 * 100.0,
                total_profit / total_trades as f64,
            )
        } else {
            (0.0, 0.0)
        };

        TradeStatsView {
            total_trades,
            win_rate: format!("{win_rate:.1}%"),
            total_profit: format!("{total_profit:.2} USDT"),
            total_profit_tone: Tone::of_result(total_profit),
            average_profit: format!("{average_profit:.2} USDT"),
            average_profit_tone: Tone::of_result(average_profit),
        }
    }

    /// Filters the ledger newest first. Trades whose exit time cannot be read
    /// only show up in the unbounded window.
    pub fn query(&self, symbol: &str, window: HistoryWindow, now_unix_ms: i64) -> HistoryView {
        let window_start_ms = window_start_ms(window, now_unix_ms);
        let rows: Vec<TradeRowView> = self
            .trades
            .iter()
            .rev()
            .filter(|trade| symbol == ALL_SYMBOLS || trade.symbol == symbol)
            .filter(|trade| match window_start_ms {
                None => true,
                Some(start_ms) => parse_timestamp_ms(&trade.exit_time)
                    .map(|exit_ms| exit_ms >= start_ms)
                    .unwrap_or(false),
            })
            .map(trade_row)
            .collect();

        HistoryView {
            no_match: rows.is_empty() && !self.trades.is_empty(),
            total: self.trades.len(),
            rows,
        }
    }
}

fn window_start_ms(window: HistoryWindow, now_unix_ms: i64) -> Option<i64> {
    let now = Local.timestamp_millis_opt(now_unix_ms).single()?;
    match window {
        HistoryWindow::All => None,
        HistoryWindow::Today => now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
            .map(|midnight| midnight.timestamp_millis()),
        HistoryWindow::Week => Some((now - ChronoDuration::days(7)).timestamp_millis()),
        HistoryWindow::Month => Some((now - ChronoDuration::days(30)).timestamp_millis()),
    }
}

fn trade_row(trade: &Trade) -> TradeRowView {
    TradeRowView {
        symbol: trade.symbol.clone(),
        action: trade.action.label().to_string(),
        direction: trade.action.direction_label().to_string(),
        entry_price: format!("{:.4}", trade.entry_price),
        exit_price: format!("{:.4}", trade.exit_price),
        profit: format!("{:.2}", trade.profit),
        profit_tone: Tone::of_result(trade.profit),
        profit_percent: format!("{:.2}%", trade.profit_percent),
        profit_percent_tone: Tone::of_result(trade.profit_percent),
        leverage: trade
            .leverage
            .map(|leverage| format!("{leverage}x"))
            .unwrap_or_else(|| PLACEHOLDER.to_string()),
        entry_time: format_date_time(&trade.entry_time),
        exit_time: format_date_time(&trade.exit_time),
        duration: format!("{:.1} min", trade.duration),
    }
}

fn recent_trades_view(trades: &[Trade]) -> RecentTradesView {
    RecentTradesView {
        rows: trades
            .iter()
            .rev()
            .take(RECENT_TRADES_LIMIT)
            .map(trade_row)
            .collect(),
        badge_count: trades.len(),
        badge_visible: !trades.is_empty(),
    }
}

fn trend_tone(label: &str) -> Tone {
    match label.trim().to_lowercase().as_str() {
        "haussière" => Tone::Profit,
        "baissière" => Tone::Loss,
        _ => Tone::Neutral,
    }
}

fn trend_cell(label: &str) -> TrendCell {
    TrendCell {
        label: label.to_string(),
        tone: trend_tone(label),
    }
}

fn trends_view(trends: &[TrendRow]) -> TrendsView {
    let rows = trends
        .iter()
        .map(|trend| TrendRowView {
            symbol: trend.symbol.clone(),
            trend_1m: trend_cell(&trend.trend_1m),
            trend_5m: trend_cell(&trend.trend_5m),
            trend_15m: trend_cell(&trend.trend_15m),
            trend_1h: trend_cell(&trend.trend_1h),
            alignment: format!("{}", trend.alignment),
            alignment_tone: Tone::of_sign(trend.alignment),
            volatility: format!("{:.2}%", trend.volatility.unwrap_or(0.0)),
            signal_width_pct: (trend.signal_strength.unwrap_or(0.0) * 100.0)
                .round()
                .clamp(0.0, 100.0) as u32,
        })
        .collect();
    let pairs = trends
        .iter()
        .map(|trend| TradingPairView {
            symbol: display_symbol(&trend.symbol),
            score: format!("{:.1}", trend.signal_strength.unwrap_or(0.0) * 10.0),
        })
        .collect();
    TrendsView { rows, pairs }
}

fn metrics_view(snapshot: &Snapshot, active_positions: usize) -> MetricsView {
    let fallback = Performance::default();
    let performance = snapshot.performance.as_ref().unwrap_or(&fallback);
    let fixed2 = |value: Option<f64>| format!("{:.2}", value.unwrap_or(0.0));
    let count = |value: Option<u64>| value.unwrap_or(0).to_string();
    let total_profit = performance.total_profit.unwrap_or(0.0);

    MetricsView {
        balance: snapshot.balance.map(|balance| format!("{balance:.2}")),
        roi: fixed2(performance.roi),
        win_rate: fixed2(performance.win_rate),
        total_profit: format!("{total_profit:.2}"),
        total_profit_tone: Tone::of_result(total_profit),
        performance_win_rate: format!("{:.1}%", performance.win_rate.unwrap_or(0.0)),
        winning_streak: count(performance.winning_streak),
        losing_streak: count(performance.losing_streak),
        total_trades: count(performance.total_trades),
        winning_trades: count(performance.winning_trades),
        losing_trades: count(performance.losing_trades),
        sharpe_ratio: fixed2(performance.sharpe_ratio),
        max_drawdown: format!("{}%", fixed2(performance.drawdown)),
        initial_balance: format!("{} USDT", fixed2(snapshot.initial_balance)),
        current_balance: format!("{} USDT", fixed2(snapshot.balance)),
        portfolio_profit: format!("{total_profit:.2} USDT"),
        portfolio_roi: format!("{}%", fixed2(performance.roi)),
        active_positions,
    }
}

/// Rendered state of every table, diffed against each accepted snapshot.
#[derive(Debug)]
pub struct Reconciler {
    settings: ReconcileSettings,
    rows: HashMap<String, RenderedRow>,
    removing: HashSet<String>,
    placeholder_visible: bool,
    ledger: TradeLedger,
    last_trends: Option<Vec<TrendRow>>,
    balance_history: VecDeque<BalancePoint>,
}

impl Reconciler {
    pub fn new(settings: ReconcileSettings) -> Self {
        Self {
            settings,
            rows: HashMap::new(),
            removing: HashSet::new(),
            placeholder_visible: false,
            ledger: TradeLedger::new(settings.history_cap),
            last_trends: None,
            balance_history: VecDeque::with_capacity(BALANCE_HISTORY_CAP),
        }
    }

    pub fn apply(
        &mut self,
        snapshot: &Snapshot,
        now: Instant,
        now_unix_ms: i64,
        scheduler: &mut TaskScheduler<TaskKey>,
    ) -> UiFrame {
        let mut frame = UiFrame {
            last_update_ms: Some(now_unix_ms),
            ..Default::default()
        };

        if let Some(status) = snapshot.status {
            frame.bot_status = Some(BotStatusView::from_running(status == BotRunState::Running));
        }

        if let Some(balance) = snapshot.balance {
            self.record_balance(balance, now, now_unix_ms, scheduler);
        }

        if let Some(positions) = &snapshot.positions {
            frame.positions = self.reconcile_positions(positions, now, now_unix_ms, scheduler);
        }

        if let Some(trades) = &snapshot.recent_trades {
            frame.recent_trades = Some(recent_trades_view(trades));
            if self.ledger.absorb(trades) {
                frame.trade_stats = Some(self.ledger.stats());
                frame.history_filter = Some(self.ledger.filter_view());
            }
        }

        if let Some(trends) = &snapshot.market_trends {
            if self.last_trends.as_ref() != Some(trends) {
                frame.trends = Some(trends_view(trends));
                self.last_trends = Some(trends.clone());
            }
        }

        frame.metrics = Some(metrics_view(snapshot, self.rows.len()));
        frame
    }

    pub fn reconcile_positions(
        &mut self,
        positions: &[Position],
        now: Instant,
        now_unix_ms: i64,
        scheduler: &mut TaskScheduler<TaskKey>,
    ) -> Vec<RowPatch> {
        let mut patches = Vec::new();
        let mut incoming: HashSet<&str> = HashSet::with_capacity(positions.len());

        for position in positions {
            if !incoming.insert(position.symbol.as_str()) {
                continue;
            }
            let symbol = &position.symbol;
            let (cells, pnl) = render_position(position, now_unix_ms);

            if self.removing.remove(symbol) {
                scheduler.cancel(&TaskKey::RowRemoval(symbol.clone()));
                patches.push(RowPatch::Remove {
                    symbol: symbol.clone(),
                });
            }

            match self.rows.get_mut(symbol) {
                Some(row) => {
                    let changes = diff_cells(&row.cells, &cells);
                    if !changes.is_empty() {
                        patches.push(RowPatch::Update {
                            symbol: symbol.clone(),
                            changes,
                        });
                    }

                    let pulse_key = TaskKey::Pulse(symbol.clone());
                    let pnl = pnl_cents(pnl);
                    if let (Some(previous), Some(next)) = (row.pnl_cents, pnl) {
                        let delta_pct = (next - previous).abs() as f64 / 100.0;
                        if delta_pct > self.settings.pulse_threshold_pct
                            && !scheduler.is_pending(&pulse_key)
                        {
                            let tone = if next > previous { Tone::Profit } else { Tone::Loss };
                            patches.push(RowPatch::Pulse {
                                symbol: symbol.clone(),
                                tone,
                            });
                            scheduler.schedule(pulse_key, now + self.settings.pulse_cooldown);
                        }
                    }

                    row.cells = cells;
                    row.pnl_cents = pnl;
                }
                None => {
                    if self.placeholder_visible {
                        self.placeholder_visible = false;
                        patches.push(RowPatch::HidePlaceholder);
                    }
                    patches.push(RowPatch::Insert { row: cells.clone() });
                    self.rows.insert(
                        symbol.clone(),
                        RenderedRow {
                            cells,
                            pnl_cents: pnl_cents(pnl),
                        },
                    );
                }
            }
        }

        let mut departed: Vec<String> = self
            .rows
            .keys()
            .filter(|symbol| !incoming.contains(symbol.as_str()))
            .cloned()
            .collect();
        departed.sort();
        for symbol in departed {
            patches.extend(self.begin_removal(&symbol, now, scheduler));
        }

        if let Some(patch) = self.placeholder_if_empty() {
            patches.push(patch);
        }
        patches
    }

    fn begin_removal(
        &mut self,
        symbol: &str,
        now: Instant,
        scheduler: &mut TaskScheduler<TaskKey>,
    ) -> Option<RowPatch> {
        self.rows.remove(symbol)?;
        scheduler.cancel(&TaskKey::Pulse(symbol.to_string()));
        scheduler.schedule(
            TaskKey::RowRemoval(symbol.to_string()),
            now + Duration::from_millis(REMOVAL_TRANSITION_MS),
        );
        self.removing.insert(symbol.to_string());
        Some(RowPatch::BeginRemoval {
            symbol: symbol.to_string(),
            duration_ms: REMOVAL_TRANSITION_MS,
        })
    }

    fn placeholder_if_empty(&mut self) -> Option<RowPatch> {
        if self.rows.is_empty() && self.removing.is_empty() && !self.placeholder_visible {
            self.placeholder_visible = true;
            return Some(RowPatch::placeholder());
        }
        None
    }

    pub fn finish_removal(&mut self, symbol: &str) -> Vec<RowPatch> {
        if !self.removing.remove(symbol) {
            return Vec::new();
        }
        let mut patches = vec![RowPatch::Remove {
            symbol: symbol.to_string(),
        }];
        patches.extend(self.placeholder_if_empty());
        patches
    }

    pub fn finish_pulse(&self, symbol: &str) -> Vec<RowPatch> {
        if self.rows.contains_key(symbol) {
            vec![RowPatch::ClearPulse {
                symbol: symbol.to_string(),
            }]
        } else {
            Vec::new()
        }
    }

    pub fn mark_closing(&self, symbol: &str) -> Vec<RowPatch> {
        if self.rows.contains_key(symbol) {
            vec![RowPatch::SetLoading {
                symbol: symbol.to_string(),
            }]
        } else {
            Vec::new()
        }
    }

    pub fn revert_closing(&self, symbol: &str) -> Vec<RowPatch> {
        if self.rows.contains_key(symbol) {
            vec![RowPatch::RevertLoading {
                symbol: symbol.to_string(),
                shake: true,
            }]
        } else {
            Vec::new()
        }
    }

    pub fn confirm_closed(
        &mut self,
        symbol: &str,
        now: Instant,
        scheduler: &mut TaskScheduler<TaskKey>,
    ) -> Vec<RowPatch> {
        self.begin_removal(symbol, now, scheduler)
            .into_iter()
            .collect()
    }

    fn record_balance(
        &mut self,
        balance: f64,
        now: Instant,
        now_unix_ms: i64,
        scheduler: &mut TaskScheduler<TaskKey>,
    ) {
        self.balance_history.push_back(BalancePoint {
            time_ms: now_unix_ms,
            balance,
        });
        while self.balance_history.len() > BALANCE_HISTORY_CAP {
            self.balance_history.pop_front();
        }
        scheduler.schedule(TaskKey::ChartRedraw, now + self.settings.chart_debounce);
    }

    pub fn balance_series(&self) -> Vec<BalancePoint> {
        self.balance_history.iter().copied().collect()
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut TradeLedger {
        &mut self.ledger
    }

    pub fn rendered_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.rows.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn is_removing(&self, symbol: &str) -> bool {
        self.removing.contains(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::types::TradeAction;

    const NOW_MS: i64 = 1_714_557_600_000;

    fn position(symbol: &str, direction: Direction, current: Option<f64>) -> Position {
        Position {
            symbol: symbol.to_string(),
            direction,
            entry_price: 100.0,
            current_price: current,
            leverage: 2,
            quantity: Some(1.0),
            stop_loss: None,
            take_profit: None,
            entry_time: None,
        }
    }

    fn trade(symbol: &str, exit_time: &str, profit: f64) -> Trade {
        Trade {
            symbol: symbol.to_string(),
            action: TradeAction::CloseLong,
            entry_price: 100.0,
            exit_price: 101.0,
            profit,
            profit_percent: profit,
            duration: 12.0,
            entry_time: "2024-05-01T09:00:00Z".to_string(),
            exit_time: exit_time.to_string(),
            leverage: None,
        }
    }

    fn count_ops(patches: &[RowPatch]) -> (usize, usize, usize) {
        patches.iter().fold((0, 0, 0), |(ins, upd, rem), patch| match patch {
            RowPatch::Insert { .. } => (ins + 1, upd, rem),
            RowPatch::Update { .. } => (ins, upd + 1, rem),
            RowPatch::BeginRemoval { .. } => (ins, upd, rem + 1),
            _ => (ins, upd, rem),
        })
    }

    #[test]
    fn computes_leveraged_pnl_by_direction() {
        let long_up = position("A", Direction::Long, Some(110.0));
        let short_down = position("B", Direction::Short, Some(90.0));
        let long_down = position("C", Direction::Long, Some(90.0));

        assert!((pnl_percent(&long_up).expect("pnl") - 20.0).abs() < 1e-9);
        assert!((pnl_percent(&short_down).expect("pnl") - 20.0).abs() < 1e-9);
        assert!((pnl_percent(&long_down).expect("pnl") + 20.0).abs() < 1e-9);
        assert_eq!(pnl_percent(&position("D", Direction::Long, None)), None);

        let (cells, _) = render_position(&long_down, NOW_MS);
        assert_eq!(cells.pnl, "-20.00%");
        assert_eq!(cells.pnl_tone, Some(Tone::Loss));
    }

    #[test]
    fn zero_leverage_counts_as_one() {
        let mut unlevered = position("A", Direction::Long, Some(110.0));
        unlevered.leverage = 0;
        assert!((pnl_percent(&unlevered).expect("pnl") - 10.0).abs() < 1e-9);
    }

    #[test]
    fn formats_elapsed_minutes_and_hours() {
        assert_eq!(format_elapsed(0), "0m");
        assert_eq!(format_elapsed(59), "59m");
        assert_eq!(format_elapsed(125), "2h 5m");
        assert_eq!(format_elapsed(-3), "0m");
    }

    #[test]
    fn diff_is_minimal_when_symbol_set_shifts() {
        let now = Instant::now();
        let mut scheduler = TaskScheduler::default();
        let mut reconciler = Reconciler::new(ReconcileSettings::default());
        let _ = reconciler.reconcile_positions(
            &[
                position("A", Direction::Long, Some(101.0)),
                position("B", Direction::Long, Some(101.0)),
            ],
            now,
            NOW_MS,
            &mut scheduler,
        );

        let patches = reconciler.reconcile_positions(
            &[
                position("B", Direction::Long, Some(102.0)),
                position("C", Direction::Short, Some(99.0)),
            ],
            now,
            NOW_MS,
            &mut scheduler,
        );

        assert_eq!(count_ops(&patches), (1, 1, 1));
        assert!(patches.contains(&RowPatch::BeginRemoval {
            symbol: "A".to_string(),
            duration_ms: REMOVAL_TRANSITION_MS
        }));
        let update = patches
            .iter()
            .find_map(|patch| match patch {
                RowPatch::Update { symbol, changes } if symbol == "B" => Some(changes.clone()),
                _ => None,
            })
            .expect("B should be updated in place");
        assert_eq!(update.len(), 2);
        assert!(update.contains(&CellChange::CurrentPrice {
            text: "102.0000".to_string()
        }));
    }

    #[test]
    fn unchanged_row_emits_nothing() {
        let now = Instant::now();
        let mut scheduler = TaskScheduler::default();
        let mut reconciler = Reconciler::new(ReconcileSettings::default());
        let rows = [position("A", Direction::Long, Some(101.0))];

        let _ = reconciler.reconcile_positions(&rows, now, NOW_MS, &mut scheduler);
        assert!(reconciler
            .reconcile_positions(&rows, now, NOW_MS, &mut scheduler)
            .is_empty());
    }

    #[test]
    fn placeholder_tracks_empty_table() {
        let now = Instant::now();
        let mut scheduler = TaskScheduler::default();
        let mut reconciler = Reconciler::new(ReconcileSettings::default());

        let initial = reconciler.reconcile_positions(&[], now, NOW_MS, &mut scheduler);
        assert_eq!(initial, vec![RowPatch::placeholder()]);
        assert!(reconciler
            .reconcile_positions(&[], now, NOW_MS, &mut scheduler)
            .is_empty());

        let inserted = reconciler.reconcile_positions(
            &[position("A", Direction::Long, Some(100.0))],
            now,
            NOW_MS,
            &mut scheduler,
        );
        assert_eq!(inserted[0], RowPatch::HidePlaceholder);
        assert!(matches!(inserted[1], RowPatch::Insert { .. }));

        let removal = reconciler.reconcile_positions(&[], now, NOW_MS, &mut scheduler);
        assert_eq!(removal.len(), 1);
        assert!(scheduler.is_pending(&TaskKey::RowRemoval("A".to_string())));

        let finished = reconciler.finish_removal("A");
        assert_eq!(
            finished,
            vec![
                RowPatch::Remove {
                    symbol: "A".to_string()
                },
                RowPatch::placeholder()
            ]
        );
    }

    #[test]
    fn returning_symbol_completes_pending_removal() {
        let now = Instant::now();
        let mut scheduler = TaskScheduler::default();
        let mut reconciler = Reconciler::new(ReconcileSettings::default());
        let rows = [position("A", Direction::Long, Some(101.0))];
        let _ = reconciler.reconcile_positions(&rows, now, NOW_MS, &mut scheduler);
        let _ = reconciler.reconcile_positions(&[], now, NOW_MS, &mut scheduler);

        let patches = reconciler.reconcile_positions(&rows, now, NOW_MS, &mut scheduler);
        assert_eq!(
            patches[0],
            RowPatch::Remove {
                symbol: "A".to_string()
            }
        );
        assert!(matches!(patches[1], RowPatch::Insert { .. }));
        assert!(!scheduler.is_pending(&TaskKey::RowRemoval("A".to_string())));
        assert!(reconciler.finish_removal("A").is_empty());
    }

    #[test]
    fn pulses_once_per_cooldown_window() {
        let now = Instant::now();
        let mut scheduler = TaskScheduler::default();
        let mut reconciler = Reconciler::new(ReconcileSettings::default());
        let _ = reconciler.reconcile_positions(
            &[position("A", Direction::Long, Some(100.0))],
            now,
            NOW_MS,
            &mut scheduler,
        );

        let rising = reconciler.reconcile_positions(
            &[position("A", Direction::Long, Some(101.0))],
            now,
            NOW_MS,
            &mut scheduler,
        );
        assert!(rising.contains(&RowPatch::Pulse {
            symbol: "A".to_string(),
            tone: Tone::Profit
        }));

        let falling = reconciler.reconcile_positions(
            &[position("A", Direction::Long, Some(99.0))],
            now + Duration::from_millis(500),
            NOW_MS,
            &mut scheduler,
        );
        assert!(!falling
            .iter()
            .any(|patch| matches!(patch, RowPatch::Pulse { .. })));

        let due = scheduler.drain_due(now + Duration::from_millis(2_000));
        assert_eq!(due, vec![TaskKey::Pulse("A".to_string())]);
        assert_eq!(
            reconciler.finish_pulse("A"),
            vec![RowPatch::ClearPulse {
                symbol: "A".to_string()
            }]
        );

        let after_cooldown = reconciler.reconcile_positions(
            &[position("A", Direction::Long, Some(98.0))],
            now + Duration::from_millis(2_100),
            NOW_MS,
            &mut scheduler,
        );
        assert!(after_cooldown.contains(&RowPatch::Pulse {
            symbol: "A".to_string(),
            tone: Tone::Loss
        }));
    }

    #[test]
    fn rendered_noise_does_not_pulse() {
        let now = Instant::now();
        let mut scheduler = TaskScheduler::default();
        let mut reconciler = Reconciler::new(ReconcileSettings::default());
        let _ = reconciler.reconcile_positions(
            &[position("A", Direction::Long, Some(100.998))],
            now,
            NOW_MS,
            &mut scheduler,
        );

        // 1.996% -> 2.0149%: shown as 2.00% -> 2.01%, one cent apart.
        let drift = reconciler.reconcile_positions(
            &[position("A", Direction::Long, Some(101.007_45))],
            now,
            NOW_MS,
            &mut scheduler,
        );
        assert!(!drift
            .iter()
            .any(|patch| matches!(patch, RowPatch::Pulse { .. })));
        assert!(!scheduler.is_pending(&TaskKey::Pulse("A".to_string())));

        let jump = reconciler.reconcile_positions(
            &[position("A", Direction::Long, Some(101.02))],
            now,
            NOW_MS,
            &mut scheduler,
        );
        assert!(jump.contains(&RowPatch::Pulse {
            symbol: "A".to_string(),
            tone: Tone::Profit
        }));
    }

    #[test]
    fn repeated_symbol_keeps_first_occurrence() {
        let now = Instant::now();
        let mut scheduler = TaskScheduler::default();
        let mut reconciler = Reconciler::new(ReconcileSettings::default());

        let patches = reconciler.reconcile_positions(
            &[
                position("A", Direction::Long, Some(110.0)),
                position("A", Direction::Short, Some(90.0)),
                position("B", Direction::Long, Some(101.0)),
            ],
            now,
            NOW_MS,
            &mut scheduler,
        );
        let inserted: Vec<&PositionCells> = patches
            .iter()
            .filter_map(|patch| match patch {
                RowPatch::Insert { row } => Some(row),
                _ => None,
            })
            .collect();
        assert_eq!(inserted.len(), 2);
        let first = inserted
            .iter()
            .find(|row| row.symbol == "A")
            .expect("A should be inserted");
        assert_eq!(first.direction, Direction::Long.as_str());
        assert_eq!(first.pnl, "20.00%");
        assert_eq!(reconciler.rendered_symbols().len(), 2);

        let removal = reconciler.reconcile_positions(
            &[position("B", Direction::Long, Some(101.0))],
            now,
            NOW_MS,
            &mut scheduler,
        );
        assert_eq!(count_ops(&removal), (0, 0, 1));
        assert_eq!(
            removal,
            vec![RowPatch::BeginRemoval {
                symbol: "A".to_string(),
                duration_ms: REMOVAL_TRANSITION_MS
            }]
        );
    }

    #[test]
    fn ledger_dedupes_and_caps() {
        let mut ledger = TradeLedger::new(3);
        let first = trade("BTC", "2024-05-01T10:00:00Z", 5.0);

        assert!(ledger.absorb(&[first.clone(), trade("ETH", "2024-05-01T10:05:00Z", -2.0)]));
        assert!(!ledger.absorb(&[first.clone()]));
        assert_eq!(ledger.len(), 2);

        assert!(ledger.absorb(&[
            trade("SOL", "2024-05-01T10:10:00Z", 1.0),
            trade("BTC", "2024-05-01T10:15:00Z", 3.0),
        ]));
        assert_eq!(ledger.len(), 3);
        assert_eq!(
            ledger.symbol_options(),
            vec!["all", "ETH", "SOL", "BTC"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn ledger_stats_cover_every_trade() {
        let mut ledger = TradeLedger::new(10);
        let _ = ledger.absorb(&[
            trade("BTC", "2024-05-01T10:00:00Z", 10.0),
            trade("ETH", "2024-05-01T10:05:00Z", -4.0),
            trade("BTC", "2024-05-01T10:10:00Z", 0.0),
            trade("SOL", "2024-05-01T10:15:00Z", 2.0),
        ]);

        let stats = ledger.stats();
        assert_eq!(stats.total_trades, 4);
        assert_eq!(stats.win_rate, "50.0%");
        assert_eq!(stats.total_profit, "8.00 USDT");
        assert_eq!(stats.average_profit, "2.00 USDT");
        assert_eq!(stats.total_profit_tone, Tone::Profit);
    }

    #[test]
    fn selection_falls_back_to_all_for_unknown_symbol() {
        let mut ledger = TradeLedger::new(10);
        let _ = ledger.absorb(&[trade("BTC", "2024-05-01T10:00:00Z", 1.0)]);

        assert_eq!(ledger.select_symbol("BTC").selected, "BTC");
        assert_eq!(ledger.select_symbol("DOGE").selected, ALL_SYMBOLS);
    }

    #[test]
    fn history_query_filters_by_symbol_and_window() {
        let mut ledger = TradeLedger::new(10);
        let _ = ledger.absorb(&[
            trade("BTC", "2024-03-15T10:00:00Z", 1.0),
            trade("ETH", "2024-04-29T10:00:00Z", 2.0),
            trade("BTC", "2024-04-30T12:00:00Z", 3.0),
            trade("BTC", "not a date", 4.0),
        ]);

        let all = ledger.query(ALL_SYMBOLS, HistoryWindow::All, NOW_MS);
        assert_eq!(all.rows.len(), 4);
        assert_eq!(all.rows[0].profit, "4.00");

        let btc_week = ledger.query("BTC", HistoryWindow::Week, NOW_MS);
        assert_eq!(btc_week.rows.len(), 1);
        assert_eq!(btc_week.rows[0].profit, "3.00");

        let month = ledger.query(ALL_SYMBOLS, HistoryWindow::Month, NOW_MS);
        assert_eq!(month.rows.len(), 2);

        let none = ledger.query("SOL", HistoryWindow::All, NOW_MS);
        assert!(none.no_match);
        assert_eq!(none.total, 4);
    }

    #[test]
    fn recent_trades_show_newest_five_first() {
        let trades: Vec<Trade> = (0..7)
            .map(|index| trade("BTC", &format!("2024-05-01T10:0{index}:00Z"), index as f64))
            .collect();
        let view = recent_trades_view(&trades);

        assert_eq!(view.rows.len(), RECENT_TRADES_LIMIT);
        assert_eq!(view.rows[0].profit, "6.00");
        assert_eq!(view.badge_count, 7);
        assert!(view.badge_visible);
        assert!(!recent_trades_view(&[]).badge_visible);
    }

    #[test]
    fn trends_replace_only_when_rows_change() {
        let now = Instant::now();
        let mut scheduler = TaskScheduler::default();
        let mut reconciler = Reconciler::new(ReconcileSettings::default());
        let snapshot = Snapshot {
            market_trends: Some(vec![TrendRow {
                symbol: "BTC/USDT:USDT".to_string(),
                trend_1m: "haussière".to_string(),
                trend_5m: "baissière".to_string(),
                trend_15m: "neutre".to_string(),
                trend_1h: "unknown".to_string(),
                alignment: -2.0,
                volatility: Some(1.234),
                signal_strength: Some(0.75),
            }]),
            ..Default::default()
        };

        let first = reconciler.apply(&snapshot, now, NOW_MS, &mut scheduler);
        let trends = first.trends.expect("trends should be emitted");
        assert_eq!(trends.rows[0].trend_1m.tone, Tone::Profit);
        assert_eq!(trends.rows[0].trend_5m.tone, Tone::Loss);
        assert_eq!(trends.rows[0].alignment, "-2");
        assert_eq!(trends.rows[0].alignment_tone, Tone::Loss);
        assert_eq!(trends.rows[0].volatility, "1.23%");
        assert_eq!(trends.rows[0].signal_width_pct, 75);
        assert_eq!(trends.pairs[0].symbol, "BTC");
        assert_eq!(trends.pairs[0].score, "7.5");

        let second = reconciler.apply(&snapshot, now, NOW_MS, &mut scheduler);
        assert!(second.trends.is_none());
    }

    #[test]
    fn balance_points_roll_and_debounce_redraw() {
        let now = Instant::now();
        let mut scheduler = TaskScheduler::default();
        let mut reconciler = Reconciler::new(ReconcileSettings::default());

        for index in 0..(BALANCE_HISTORY_CAP + 5) {
            let snapshot = Snapshot {
                balance: Some(index as f64),
                ..Default::default()
            };
            let _ = reconciler.apply(
                &snapshot,
                now + Duration::from_millis(index as u64),
                NOW_MS,
                &mut scheduler,
            );
        }

        let series = reconciler.balance_series();
        assert_eq!(series.len(), BALANCE_HISTORY_CAP);
        assert_eq!(series[0].balance, 5.0);
        assert_eq!(
            scheduler.deadline(&TaskKey::ChartRedraw),
            Some(
                now + Duration::from_millis((BALANCE_HISTORY_CAP + 4) as u64)
                    + Duration::from_millis(500)
            )
        );
    }

    #[test]
    fn metrics_use_defaults_for_missing_values() {
        let snapshot = Snapshot {
            balance: Some(0.0),
            ..Default::default()
        };
        let metrics = metrics_view(&snapshot, 0);
        assert_eq!(metrics.balance.as_deref(), Some("0.00"));
        assert_eq!(metrics.roi, "0.00");
        assert_eq!(metrics.performance_win_rate, "0.0%");
        assert_eq!(metrics.total_trades, "0");
        assert_eq!(metrics.max_drawdown, "0.00%");
        assert_eq!(metrics.current_balance, "0.00 USDT");
        assert!(metrics_view(&Snapshot::default(), 0).balance.is_none());
    }

    #[test]
    fn close_confirmation_starts_removal() {
        let now = Instant::now();
        let mut scheduler = TaskScheduler::default();
        let mut reconciler = Reconciler::new(ReconcileSettings::default());
        let _ = reconciler.reconcile_positions(
            &[position("A", Direction::Long, Some(101.0))],
            now,
            NOW_MS,
            &mut scheduler,
        );

        assert_eq!(
            reconciler.mark_closing("A"),
            vec![RowPatch::SetLoading {
                symbol: "A".to_string()
            }]
        );
        assert_eq!(
            reconciler.revert_closing("A"),
            vec![RowPatch::RevertLoading {
                symbol: "A".to_string(),
                shake: true
            }]
        );
        let patches = reconciler.confirm_closed("A", now, &mut scheduler);
        assert!(matches!(patches[0], RowPatch::BeginRemoval { .. }));
        assert!(reconciler.is_removing("A"));
        assert!(reconciler.mark_closing("A").is_empty());
    }
}
