use crate::dashboard::types::{Performance, Position, Snapshot, Trade, TrendRow};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted { fingerprint: u64 },
    Duplicate,
    Stale { incoming_ts: i64, newest_ts: i64 },
}

/// Decides whether a snapshot is new enough and different enough to reconcile.
#[derive(Debug, Default)]
pub struct FreshnessGate {
    last_fingerprint: Option<u64>,
    newest_server_ts: Option<i64>,
    freshness_mark: Option<i64>,
}

impl FreshnessGate {
    pub fn admit(&mut self, snapshot: &Snapshot, now_unix_ms: i64) -> Admission {
        let fingerprint = fingerprint(snapshot);
        if self.last_fingerprint == Some(fingerprint) {
            return Admission::Duplicate;
        }

        if let (Some(incoming_ts), Some(newest_ts)) = (snapshot.timestamp, self.newest_server_ts) {
            if incoming_ts < newest_ts {
                return Admission::Stale {
                    incoming_ts,
                    newest_ts,
                };
            }
        }

        self.last_fingerprint = Some(fingerprint);
        if let Some(incoming_ts) = snapshot.timestamp {
            self.newest_server_ts = Some(
                self.newest_server_ts
                    .map_or(incoming_ts, |newest| newest.max(incoming_ts)),
            );
        }
        let mark = snapshot.timestamp.unwrap_or(now_unix_ms).max(now_unix_ms);
        self.freshness_mark = Some(self.freshness_mark.map_or(mark, |previous| previous.max(mark)));

        Admission::Accepted { fingerprint }
    }

    /// True when the server declares data newer than anything accepted so far.
    pub fn is_stale(&self, server_ts: i64) -> bool {
        match self.freshness_mark {
            Some(mark) => server_ts > mark,
            None => true,
        }
    }

    pub fn freshness_mark(&self) -> Option<i64> {
        self.freshness_mark
    }
}

/// Stable 64-bit content hash. Fields are visited in declaration order and
/// floats hash by bit pattern, so `Some(0.0)` and `None` never collide.
pub fn fingerprint(snapshot: &Snapshot) -> u64 {
    let mut hasher = DefaultHasher::new();
    snapshot.status.hash(&mut hasher);
    snapshot.message.hash(&mut hasher);
    hash_f64_opt(&mut hasher, snapshot.balance);
    hash_f64_opt(&mut hasher, snapshot.initial_balance);
    hash_list(&mut hasher, snapshot.positions.as_deref(), hash_position);
    hash_list(&mut hasher, snapshot.recent_trades.as_deref(), hash_trade);
    hash_list(&mut hasher, snapshot.market_trends.as_deref(), hash_trend);
    match &snapshot.performance {
        Some(performance) => {
            1_u8.hash(&mut hasher);
            hash_performance(&mut hasher, performance);
        }
        None => 0_u8.hash(&mut hasher),
    }
    snapshot.timestamp.hash(&mut hasher);
    hasher.finish()
}

fn hash_f64<H: Hasher>(hasher: &mut H, value: f64) {
    value.to_bits().hash(hasher);
}

fn hash_f64_opt<H: Hasher>(hasher: &mut H, value: Option<f64>) {
    value.map(f64::to_bits).hash(hasher);
}

fn hash_list<H: Hasher, T>(hasher: &mut H, items: Option<&[T]>, hash_item: fn(&mut H, &T)) {
    match items {
        Some(items) => {
            1_u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_item(hasher, item);
            }
        }
        None => 0_u8.hash(hasher),
    }
}

fn hash_position<H: Hasher>(hasher: &mut H, position: &Position) {
    position.symbol.hash(hasher);
    position.direction.hash(hasher);
    hash_f64(hasher, position.entry_price);
    hash_f64_opt(hasher, position.current_price);
    position.leverage.hash(hasher);
    hash_f64_opt(hasher, position.quantity);
    hash_f64_opt(hasher, position.stop_loss);
    hash_f64_opt(hasher, position.take_profit);
    position.entry_time.hash(hasher);
}

fn hash_trade<H: Hasher>(hasher: &mut H, trade: &Trade) {
    trade.symbol.hash(hasher);
    trade.action.hash(hasher);
    hash_f64(hasher, trade.entry_price);
    hash_f64(hasher, trade.exit_price);
    hash_f64(hasher, trade.profit);
    hash_f64(hasher, trade.profit_percent);
    hash_f64(hasher, trade.duration);
    trade.entry_time.hash(hasher);
    trade.exit_time.hash(hasher);
    trade.leverage.hash(hasher);
}

fn hash_trend<H: Hasher>(hasher: &mut H, trend: &TrendRow) {
    trend.symbol.hash(hasher);
    trend.trend_1m.hash(hasher);
    trend.trend_5m.hash(hasher);
    trend.trend_15m.hash(hasher);
    trend.trend_1h.hash(hasher);
    hash_f64(hasher, trend.alignment);
    hash_f64_opt(hasher, trend.volatility);
    hash_f64_opt(hasher, trend.signal_strength);
}

fn hash_performance<H: Hasher>(hasher: &mut H, performance: &Performance) {
    hash_f64_opt(hasher, performance.win_rate);
    hash_f64_opt(hasher, performance.total_profit);
    hash_f64_opt(hasher, performance.roi);
    hash_f64_opt(hasher, performance.drawdown);
    performance.winning_streak.hash(hasher);
    performance.losing_streak.hash(hasher);
    performance.total_trades.hash(hasher);
    performance.winning_trades.hash(hasher);
    performance.losing_trades.hash(hasher);
    hash_f64_opt(hasher, performance.sharpe_ratio);
}
