// ledger.rs — Position Ledger (C5)
//
// Canonical in-memory model the control loop owns exclusively: live
// positions' TP targets, pending limit orders, cooldown state, stop-loss
// history, and the daily per-symbol trade counter. Grounded on the
// teacher's `PositionTracker` (single-owner map keyed by symbol, no
// internal locking — the owning task is the only writer) generalized to
// the symbol+side composite key the spec requires throughout (§3, §9
// "symbol-side key").
use std::collections::HashMap;

use crate::types::{PositionSide, Symbol, SymbolSideKey};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionTarget {
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
    pub stage: u8,
    pub current_sl: f64,
}

impl PositionTarget {
    pub fn new(tp1: f64, tp2: f64, tp3: f64, initial_sl: f64) -> Self {
        Self { tp1, tp2, tp3, stage: 0, current_sl: initial_sl }
    }
}

#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub limit_price: f64,
    pub quantity: f64,
    pub leverage: f64,
    pub order_id: String,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub create_time_ms: u64,
    pub confidence: f64,
    pub reasoning: String,
    pub thesis: String,
    pub cancel_conditions: String,
}

/// `(symbol, side) -> ordered list of stop_loss_ms`. Ordered oldest-first;
/// only entries within the trailing 12h window matter to any one lookup.
#[derive(Debug, Default)]
pub struct StopLossHistory {
    entries: HashMap<SymbolSideKey, Vec<u64>>,
}

const TWELVE_HOURS_MS: u64 = 12 * 60 * 60 * 1000;
const FIRST_COOLDOWN_MS: u64 = 60 * 60 * 1000;
const SUBSEQUENT_COOLDOWN_MS: u64 = 240 * 60 * 1000;

impl StopLossHistory {
    /// Appends `now` to the key's history and returns the cooldown duration
    /// to apply, per §4.5: first SL in a trailing 12h window gets 60 min,
    /// second-or-later gets 240 min.
    pub fn record_and_cooldown_duration(&mut self, key: SymbolSideKey, now_ms: u64) -> u64 {
        let list = self.entries.entry(key).or_default();
        list.push(now_ms);
        let window_start = now_ms.saturating_sub(TWELVE_HOURS_MS);
        let count_in_window = list.iter().filter(|&&t| t >= window_start).count();
        if count_in_window <= 1 {
            FIRST_COOLDOWN_MS
        } else {
            SUBSEQUENT_COOLDOWN_MS
        }
    }
}

#[derive(Debug, Default)]
pub struct CooldownState {
    until_ms: HashMap<SymbolSideKey, u64>,
}

impl CooldownState {
    pub fn set(&mut self, key: SymbolSideKey, until_ms: u64) {
        self.until_ms.insert(key, until_ms);
    }

    pub fn is_in_cooldown(&self, key: &SymbolSideKey, now_ms: u64) -> bool {
        self.until_ms.get(key).map(|&until| until > now_ms).unwrap_or(false)
    }

    /// True if either side of `symbol` is currently in cooldown.
    pub fn either_side_in_cooldown(&self, symbol: &str, now_ms: u64) -> bool {
        self.is_in_cooldown(&(symbol.to_string(), PositionSide::Long), now_ms)
            || self.is_in_cooldown(&(symbol.to_string(), PositionSide::Short), now_ms)
    }
}

#[derive(Debug, Clone)]
pub struct DailyPairTrades {
    pub reset_day: String,
    pub counts: HashMap<Symbol, i64>,
}

impl DailyPairTrades {
    pub fn new(today: impl Into<String>) -> Self {
        Self { reset_day: today.into(), counts: HashMap::new() }
    }

    /// Resets to empty if `today` differs from the stored `reset_day`.
    pub fn roll_day_if_needed(&mut self, today: &str) {
        if self.reset_day != today {
            self.reset_day = today.to_string();
            self.counts.clear();
        }
    }

    pub fn increment(&mut self, symbol: &str) {
        *self.counts.entry(symbol.to_string()).or_insert(0) += 1;
    }

    pub fn decrement(&mut self, symbol: &str) {
        if let Some(count) = self.counts.get_mut(symbol) {
            *count -= 1;
        }
    }

    pub fn count(&self, symbol: &str) -> i64 {
        self.counts.get(symbol).copied().unwrap_or(0)
    }
}

/// Owned exclusively by the control loop — no internal locking. Mirrors the
/// teacher's single-writer `PositionTracker` discipline.
#[derive(Default)]
pub struct PositionLedger {
    pub first_seen_ms: HashMap<SymbolSideKey, u64>,
    pub targets: HashMap<SymbolSideKey, PositionTarget>,
    pub pending: HashMap<SymbolSideKey, PendingOrder>,
    pub cooldown: CooldownState,
    pub stop_loss_history: StopLossHistory,
    pub daily_pair_trades: DailyPairTrades,
    /// Last-observed entry price per key, refreshed whenever the control
    /// loop sees the position present. Used by the reconciler to classify
    /// a vanished position against the entry price when no `PositionTarget`
    /// is recorded for it (§4.5).
    pub entry_price: HashMap<SymbolSideKey, f64>,
}

impl PositionLedger {
    pub fn new(today: impl Into<String>) -> Self {
        Self {
            first_seen_ms: HashMap::new(),
            targets: HashMap::new(),
            pending: HashMap::new(),
            cooldown: CooldownState::default(),
            stop_loss_history: StopLossHistory::default(),
            daily_pair_trades: DailyPairTrades::new(today),
            entry_price: HashMap::new(),
        }
    }

    pub fn has_pending(&self, key: &SymbolSideKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn has_live_position_or_pending(&self, symbol: &str) -> bool {
        let long = (symbol.to_string(), PositionSide::Long);
        let short = (symbol.to_string(), PositionSide::Short);
        self.first_seen_ms.contains_key(&long)
            || self.first_seen_ms.contains_key(&short)
            || self.pending.contains_key(&long)
            || self.pending.contains_key(&short)
    }

    pub fn count_live_positions(&self) -> usize {
        self.first_seen_ms.len()
    }

    pub fn count_pending(&self) -> usize {
        self.pending.len()
    }

    /// Total counted toward the position-count cap (§4.8): live positions
    /// for market opens, plus pending orders for limit opens.
    pub fn cap_count(&self) -> usize {
        self.count_live_positions() + self.count_pending()
    }

    /// Removes every trace of a closed position (§9: "on close, the map
    /// entry is removed after all adapter side effects complete").
    pub fn purge_position(&mut self, key: &SymbolSideKey) {
        self.first_seen_ms.remove(key);
        self.targets.remove(key);
        self.entry_price.remove(key);
    }

    pub fn purge_pending(&mut self, key: &SymbolSideKey) {
        self.pending.remove(key);
    }

    /// Fill transition from the lifecycle sync (§4.4a): moves a pending
    /// order's identity into an owned position with a fresh stage-0 target.
    pub fn promote_pending_to_position(&mut self, key: SymbolSideKey, now_ms: u64) {
        if let Some(order) = self.pending.remove(&key) {
            self.first_seen_ms.insert(key.clone(), order.create_time_ms);
            self.targets.insert(key, PositionTarget::new(order.tp1, order.tp2, order.tp3, order.stop_loss));
        }
        let _ = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(symbol: &str, side: PositionSide) -> SymbolSideKey {
        (symbol.to_string(), side)
    }

    #[test]
    fn stop_loss_history_first_hit_gets_60_minutes() {
        let mut history = StopLossHistory::default();
        let duration = history.record_and_cooldown_duration(key("BTCUSDT", PositionSide::Long), 1_000_000);
        assert_eq!(duration, FIRST_COOLDOWN_MS);
    }

    #[test]
    fn stop_loss_history_second_hit_within_window_gets_240_minutes() {
        let mut history = StopLossHistory::default();
        let k = key("BTCUSDT", PositionSide::Long);
        history.record_and_cooldown_duration(k.clone(), 0);
        let duration = history.record_and_cooldown_duration(k, 60_000);
        assert_eq!(duration, SUBSEQUENT_COOLDOWN_MS);
    }

    #[test]
    fn stop_loss_history_resets_after_window_passes() {
        let mut history = StopLossHistory::default();
        let k = key("BTCUSDT", PositionSide::Long);
        history.record_and_cooldown_duration(k.clone(), 0);
        let duration = history.record_and_cooldown_duration(k, TWELVE_HOURS_MS + 1);
        assert_eq!(duration, FIRST_COOLDOWN_MS);
    }

    #[test]
    fn daily_pair_trades_rolls_over_on_new_day() {
        let mut trades = DailyPairTrades::new("2026-07-27");
        trades.increment("BTCUSDT");
        assert_eq!(trades.count("BTCUSDT"), 1);
        trades.roll_day_if_needed("2026-07-28");
        assert_eq!(trades.count("BTCUSDT"), 0);
    }

    #[test]
    fn cooldown_either_side_checks_both_keys() {
        let mut cooldown = CooldownState::default();
        cooldown.set(key("ETHUSDT", PositionSide::Short), 5_000);
        assert!(cooldown.either_side_in_cooldown("ETHUSDT", 1_000));
        assert!(!cooldown.either_side_in_cooldown("ETHUSDT", 6_000));
    }

    #[test]
    fn cap_count_sums_positions_and_pending() {
        let mut ledger = PositionLedger::new("2026-07-28");
        ledger.first_seen_ms.insert(key("BTCUSDT", PositionSide::Long), 0);
        ledger.pending.insert(
            key("ETHUSDT", PositionSide::Short),
            PendingOrder {
                symbol: "ETHUSDT".to_string(),
                side: PositionSide::Short,
                limit_price: 10.0,
                quantity: 1.0,
                leverage: 5.0,
                order_id: "x".to_string(),
                tp1: 0.0,
                tp2: 0.0,
                tp3: 0.0,
                stop_loss: 0.0,
                take_profit: 0.0,
                create_time_ms: 0,
                confidence: 0.0,
                reasoning: String::new(),
                thesis: String::new(),
                cancel_conditions: String::new(),
            },
        );
        assert_eq!(ledger.cap_count(), 2);
    }
}
