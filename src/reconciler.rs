// reconciler.rs — Position-Memory Reconciler (C8)
//
// Cycle-prologue step: compares exchange-reported positions against the
// engine's own key set, detects vanished positions, classifies the close
// as stop-loss or take-profit, synthesises the close action into the cycle
// record, and updates cooldown. Grounded on the teacher's
// `reconcile_positions` step in `market_maker.rs` (diff exchange state
// against local inventory at the top of every loop iteration), generalized
// to the stop-loss/take-profit classification and cooldown bookkeeping this
// spec adds (§4.5).
use std::collections::HashSet;

use log::{info, warn};

use crate::exchange::{ExchangeAdapter, Position};
use crate::ledger::PositionLedger;
use crate::types::{PositionSide, SymbolSideKey};

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledClose {
    pub symbol: String,
    pub side: PositionSide,
    pub was_stop_loss: bool,
    pub cooldown_ms_applied: Option<u64>,
}

const SL_TIE_BREAK_FLOOR: f64 = 0.003;
const ENTRY_TOLERANCE: f64 = 0.001;

/// Classifies a vanished position as stop-loss or take-profit close (§4.5).
/// With a `PositionTarget`, compares relative distance from `last_mark` to
/// `current_sl` and `tp3`, with a 0.3% tie-breaking floor favouring SL. With
/// no target, falls back to a 0.1% tolerance against the entry price: within
/// tolerance is an orderly/breakeven close, otherwise direction against
/// `side` decides (adverse move -> stop-loss, favourable -> take-profit).
fn classify_close(side: PositionSide, last_mark: f64, entry: f64, target_sl_tp3: Option<(f64, f64)>) -> bool {
    match target_sl_tp3 {
        Some((sl, tp3)) => {
            let dist_sl = (last_mark - sl).abs() / sl.abs().max(1e-9);
            let dist_tp3 = (last_mark - tp3).abs() / tp3.abs().max(1e-9);
            if (dist_sl - dist_tp3).abs() <= SL_TIE_BREAK_FLOOR {
                true
            } else {
                dist_sl < dist_tp3
            }
        }
        None => {
            let dist = (last_mark - entry).abs() / entry.abs().max(1e-9);
            if dist <= ENTRY_TOLERANCE {
                false
            } else {
                match side {
                    PositionSide::Long => last_mark < entry,
                    PositionSide::Short => last_mark > entry,
                }
            }
        }
    }
}

/// Runs the reconciler pass: diffs `current_positions` against
/// `ledger.first_seen_ms`, cancels orphan orders for any vanished key,
/// synthesises a classified close, updates cooldown, and purges ledger
/// state for the vanished key.
pub async fn run(
    ledger: &mut PositionLedger,
    adapter: &dyn ExchangeAdapter,
    current_positions: &[Position],
    last_known_mark: impl Fn(&SymbolSideKey) -> f64,
    now_ms: u64,
) -> Vec<ReconciledClose> {
    let current_keys: HashSet<SymbolSideKey> =
        current_positions.iter().map(|p| (p.symbol.clone(), p.side)).collect();
    let known_keys: Vec<SymbolSideKey> = ledger.first_seen_ms.keys().cloned().collect();

    let mut closes = Vec::new();

    for key in known_keys {
        if current_keys.contains(&key) {
            continue;
        }
        let (symbol, side) = key.clone();

        match adapter.cancel_all_orders(&symbol).await {
            Ok(n) if n > 0 => info!("[RECONCILE] {} {} cancelled {} orphan order(s)", symbol, side, n),
            Ok(_) => {}
            Err(e) => warn!("[RECONCILE] {} {} cancel_all_orders failed (best-effort): {}", symbol, side, e),
        }

        let last_mark = last_known_mark(&key);
        let target = ledger.targets.get(&key).copied();
        let entry = ledger.entry_price.get(&key).copied().unwrap_or(last_mark);
        let was_stop_loss = match target {
            Some(t) => classify_close(side, last_mark, entry, Some((t.current_sl, t.tp3))),
            None => classify_close(side, last_mark, entry, None),
        };

        let mut cooldown_ms_applied = None;
        if was_stop_loss {
            let duration = ledger.stop_loss_history.record_and_cooldown_duration(key.clone(), now_ms);
            ledger.cooldown.set(key.clone(), now_ms + duration);
            cooldown_ms_applied = Some(duration);
            info!("[RECONCILE] {} {} classified as stop-loss, cooldown {}ms", symbol, side, duration);
        } else {
            info!("[RECONCILE] {} {} classified as take-profit/orderly close", symbol, side);
        }

        ledger.purge_position(&key);

        closes.push(ReconciledClose { symbol, side, was_stop_loss, cooldown_ms_applied });
    }

    closes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SimExchange;
    use crate::ledger::PositionTarget;

    #[tokio::test]
    async fn s4_vanished_position_near_sl_classified_as_stop_loss() {
        let adapter = SimExchange::new(10_000.0);
        let mut ledger = PositionLedger::new("2026-07-28");
        let key: SymbolSideKey = ("BTCUSDT".to_string(), PositionSide::Long);
        ledger.first_seen_ms.insert(key.clone(), 0);
        ledger.targets.insert(key.clone(), PositionTarget::new(110.0, 120.0, 130.0, 95.0));

        let closes = run(&mut ledger, &adapter, &[], |_| 95.2, 1_000_000).await;

        assert_eq!(closes.len(), 1);
        assert!(closes[0].was_stop_loss);
        assert_eq!(closes[0].cooldown_ms_applied, Some(60 * 60 * 1000));
        assert!(!ledger.first_seen_ms.contains_key(&key));
        assert!(ledger.cooldown.is_in_cooldown(&key, 1_000_000 + 1));
    }

    #[tokio::test]
    async fn second_stop_loss_in_window_gets_240_minute_cooldown() {
        let adapter = SimExchange::new(10_000.0);
        let mut ledger = PositionLedger::new("2026-07-28");
        let key: SymbolSideKey = ("ETHUSDT".to_string(), PositionSide::Short);
        ledger.stop_loss_history.record_and_cooldown_duration(key.clone(), 0);
        ledger.first_seen_ms.insert(key.clone(), 0);
        ledger.targets.insert(key.clone(), PositionTarget { tp1: 48.0, tp2: 45.0, tp3: 40.0, stage: 0, current_sl: 52.0 });

        let closes = run(&mut ledger, &adapter, &[], |_| 52.1, 60_000).await;

        assert_eq!(closes[0].cooldown_ms_applied, Some(240 * 60 * 1000));
    }

    #[tokio::test]
    async fn vanished_position_without_target_uses_entry_tolerance() {
        let adapter = SimExchange::new(10_000.0);
        let mut ledger = PositionLedger::new("2026-07-28");
        let key: SymbolSideKey = ("SOLUSDT".to_string(), PositionSide::Long);
        ledger.first_seen_ms.insert(key.clone(), 0);
        ledger.entry_price.insert(key.clone(), 100.0);

        // Last mark within 0.1% of entry -> classified as an orderly close.
        let closes = run(&mut ledger, &adapter, &[], |_| 100.05, 0).await;
        assert_eq!(closes.len(), 1);
        assert!(!closes[0].was_stop_loss);
    }

    #[tokio::test]
    async fn vanished_position_far_from_entry_without_target_is_stop_loss() {
        let adapter = SimExchange::new(10_000.0);
        let mut ledger = PositionLedger::new("2026-07-28");
        let key: SymbolSideKey = ("SOLUSDT".to_string(), PositionSide::Long);
        ledger.first_seen_ms.insert(key.clone(), 0);
        ledger.entry_price.insert(key.clone(), 100.0);

        let closes = run(&mut ledger, &adapter, &[], |_| 80.0, 0).await;
        assert_eq!(closes.len(), 1);
        assert!(closes[0].was_stop_loss);
    }

    #[tokio::test]
    async fn still_present_positions_are_not_reconciled() {
        let adapter = SimExchange::new(10_000.0);
        let mut ledger = PositionLedger::new("2026-07-28");
        let key: SymbolSideKey = ("BTCUSDT".to_string(), PositionSide::Long);
        ledger.first_seen_ms.insert(key.clone(), 0);

        let still_there = Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: 100.0,
            mark_price: 101.0,
            quantity: 1.0,
            leverage: 5.0,
            unrealized_pnl: 0.0,
            liquidation_price: 0.0,
            margin_used: 0.0,
            first_seen_ms: 0,
        };

        let closes = run(&mut ledger, &adapter, &[still_there], |_| 101.0, 0).await;
        assert!(closes.is_empty());
        assert!(ledger.first_seen_ms.contains_key(&key));
    }
}
