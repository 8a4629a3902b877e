// ladder.rs — Auto-SL/TP Ladder (C6)
//
// One pass per cycle over every live position with a recorded target:
// advance stage on TP touch, partial-close, then move the stop-loss.
// Grounded on the teacher's inventory-skew rebalancer loop in
// `market_maker.rs` (scan positions, compute an adjustment, apply it,
// log the outcome) — generalized from a single symmetric rebalance to the
// three-stage TP ladder with monotonic stop-loss and partial-close
// atomicity this spec requires (§4.3).
use log::{info, warn};

use crate::exchange::ExchangeAdapter;
use crate::ledger::{PositionLedger, PositionTarget};
use crate::types::{PositionSide, SymbolSideKey};

const SAFETY_GAP: f64 = 0.0005;

#[derive(Debug, Clone, PartialEq)]
pub struct LadderEvent {
    pub symbol: String,
    pub side: PositionSide,
    pub from_stage: u8,
    pub to_stage: u8,
    pub closed_qty: f64,
    pub sl_attached: Option<f64>,
}

/// Ladder rule from §4.3 step 1, before the monotonicity/safety-gap pass.
/// Exposed for the executor's `update_stop_loss` fallback (§4.9).
pub fn proposed_sl_and_stage(side: PositionSide, target: &PositionTarget, price: f64, entry: f64) -> (f64, u8) {
    match side {
        PositionSide::Long => {
            if price >= target.tp3 && target.stage < 3 {
                ((target.tp1 + target.tp2) / 2.0, 3)
            } else if price >= target.tp2 && target.stage < 2 {
                ((target.tp1 + target.tp2) / 2.0, 2)
            } else if price >= target.tp1 && target.stage < 1 {
                (entry, 1)
            } else {
                (target.current_sl, target.stage)
            }
        }
        PositionSide::Short => {
            if price <= target.tp3 && target.stage < 3 {
                ((target.tp1 + target.tp2) / 2.0, 3)
            } else if price <= target.tp2 && target.stage < 2 {
                ((target.tp1 + target.tp2) / 2.0, 2)
            } else if price <= target.tp1 && target.stage < 1 {
                (entry, 1)
            } else {
                (target.current_sl, target.stage)
            }
        }
    }
}

/// Safety-gap clamp from §4.3 step 3: long SL must stay at or below
/// `price * (1 - SAFETY_GAP)`; short SL must stay at or above the mirror.
/// Returns the clamped SL, still subject to the caller's monotonicity check.
fn clamp_to_safety_gap(side: PositionSide, sl: f64, price: f64) -> f64 {
    match side {
        PositionSide::Long => sl.min(price * (1.0 - SAFETY_GAP)),
        PositionSide::Short => sl.max(price * (1.0 + SAFETY_GAP)),
    }
}

fn is_improvement(side: PositionSide, candidate: f64, current: f64) -> bool {
    match side {
        PositionSide::Long => candidate > current,
        PositionSide::Short => candidate < current,
    }
}

/// Schedule from §4.3 step 4. Returns the fraction of the *current* size to
/// close for a 0->1 or 1->2 transition; `None` for 2->3 (no local close).
fn close_fraction(from_stage: u8, to_stage: u8) -> Option<f64> {
    match (from_stage, to_stage) {
        (0, 1) => Some(0.25),
        (1, 2) => Some(1.0 / 3.0),
        _ => None,
    }
}

/// Runs one ladder pass over `positions`, mutating `ledger` targets in
/// place. `positions` is `(key, side, entry_price, mark_price, quantity)`
/// tuples for every live position with a recorded target.
pub async fn run(
    ledger: &mut PositionLedger,
    adapter: &dyn ExchangeAdapter,
    positions: &[(SymbolSideKey, f64, f64, f64)],
) -> Vec<LadderEvent> {
    let mut events = Vec::new();

    for (key, entry_price, mark_price, quantity) in positions {
        let (symbol, side) = key.clone();
        let target = match ledger.targets.get(key).copied() {
            Some(t) => t,
            None => continue,
        };

        let (proposed_sl, proposed_stage) = proposed_sl_and_stage(side, &target, *mark_price, *entry_price);
        if proposed_stage <= target.stage && proposed_sl == target.current_sl {
            continue;
        }

        let clamped_sl = clamp_to_safety_gap(side, proposed_sl, *mark_price);
        if proposed_stage <= target.stage && !is_improvement(side, clamped_sl, target.current_sl) {
            continue;
        }

        let from_stage = target.stage;
        let to_stage = proposed_stage;
        let fraction = close_fraction(from_stage, to_stage);

        let mut closed_qty = 0.0;
        let mut partial_close_ok = true;

        if let Some(frac) = fraction {
            let close_qty = quantity * frac;
            let close_result = match side {
                PositionSide::Long => adapter.close_long(&symbol, close_qty).await,
                PositionSide::Short => adapter.close_short(&symbol, close_qty).await,
            };
            match close_result {
                Ok(_) => {
                    closed_qty = close_qty;
                    info!("[LADDER] {} {} partial close {:.6} stage {}->{}", symbol, side, close_qty, from_stage, to_stage);
                }
                Err(e) => {
                    partial_close_ok = false;
                    warn!("[LADDER] {} {} partial close failed, stage not advanced: {}", symbol, side, e);
                }
            }
        }

        // Stage advances on partial-close success for 0->1/1->2; on price
        // touch alone for 2->3 (the exchange-resident TP3 order fills it).
        let stage_to_commit = if fraction.is_some() {
            if partial_close_ok {
                to_stage
            } else {
                from_stage
            }
        } else {
            to_stage
        };

        // Re-fetch remaining size before attaching the new SL so the
        // protective order references the post-close quantity (§4.3 step 6).
        let remaining_qty = if closed_qty > 0.0 {
            match adapter.get_positions().await {
                Ok(list) => list
                    .iter()
                    .find(|p| p.symbol == symbol && p.side == side)
                    .map(|p| p.quantity)
                    .unwrap_or(quantity - closed_qty),
                Err(_) => quantity - closed_qty,
            }
        } else {
            *quantity
        };

        let sl_result = adapter.set_stop_loss(&symbol, side, remaining_qty, clamped_sl).await;
        let sl_attached = match sl_result {
            Ok(_) => Some(clamped_sl),
            Err(e) => {
                warn!("[LADDER] {} {} stop-loss attach failed after stage {}->{}: {}", symbol, side, from_stage, stage_to_commit, e);
                None
            }
        };

        if let Some(entry) = ledger.targets.get_mut(key) {
            entry.stage = stage_to_commit;
            if let Some(new_sl) = sl_attached {
                entry.current_sl = new_sl;
            }
        }

        events.push(LadderEvent {
            symbol,
            side,
            from_stage,
            to_stage: stage_to_commit,
            closed_qty,
            sl_attached,
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SimExchange;
    use crate::ledger::PositionTarget;

    fn key(symbol: &str, side: PositionSide) -> SymbolSideKey {
        (symbol.to_string(), side)
    }

    #[tokio::test]
    async fn s3_partial_close_at_tp1_then_sl_to_entry() {
        let adapter = SimExchange::new(10_000.0);
        adapter.set_mark_price("BTCUSDT", 111.0);
        adapter.seed_position(crate::exchange::Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: 100.0,
            mark_price: 111.0,
            quantity: 3.0,
            leverage: 5.0,
            unrealized_pnl: 0.0,
            liquidation_price: 0.0,
            margin_used: 0.0,
            first_seen_ms: 0,
        });

        let mut ledger = PositionLedger::new("2026-07-28");
        let k = key("BTCUSDT", PositionSide::Long);
        ledger.targets.insert(k.clone(), PositionTarget::new(110.0, 120.0, 130.0, 95.0));

        let events = run(&mut ledger, &adapter, &[(k.clone(), 100.0, 111.0, 4.0)]).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from_stage, 0);
        assert_eq!(events[0].to_stage, 1);
        assert!((events[0].closed_qty - 1.0).abs() < 1e-9);
        assert_eq!(events[0].sl_attached, Some(100.0));
        assert_eq!(ledger.targets.get(&k).unwrap().stage, 1);
        assert_eq!(ledger.targets.get(&k).unwrap().current_sl, 100.0);
    }

    #[tokio::test]
    async fn second_pass_with_no_new_tp_touch_is_a_no_op() {
        let adapter = SimExchange::new(10_000.0);
        adapter.set_mark_price("BTCUSDT", 119.0);

        let mut ledger = PositionLedger::new("2026-07-28");
        let k = key("BTCUSDT", PositionSide::Long);
        let mut target = PositionTarget::new(110.0, 120.0, 130.0, 95.0);
        target.stage = 1;
        target.current_sl = 100.0;
        ledger.targets.insert(k.clone(), target);

        let events = run(&mut ledger, &adapter, &[(k.clone(), 100.0, 119.0, 3.0)]).await;

        assert!(events.is_empty());
        assert_eq!(ledger.targets.get(&k).unwrap().stage, 1);
        assert_eq!(ledger.targets.get(&k).unwrap().current_sl, 100.0);
    }

    #[tokio::test]
    async fn stage_does_not_advance_on_partial_close_failure() {
        // No position seeded on the adapter -> close_long errors.
        let adapter = SimExchange::new(10_000.0);
        adapter.set_mark_price("BTCUSDT", 111.0);

        let mut ledger = PositionLedger::new("2026-07-28");
        let k = key("BTCUSDT", PositionSide::Long);
        ledger.targets.insert(k.clone(), PositionTarget::new(110.0, 120.0, 130.0, 95.0));

        let events = run(&mut ledger, &adapter, &[(k.clone(), 100.0, 111.0, 4.0)]).await;

        assert_eq!(events[0].to_stage, 0);
        assert_eq!(events[0].closed_qty, 0.0);
        assert_eq!(ledger.targets.get(&k).unwrap().stage, 0);
    }

    #[test]
    fn short_sl_never_raised_by_safety_gap() {
        let clamped = clamp_to_safety_gap(PositionSide::Short, 99.0, 100.0);
        assert!((clamped - 100.05).abs() < 1e-9);
    }
}
