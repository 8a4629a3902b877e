// executor.rs — Decision Executor (C12)
//
// Per-action dispatch: the terminal stage of the pipeline that actually
// talks to the adapter and mutates the ledger. Grounded on the teacher's
// `execution.rs` order-dispatch match (one arm per order kind, each
// updating `PositionTracker` only after the adapter call succeeds),
// generalized to the thirteen-action table this spec requires (§4.9).
use log::{info, warn};

use crate::decision::{Action, Decision, ExecutionPreference};
use crate::exchange::ExchangeAdapter;
use crate::filters::{round_to_step, FiltersCache};
use crate::gate::{self, ExecutionMode, GateConfig};
use crate::ladder;
use crate::ledger::{PendingOrder, PositionLedger, PositionTarget};
use crate::lifecycle::{self, LifecycleConfig};
use crate::ports::Clock;
use crate::record::ExecutionLogEntry;
use crate::snapshot::MarketSnapshotProvider;
use crate::types::PositionSide;

pub struct ExecutorContext<'a> {
    pub adapter: &'a dyn ExchangeAdapter,
    pub snapshot: &'a dyn MarketSnapshotProvider,
    pub filters: &'a FiltersCache,
    pub clock: &'a dyn Clock,
    pub gate_config: &'a GateConfig,
    pub lifecycle_config: &'a LifecycleConfig,
}

fn side_of(action: Action) -> Option<PositionSide> {
    match action {
        Action::OpenLong | Action::LimitOpenLong | Action::CloseLong | Action::PartialCloseLong => Some(PositionSide::Long),
        Action::OpenShort | Action::LimitOpenShort | Action::CloseShort | Action::PartialCloseShort => Some(PositionSide::Short),
        _ => None,
    }
}

fn entry(symbol: &str, action: &str, status: &str, detail: impl Into<String>) -> ExecutionLogEntry {
    ExecutionLogEntry { symbol: symbol.to_string(), action: action.to_string(), status: status.to_string(), detail: detail.into(), execution_report: None, realized_pnl: None }
}

/// Resolves close quantity from `close_quantity` (absolute) or `close_ratio`
/// (accepted as either a 0..1 decimal or a 0..100 percent), clamped to a
/// full close when `<= 0` or `>=` the live quantity (§4.9).
fn resolve_close_qty(decision: &Decision, live_qty: f64) -> f64 {
    let requested = if decision.close_quantity > 0.0 {
        decision.close_quantity
    } else if decision.close_ratio > 0.0 {
        let ratio = if decision.close_ratio > 1.0 { decision.close_ratio / 100.0 } else { decision.close_ratio };
        live_qty * ratio
    } else {
        0.0
    };
    if requested <= 0.0 || requested >= live_qty {
        0.0
    } else {
        requested
    }
}

pub async fn dispatch(decision: &Decision, ledger: &mut PositionLedger, ctx: &ExecutorContext<'_>) -> ExecutionLogEntry {
    match decision.action {
        Action::OpenLong | Action::OpenShort => dispatch_open(decision, ledger, ctx).await,
        Action::LimitOpenLong | Action::LimitOpenShort => dispatch_limit_open(decision, ledger, ctx).await,
        Action::CloseLong | Action::CloseShort => dispatch_close(decision, ledger, ctx, false).await,
        Action::PartialCloseLong | Action::PartialCloseShort => dispatch_close(decision, ledger, ctx, true).await,
        Action::UpdateStopLoss => dispatch_update_stop_loss(decision, ledger, ctx).await,
        Action::UpdateTakeProfit => dispatch_update_take_profit(decision, ledger, ctx).await,
        Action::CancelLimitOrder => dispatch_cancel_limit_order(decision, ledger, ctx).await,
        Action::Hold | Action::Wait => entry(&decision.symbol, decision.action.as_wire(), "NO_OP", "no side effects"),
    }
}

async fn dispatch_open(decision: &Decision, ledger: &mut PositionLedger, ctx: &ExecutorContext<'_>) -> ExecutionLogEntry {
    let side = side_of(decision.action).unwrap();
    let key = (decision.symbol.clone(), side);

    let market_data = match ctx.snapshot.get(&decision.symbol).await {
        Some(d) => d,
        None => return entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", "no market snapshot available"),
    };

    let planned_notional = decision.position_size_usd * decision.leverage;
    let verdict = gate::evaluate(ctx.gate_config, Some(&market_data.microstructure), planned_notional, ctx.clock.now_ms());

    let mut preference = decision.execution_preference;
    if verdict.mode == ExecutionMode::LimitOnly {
        preference = ExecutionPreference::Limit;
    }
    if preference == ExecutionPreference::Limit {
        let mut rewritten = decision.clone();
        rewritten.action = match decision.action {
            Action::OpenLong => Action::LimitOpenLong,
            Action::OpenShort => Action::LimitOpenShort,
            other => other,
        };
        rewritten.execution_preference = ExecutionPreference::Limit;
        return dispatch_limit_open(&rewritten, ledger, ctx).await;
    }

    if ledger.has_pending(&key) || ledger.first_seen_ms.contains_key(&key) {
        return entry(&decision.symbol, decision.action.as_wire(), "REJECTED", "duplicate position or pending order for this key");
    }
    if ledger.count_live_positions() >= 3 {
        return entry(&decision.symbol, decision.action.as_wire(), "REJECTED", "position-count cap reached");
    }

    let price = market_data.current_price;
    if price <= 0.0 {
        return entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", "invalid market price");
    }
    let qty = planned_notional / price;

    let open_result = match side {
        PositionSide::Long => ctx.adapter.open_long(&decision.symbol, qty, decision.leverage).await,
        PositionSide::Short => ctx.adapter.open_short(&decision.symbol, qty, decision.leverage).await,
    };
    let handle = match open_result {
        Ok(h) => h,
        Err(e) => return entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", format!("open failed: {}", e)),
    };

    if let Err(e) = ctx.adapter.set_stop_loss(&decision.symbol, side, qty, decision.stop_loss).await {
        warn!("[EXECUTOR] {} {} stop-loss attach failed after open: {}", decision.symbol, side, e);
    }
    if let Err(e) = ctx.adapter.set_take_profit(&decision.symbol, side, qty, decision.take_profit).await {
        warn!("[EXECUTOR] {} {} take-profit attach failed after open: {}", decision.symbol, side, e);
    }

    ledger.first_seen_ms.insert(key.clone(), ctx.clock.now_ms());
    ledger.entry_price.insert(key.clone(), price);
    ledger.targets.insert(key, PositionTarget::new(decision.tp1, decision.tp2, decision.tp3, decision.stop_loss));
    ledger.daily_pair_trades.increment(&decision.symbol);

    info!("[EXECUTOR] {} {} opened, order_id={}", decision.symbol, side, handle.order_id);
    entry(&decision.symbol, decision.action.as_wire(), "FILLED", format!("opened at {:.6}", price))
}

async fn dispatch_limit_open(decision: &Decision, ledger: &mut PositionLedger, ctx: &ExecutorContext<'_>) -> ExecutionLogEntry {
    let side = side_of(decision.action).unwrap();
    let key = (decision.symbol.clone(), side);

    if ledger.has_pending(&key) || ledger.first_seen_ms.contains_key(&key) {
        return entry(&decision.symbol, decision.action.as_wire(), "REJECTED", "duplicate position or pending order for this key");
    }
    if ledger.cap_count() >= 3 {
        return entry(&decision.symbol, decision.action.as_wire(), "REJECTED", "position-count cap reached");
    }

    let market_data = match ctx.snapshot.get(&decision.symbol).await {
        Some(d) => d,
        None => return entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", "no market snapshot available"),
    };
    let filters = match ctx.filters.get(&decision.symbol, ctx.adapter).await {
        Ok(f) => f,
        Err(e) => return entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", format!("filters lookup failed: {}", e)),
    };

    let order_side = match side {
        PositionSide::Long => crate::types::OrderSide::Buy,
        PositionSide::Short => crate::types::OrderSide::Sell,
    };
    let (price, reason) = crate::pricer::price_limit(Some(order_side), Some(&market_data.microstructure), filters.tick_size);
    if price <= 0.0 {
        return entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", "pricer could not derive a price");
    }

    let planned_notional = decision.position_size_usd * decision.leverage;
    let raw_qty = planned_notional / price;
    let qty = round_to_step(raw_qty, filters.step_size);

    let verdict = gate::evaluate(ctx.gate_config, Some(&market_data.microstructure), planned_notional, ctx.clock.now_ms());

    if verdict.mode == ExecutionMode::LimitOnly {
        let report =
            lifecycle::run_lifecycle(ctx.adapter, ctx.snapshot, ctx.clock, ctx.lifecycle_config, &decision.symbol, side, qty, price, reason, filters.tick_size)
                .await;

        if report.status == "RETRIES_EXHAUSTED" {
            let mut log = entry(&decision.symbol, decision.action.as_wire(), "ABORTED", "limit_retries_exhausted");
            log.execution_report = Some(report);
            return log;
        }

        ledger.pending.insert(
            key,
            PendingOrder {
                symbol: decision.symbol.clone(),
                side,
                limit_price: report.limit_price,
                quantity: qty,
                leverage: decision.leverage,
                order_id: report.order_id.clone(),
                tp1: decision.tp1,
                tp2: decision.tp2,
                tp3: decision.tp3,
                stop_loss: decision.stop_loss,
                take_profit: decision.take_profit,
                create_time_ms: ctx.clock.now_ms(),
                confidence: decision.confidence,
                reasoning: decision.reasoning.clone(),
                thesis: String::new(),
                cancel_conditions: String::new(),
            },
        );
        ledger.daily_pair_trades.increment(&decision.symbol);

        let status = report.status.clone();
        let mut log = entry(&decision.symbol, decision.action.as_wire(), &status, "limit lifecycle completed");
        log.execution_report = Some(report);
        return log;
    }

    let handle = match side {
        PositionSide::Long => ctx.adapter.limit_open_long(&decision.symbol, qty, decision.leverage, price, decision.stop_loss).await,
        PositionSide::Short => ctx.adapter.limit_open_short(&decision.symbol, qty, decision.leverage, price, decision.stop_loss).await,
    };
    let handle = match handle {
        Ok(h) => h,
        Err(e) => return entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", format!("limit open failed: {}", e)),
    };

    ledger.pending.insert(
        key,
        PendingOrder {
            symbol: decision.symbol.clone(),
            side,
            limit_price: price,
            quantity: qty,
            leverage: decision.leverage,
            order_id: handle.order_id,
            tp1: decision.tp1,
            tp2: decision.tp2,
            tp3: decision.tp3,
            stop_loss: decision.stop_loss,
            take_profit: decision.take_profit,
            create_time_ms: ctx.clock.now_ms(),
            confidence: decision.confidence,
            reasoning: decision.reasoning.clone(),
            thesis: String::new(),
            cancel_conditions: String::new(),
        },
    );
    ledger.daily_pair_trades.increment(&decision.symbol);

    entry(&decision.symbol, decision.action.as_wire(), "NEW", format!("limit order registered at {:.6}", price))
}

async fn dispatch_close(decision: &Decision, ledger: &mut PositionLedger, ctx: &ExecutorContext<'_>, is_partial_action: bool) -> ExecutionLogEntry {
    let side = side_of(decision.action).unwrap();
    let key = (decision.symbol.clone(), side);

    let positions = match ctx.adapter.get_positions().await {
        Ok(p) => p,
        Err(e) => return entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", format!("get_positions failed: {}", e)),
    };
    let live = match positions.iter().find(|p| p.symbol == decision.symbol && p.side == side) {
        Some(p) => p.clone(),
        None => return entry(&decision.symbol, decision.action.as_wire(), "REJECTED", "no live position to close"),
    };

    let close_qty = resolve_close_qty(decision, live.quantity);
    let is_full = close_qty == 0.0;

    if is_partial_action && is_full {
        return entry(&decision.symbol, decision.action.as_wire(), "REJECTED", "partial_close requested a full close");
    }

    let close_result = match side {
        PositionSide::Long => ctx.adapter.close_long(&decision.symbol, close_qty).await,
        PositionSide::Short => ctx.adapter.close_short(&decision.symbol, close_qty).await,
    };
    if let Err(e) = close_result {
        return entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", format!("close failed: {}", e));
    }

    let realized_pnl = if is_full { live.unrealized_pnl } else { live.unrealized_pnl * (close_qty / live.quantity.max(1e-9)) };

    if is_full {
        ledger.purge_position(&key);
        let mut log = entry(&decision.symbol, decision.action.as_wire(), "FILLED", "full close");
        log.realized_pnl = Some(realized_pnl);
        log
    } else {
        let mut log = entry(&decision.symbol, decision.action.as_wire(), "FILLED", format!("partial close {:.6}", close_qty));
        log.realized_pnl = Some(realized_pnl);
        log
    }
}

/// Four checks from §4.9 gating whether the AI's `new_stop_loss` is used
/// directly, or the ladder formula is used as a fallback.
fn new_stop_loss_passes_checks(side: PositionSide, new_sl: f64, current_sl: f64, price: f64, entry: f64, leverage: f64, atr_pct: f64) -> bool {
    let directionally_correct = match side {
        PositionSide::Long => new_sl < price,
        PositionSide::Short => new_sl > price,
    };
    if !directionally_correct {
        return false;
    }

    let noise_floor = (0.15 * atr_pct).max(0.20);
    let gap_pct = (price - new_sl).abs() / price.abs().max(1e-9) * 100.0;
    if gap_pct < noise_floor {
        return false;
    }

    if leverage > 0.0 {
        let liquidation_gap = (entry - new_sl).abs() / entry.abs().max(1e-9);
        if liquidation_gap >= 0.85 / leverage {
            return false;
        }
    }

    match side {
        PositionSide::Long => new_sl > current_sl,
        PositionSide::Short => new_sl < current_sl,
    }
}

async fn dispatch_update_stop_loss(decision: &Decision, ledger: &mut PositionLedger, ctx: &ExecutorContext<'_>) -> ExecutionLogEntry {
    // update_stop_loss carries no side in the action tag; infer from
    // whichever key has a live target for this symbol.
    let long_key = (decision.symbol.clone(), PositionSide::Long);
    let short_key = (decision.symbol.clone(), PositionSide::Short);
    let side = if ledger.targets.contains_key(&long_key) {
        PositionSide::Long
    } else if ledger.targets.contains_key(&short_key) {
        PositionSide::Short
    } else {
        return entry(&decision.symbol, decision.action.as_wire(), "REJECTED", "no tracked position target for symbol");
    };

    let key = (decision.symbol.clone(), side);
    let target = *ledger.targets.get(&key).unwrap();
    let entry_price = ledger.entry_price.get(&key).copied().unwrap_or(target.current_sl);
    let current_price = ctx.adapter.get_market_price(&decision.symbol).await.unwrap_or(entry_price);
    let market_data = ctx.snapshot.get(&decision.symbol).await;
    let atr_pct = market_data.as_ref().map(|d| d.risk_metrics.atr14_pct_of_price).unwrap_or(0.5);
    let leverage = ctx
        .adapter
        .get_positions()
        .await
        .ok()
        .and_then(|positions| positions.into_iter().find(|p| p.symbol == decision.symbol && p.side == side))
        .map(|p| p.leverage)
        .unwrap_or(1.0);

    let new_sl = if decision.new_stop_loss > 0.0
        && new_stop_loss_passes_checks(side, decision.new_stop_loss, target.current_sl, current_price, entry_price, leverage, atr_pct)
    {
        decision.new_stop_loss
    } else {
        ladder::proposed_sl_and_stage(side, &target, current_price, entry_price).0
    };

    match ctx.adapter.set_stop_loss(&decision.symbol, side, 0.0, new_sl).await {
        Ok(_) => {
            if let Some(t) = ledger.targets.get_mut(&key) {
                t.current_sl = new_sl;
            }
            entry(&decision.symbol, decision.action.as_wire(), "FILLED", format!("stop-loss updated to {:.6}", new_sl))
        }
        Err(e) => entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", format!("set_stop_loss failed: {}", e)),
    }
}

async fn dispatch_update_take_profit(decision: &Decision, ledger: &PositionLedger, ctx: &ExecutorContext<'_>) -> ExecutionLogEntry {
    if decision.new_take_profit <= 0.0 {
        return entry(&decision.symbol, decision.action.as_wire(), "REJECTED", "new_take_profit must be positive");
    }
    let long_key = (decision.symbol.clone(), PositionSide::Long);
    let side = if ledger.targets.contains_key(&long_key) { PositionSide::Long } else { PositionSide::Short };
    match ctx.adapter.set_take_profit(&decision.symbol, side, 0.0, decision.new_take_profit).await {
        Ok(_) => entry(&decision.symbol, decision.action.as_wire(), "FILLED", format!("take-profit updated to {:.6}", decision.new_take_profit)),
        Err(e) => entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", format!("set_take_profit failed: {}", e)),
    }
}

async fn dispatch_cancel_limit_order(decision: &Decision, ledger: &mut PositionLedger, ctx: &ExecutorContext<'_>) -> ExecutionLogEntry {
    let result = ctx.adapter.cancel_order(&decision.symbol, &decision.order_id).await;
    let should_cleanup = match &result {
        Ok(_) => true,
        Err(e) => e.is_cancel_noop(),
    };
    if should_cleanup {
        let long_key = (decision.symbol.clone(), PositionSide::Long);
        let short_key = (decision.symbol.clone(), PositionSide::Short);
        if ledger.pending.remove(&long_key).is_some() || ledger.pending.remove(&short_key).is_some() {
            ledger.daily_pair_trades.decrement(&decision.symbol);
        }
        entry(&decision.symbol, decision.action.as_wire(), "CANCELED", "limit order cancelled")
    } else {
        entry(&decision.symbol, decision.action.as_wire(), "ORDER_FAILED", format!("cancel failed: {}", result.unwrap_err()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SimExchange;
    use crate::gate::Microstructure;
    use crate::ports::FixedClock;
    use crate::snapshot::{RiskMetrics, SimSnapshotProvider};

    fn lifecycle_config() -> LifecycleConfig {
        LifecycleConfig { wait_seconds: 0, max_retries: 0, poll_interval_ms: 1, ..LifecycleConfig::default() }
    }

    async fn make_ctx<'a>(
        adapter: &'a SimExchange,
        snapshot: &'a SimSnapshotProvider,
        filters: &'a FiltersCache,
        clock: &'a FixedClock,
        gate_config: &'a GateConfig,
        lifecycle_cfg: &'a LifecycleConfig,
    ) -> ExecutorContext<'a> {
        ExecutorContext { adapter, snapshot, filters, clock, gate_config, lifecycle_config: lifecycle_cfg }
    }

    #[tokio::test]
    async fn market_open_installs_target_and_increments_counter() {
        let adapter = SimExchange::new(10_000.0);
        adapter.set_mark_price("BTCUSDT", 100.0);
        let snapshot = SimSnapshotProvider::new(GateConfig::default());
        snapshot
            .set_fixture(
                "BTCUSDT",
                100.0,
                Microstructure { best_bid: 99.99, best_ask: 100.01, spread_bps: 2.0, min_notional: 5_000.0, depth_notional_10: 200_000.0, depth_ratio: 1.0, ..Microstructure::default() },
                RiskMetrics::default(),
            )
            .await;
        let filters = FiltersCache::default();
        let clock = FixedClock::new(1_000);
        let gate_config = GateConfig::default();
        let lifecycle_cfg = lifecycle_config();
        let ctx = make_ctx(&adapter, &snapshot, &filters, &clock, &gate_config, &lifecycle_cfg).await;

        let decision = Decision {
            symbol: "BTCUSDT".to_string(),
            action: Action::OpenLong,
            position_size_usd: 1_000.0,
            leverage: 5.0,
            stop_loss: 95.0,
            take_profit: 130.0,
            tp1: 110.0,
            tp2: 120.0,
            tp3: 130.0,
            reasoning: "grade=S score=900".to_string(),
            ..Decision::default()
        };

        let mut ledger = PositionLedger::new("2026-07-28");
        let log = dispatch(&decision, &mut ledger, &ctx).await;

        assert_eq!(log.status, "FILLED");
        assert_eq!(ledger.daily_pair_trades.count("BTCUSDT"), 1);
        let key = ("BTCUSDT".to_string(), PositionSide::Long);
        assert!(ledger.first_seen_ms.contains_key(&key));
        assert_eq!(ledger.targets.get(&key).unwrap().tp3, 130.0);
    }

    #[tokio::test]
    async fn cancel_limit_order_cleans_up_pending_and_decrements_counter() {
        let adapter = SimExchange::new(10_000.0);
        let snapshot = SimSnapshotProvider::new(GateConfig::default());
        let filters = FiltersCache::default();
        let clock = FixedClock::new(1_000);
        let gate_config = GateConfig::default();
        let lifecycle_cfg = lifecycle_config();
        let ctx = make_ctx(&adapter, &snapshot, &filters, &clock, &gate_config, &lifecycle_cfg).await;

        let handle = adapter.limit_open_long("ETHUSDT", 2.0, 3.0, 49.0, 45.0).await.unwrap();
        let mut ledger = PositionLedger::new("2026-07-28");
        ledger.daily_pair_trades.increment("ETHUSDT");
        ledger.pending.insert(
            ("ETHUSDT".to_string(), PositionSide::Long),
            PendingOrder {
                symbol: "ETHUSDT".to_string(),
                side: PositionSide::Long,
                limit_price: 49.0,
                quantity: 2.0,
                leverage: 3.0,
                order_id: handle.order_id.clone(),
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

        let decision = Decision { symbol: "ETHUSDT".to_string(), action: Action::CancelLimitOrder, order_id: handle.order_id, ..Decision::default() };
        let log = dispatch(&decision, &mut ledger, &ctx).await;

        assert_eq!(log.status, "CANCELED");
        assert!(ledger.pending.is_empty());
        assert_eq!(ledger.daily_pair_trades.count("ETHUSDT"), 0);
    }

    #[tokio::test]
    async fn cancel_already_gone_order_is_treated_as_success() {
        let adapter = SimExchange::new(10_000.0);
        let snapshot = SimSnapshotProvider::new(GateConfig::default());
        let filters = FiltersCache::default();
        let clock = FixedClock::new(1_000);
        let gate_config = GateConfig::default();
        let lifecycle_cfg = lifecycle_config();
        let ctx = make_ctx(&adapter, &snapshot, &filters, &clock, &gate_config, &lifecycle_cfg).await;

        let mut ledger = PositionLedger::new("2026-07-28");
        let decision = Decision { symbol: "ETHUSDT".to_string(), action: Action::CancelLimitOrder, order_id: "nonexistent".to_string(), ..Decision::default() };
        let log = dispatch(&decision, &mut ledger, &ctx).await;
        assert_eq!(log.status, "CANCELED");
    }

    #[tokio::test]
    async fn full_close_records_realized_pnl_from_live_position() {
        let adapter = SimExchange::new(10_000.0);
        adapter.seed_position(crate::exchange::Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: 100.0,
            mark_price: 110.0,
            quantity: 2.0,
            leverage: 5.0,
            unrealized_pnl: 20.0,
            liquidation_price: 0.0,
            margin_used: 0.0,
            first_seen_ms: 0,
        });
        let snapshot = SimSnapshotProvider::new(GateConfig::default());
        let filters = FiltersCache::default();
        let clock = FixedClock::new(1_000);
        let gate_config = GateConfig::default();
        let lifecycle_cfg = lifecycle_config();
        let ctx = make_ctx(&adapter, &snapshot, &filters, &clock, &gate_config, &lifecycle_cfg).await;

        let mut ledger = PositionLedger::new("2026-07-28");
        let decision = Decision { symbol: "BTCUSDT".to_string(), action: Action::CloseLong, ..Decision::default() };
        let log = dispatch(&decision, &mut ledger, &ctx).await;

        assert_eq!(log.status, "FILLED");
        assert_eq!(log.realized_pnl, Some(20.0));
    }

    #[tokio::test]
    async fn partial_close_of_a_full_position_is_rejected() {
        let adapter = SimExchange::new(10_000.0);
        adapter.seed_position(crate::exchange::Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: 100.0,
            mark_price: 101.0,
            quantity: 2.0,
            leverage: 5.0,
            unrealized_pnl: 0.0,
            liquidation_price: 0.0,
            margin_used: 0.0,
            first_seen_ms: 0,
        });
        let snapshot = SimSnapshotProvider::new(GateConfig::default());
        let filters = FiltersCache::default();
        let clock = FixedClock::new(1_000);
        let gate_config = GateConfig::default();
        let lifecycle_cfg = lifecycle_config();
        let ctx = make_ctx(&adapter, &snapshot, &filters, &clock, &gate_config, &lifecycle_cfg).await;

        let mut ledger = PositionLedger::new("2026-07-28");
        let decision = Decision {
            symbol: "BTCUSDT".to_string(),
            action: Action::PartialCloseLong,
            close_ratio: 1.0,
            ..Decision::default()
        };
        let log = dispatch(&decision, &mut ledger, &ctx).await;
        assert_eq!(log.status, "REJECTED");
    }
}
