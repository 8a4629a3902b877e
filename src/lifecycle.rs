// lifecycle.rs — Limit-Order Lifecycle Manager (C7)
//
// Two surfaces: per-cycle sync of the pending-order registry, and the
// single-call place/poll/cancel/retry state machine used by limit opens.
// Grounded on the teacher's order-tracking poll loop in `execution.rs`
// (place, poll on an interval, cancel-on-timeout, retry with a fresh
// price) generalized to the attempt-indexed `ExecutionReport` and the
// registry-sync half this spec adds (§4.4).
use log::{info, warn};
use std::time::Duration;

use crate::exchange::{ExchangeAdapter, OrderStatus};
use crate::gate::Microstructure;
use crate::ledger::PositionLedger;
use crate::pricer::{self, PricingReason};
use crate::ports::Clock;
use crate::record::ExecutionReport;
use crate::snapshot::MarketSnapshotProvider;
use crate::types::{OrderSide, PositionSide};

#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    pub wait_seconds: u64,
    pub max_retries: u32,
    pub poll_interval_ms: u64,
    pub cancel_on_partial_fill: bool,
    pub post_only_when_limit_only: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            wait_seconds: 20,
            max_retries: 2,
            poll_interval_ms: 1_000,
            cancel_on_partial_fill: false,
            post_only_when_limit_only: true,
        }
    }
}

fn order_side_for(side: PositionSide) -> OrderSide {
    match side {
        PositionSide::Long => OrderSide::Buy,
        PositionSide::Short => OrderSide::Sell,
    }
}

/// Per-cycle sync of the pending-order registry (§4.4a). For each pending
/// entry whose order_id no longer shows up in the open-orders list, decides
/// fill vs cancel by checking whether a matching position now exists.
pub async fn sync_pending_orders(ledger: &mut PositionLedger, adapter: &dyn ExchangeAdapter, clock: &dyn Clock) {
    let keys: Vec<_> = ledger.pending.keys().cloned().collect();
    for key in keys {
        let (symbol, side) = key.clone();
        let order_id = match ledger.pending.get(&key) {
            Some(o) => o.order_id.clone(),
            None => continue,
        };

        let still_open = match adapter.get_open_orders(&symbol).await {
            Ok(orders) => orders.iter().any(|o| o.order_id == order_id),
            Err(e) => {
                warn!("[LIFECYCLE] sync: get_open_orders failed for {}: {}", symbol, e);
                continue;
            }
        };
        if still_open {
            continue;
        }

        let positions = match adapter.get_positions().await {
            Ok(p) => p,
            Err(e) => {
                warn!("[LIFECYCLE] sync: get_positions failed for {}: {}", symbol, e);
                continue;
            }
        };
        let filled = positions.iter().any(|p| p.symbol == symbol && p.side == side);

        if filled {
            let order = ledger.pending.get(&key).cloned().unwrap();
            let _ = adapter.set_stop_loss(&symbol, side, 0.0, order.stop_loss).await;
            let _ = adapter.set_take_profit(&symbol, side, 0.0, order.tp3).await;
            info!("[LIFECYCLE] {} {} pending order {} filled, promoting to position", symbol, side, order_id);
            ledger.promote_pending_to_position(key.clone(), clock.now_ms());
        } else {
            info!("[LIFECYCLE] {} {} pending order {} vanished without a fill, treating as cancelled/expired", symbol, side, order_id);
            ledger.purge_pending(&key);
            ledger.daily_pair_trades.decrement(&symbol);
        }
    }
}

/// Single-call place->poll->timeout->cancel->reprice->retry state machine
/// (§4.4b). `qty` is rounded to the venue's step size by the caller.
pub async fn run_lifecycle(
    adapter: &dyn ExchangeAdapter,
    snapshot: &dyn MarketSnapshotProvider,
    clock: &dyn Clock,
    config: &LifecycleConfig,
    symbol: &str,
    side: PositionSide,
    qty: f64,
    initial_limit: f64,
    initial_reason: PricingReason,
    tick_size: f64,
) -> ExecutionReport {
    let start_ms = clock.now_ms();
    let mut limit_price = initial_limit;
    let mut reason = initial_reason;

    let max_attempts = config.max_retries + 1;
    for attempt in 1..=max_attempts {
        let handle = match side {
            PositionSide::Long => adapter.limit_open_long(symbol, qty, 1.0, limit_price, 0.0).await,
            PositionSide::Short => adapter.limit_open_short(symbol, qty, 1.0, limit_price, 0.0).await,
        };
        let order_id = match handle {
            Ok(h) => h.order_id,
            Err(e) => {
                let end_ms = clock.now_ms();
                return ExecutionReport {
                    order_id: String::new(),
                    symbol: symbol.to_string(),
                    side,
                    attempt_index: attempt,
                    limit_price,
                    pricing_reason: reason.as_str().to_string(),
                    quantity: qty,
                    filled_quantity: 0.0,
                    avg_fill_price: 0.0,
                    status: "ORDER_FAILED".to_string(),
                    start_ms,
                    end_ms,
                    duration_ms: end_ms.saturating_sub(start_ms),
                    error: Some(e.to_string()),
                };
            }
        };

        let deadline_ms = clock.now_ms() + config.wait_seconds * 1_000;
        loop {
            let report = adapter.get_order_status(symbol, &order_id).await;
            match report {
                Ok(r) => match r.status {
                    OrderStatus::Filled => {
                        let end_ms = clock.now_ms();
                        return ExecutionReport {
                            order_id,
                            symbol: symbol.to_string(),
                            side,
                            attempt_index: attempt,
                            limit_price,
                            pricing_reason: reason.as_str().to_string(),
                            quantity: qty,
                            filled_quantity: r.executed_qty,
                            avg_fill_price: r.avg_price,
                            status: "FILLED".to_string(),
                            start_ms,
                            end_ms,
                            duration_ms: end_ms.saturating_sub(start_ms),
                            error: None,
                        };
                    }
                    OrderStatus::PartiallyFilled => {
                        if config.cancel_on_partial_fill {
                            let _ = adapter.cancel_order(symbol, &order_id).await;
                            let end_ms = clock.now_ms();
                            return ExecutionReport {
                                order_id,
                                symbol: symbol.to_string(),
                                side,
                                attempt_index: attempt,
                                limit_price,
                                pricing_reason: reason.as_str().to_string(),
                                quantity: qty,
                                filled_quantity: r.executed_qty,
                                avg_fill_price: r.avg_price,
                                status: "PARTIALLY_FILLED".to_string(),
                                start_ms,
                                end_ms,
                                duration_ms: end_ms.saturating_sub(start_ms),
                                error: None,
                            };
                        }
                    }
                    OrderStatus::Canceled | OrderStatus::Expired => break,
                    OrderStatus::New => {}
                },
                Err(e) => {
                    warn!("[LIFECYCLE] {} {} get_order_status failed: {}", symbol, side, e);
                }
            }

            if clock.now_ms() >= deadline_ms {
                let _ = adapter.cancel_order(symbol, &order_id).await;
                info!("[LIFECYCLE] {} {} attempt {} timed out, cancelling and repricing", symbol, side, attempt);
                break;
            }

            tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
        }

        if attempt < max_attempts {
            if let Some(data) = snapshot.get(symbol).await {
                let micro: Microstructure = data.microstructure;
                let (new_price, new_reason) = pricer::price_limit(Some(order_side_for(side)), Some(&micro), tick_size);
                if new_price > 0.0 {
                    limit_price = new_price;
                    reason = new_reason;
                }
            }
        }
    }

    let end_ms = clock.now_ms();
    ExecutionReport {
        order_id: String::new(),
        symbol: symbol.to_string(),
        side,
        attempt_index: max_attempts,
        limit_price,
        pricing_reason: reason.as_str().to_string(),
        quantity: qty,
        filled_quantity: 0.0,
        avg_fill_price: 0.0,
        status: "RETRIES_EXHAUSTED".to_string(),
        start_ms,
        end_ms,
        duration_ms: end_ms.saturating_sub(start_ms),
        error: None,
    }
}
