// pricer.rs — Limit Pricer (C4)
//
// Pure function of side + microstructure + tick size -> a maker price.
// Grounded on the teacher's `market_maker::snap_to_tick` rounding helper,
// generalized to the spec's maker/inside-pricing decision tree.
use crate::filters::round_to_tick;
use crate::gate::Microstructure;
use crate::types::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingReason {
    BestBidMaker,
    BestAskMaker,
    BestBidPlusOneTickInside,
    BestAskMinusOneTickInside,
    InvalidSide,
    MicrostructureUnavailable,
}

impl PricingReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PricingReason::BestBidMaker => "best_bid_maker",
            PricingReason::BestAskMaker => "best_ask_maker",
            PricingReason::BestBidPlusOneTickInside => "best_bid_plus_one_tick_inside",
            PricingReason::BestAskMinusOneTickInside => "best_ask_minus_one_tick_inside",
            PricingReason::InvalidSide => "invalid_side",
            PricingReason::MicrostructureUnavailable => "microstructure_unavailable",
        }
    }
}

/// Returns `(price, reason)`. Invalid side or missing microstructure return
/// an explicit `(0.0, reason)` rather than panicking — callers treat a zero
/// price as "do not place this order".
pub fn price_limit(side: Option<OrderSide>, micro: Option<&Microstructure>, tick_size: f64) -> (f64, PricingReason) {
    let side = match side {
        Some(s) => s,
        None => return (0.0, PricingReason::InvalidSide),
    };
    let micro = match micro {
        Some(m) => m,
        None => return (0.0, PricingReason::MicrostructureUnavailable),
    };

    let spread = micro.best_ask - micro.best_bid;
    let can_improve = tick_size > 0.0 && spread >= 2.0 * tick_size;

    let (raw_price, reason) = match side {
        OrderSide::Buy => {
            if can_improve {
                let inside = micro.best_bid + tick_size;
                if inside < micro.best_ask {
                    (inside, PricingReason::BestBidPlusOneTickInside)
                } else {
                    (micro.best_bid, PricingReason::BestBidMaker)
                }
            } else {
                (micro.best_bid, PricingReason::BestBidMaker)
            }
        }
        OrderSide::Sell => {
            if can_improve {
                let inside = micro.best_ask - tick_size;
                if inside > micro.best_bid {
                    (inside, PricingReason::BestAskMinusOneTickInside)
                } else {
                    (micro.best_ask, PricingReason::BestAskMaker)
                }
            } else {
                (micro.best_ask, PricingReason::BestAskMaker)
            }
        }
    };

    (round_to_tick(raw_price, tick_size), reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn micro(bid: f64, ask: f64) -> Microstructure {
        Microstructure { best_bid: bid, best_ask: ask, ..Microstructure::default() }
    }

    #[test]
    fn s1_scenario_inside_improvement_for_buy() {
        // bid=100.00 ask=100.05 tick=0.01 -> spread is exactly 5 ticks >= 2 ticks
        let m = micro(100.00, 100.05);
        let (price, reason) = price_limit(Some(OrderSide::Buy), Some(&m), 0.01);
        assert_eq!(reason, PricingReason::BestBidPlusOneTickInside);
        assert!((price - 100.01).abs() < 1e-9);
    }

    #[test]
    fn sell_side_mirrors_buy() {
        let m = micro(100.00, 100.05);
        let (price, reason) = price_limit(Some(OrderSide::Sell), Some(&m), 0.01);
        assert_eq!(reason, PricingReason::BestAskMinusOneTickInside);
        assert!((price - 100.04).abs() < 1e-9);
    }

    #[test]
    fn narrow_spread_falls_back_to_maker() {
        // spread is 1 tick, not >= 2 ticks, so no inside improvement.
        let m = micro(100.00, 100.01);
        let (price, reason) = price_limit(Some(OrderSide::Buy), Some(&m), 0.01);
        assert_eq!(reason, PricingReason::BestBidMaker);
        assert!((price - 100.00).abs() < 1e-9);
    }

    #[test]
    fn crossing_inside_price_falls_back_to_maker() {
        // Pathological book where best_bid + tick would equal/exceed best_ask.
        let m = micro(100.00, 100.02);
        let (price, reason) = price_limit(Some(OrderSide::Buy), Some(&m), 0.02);
        assert_eq!(reason, PricingReason::BestBidMaker);
        assert!((price - 100.00).abs() < 1e-9);
    }

    #[test]
    fn missing_microstructure_returns_zero() {
        let (price, reason) = price_limit(Some(OrderSide::Buy), None, 0.01);
        assert_eq!(price, 0.0);
        assert_eq!(reason, PricingReason::MicrostructureUnavailable);
    }

    #[test]
    fn invalid_side_returns_zero() {
        let m = micro(100.0, 100.05);
        let (price, reason) = price_limit(None, Some(&m), 0.01);
        assert_eq!(price, 0.0);
        assert_eq!(reason, PricingReason::InvalidSide);
    }
}
