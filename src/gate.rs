// gate.rs — Execution Gate (C3)
//
// Pure function of microstructure + planned notional -> an execution mode.
// Ported from the teacher's regime-governor style (market_maker.rs
// RegimeGovernor::update): a chain of threshold checks, first match wins,
// each branch returning a stable reason string that doubles as a test
// fixture and a log line.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    MarketOk,
    LimitPreferred,
    LimitOnly,
    NoTrade,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::MarketOk => "market_ok",
            ExecutionMode::LimitPreferred => "limit_preferred",
            ExecutionMode::LimitOnly => "limit_only",
            ExecutionMode::NoTrade => "no_trade",
        }
    }
}

/// Per-symbol microstructure snapshot (best bid/ask, depth, spread).
#[derive(Debug, Clone, Copy, Default)]
pub struct Microstructure {
    pub best_bid: f64,
    pub best_ask: f64,
    pub best_bid_qty: f64,
    pub best_ask_qty: f64,
    /// Notional resting at the best level (whichever side is relevant).
    pub best_notional: f64,
    /// Notional resting in the top 10 levels, 0 if unavailable.
    pub depth_notional_10: f64,
    pub depth_ratio: f64,
    pub spread_bps: f64,
    pub min_notional: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub max_spread_bps_no_trade: f64,
    pub max_spread_bps_limit_only: f64,
    pub max_spread_bps_limit_preferred: f64,
    pub min_depth_ratio_abs: f64,
    pub max_depth_ratio_abs: f64,
    pub min_best_notional_limit_only: f64,
    pub min_best_notional_limit_preferred: f64,
    pub min_depth10_notional_limit_only: f64,
    pub min_depth10_notional_limit_preferred: f64,
    pub notional_multiplier_limit_only: f64,
    pub notional_multiplier_no_trade: f64,
    pub default_mode_on_missing: ExecutionMode,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_spread_bps_no_trade: 60.0,
            max_spread_bps_limit_only: 25.0,
            max_spread_bps_limit_preferred: 10.0,
            min_depth_ratio_abs: 0.25,
            max_depth_ratio_abs: 4.0,
            min_best_notional_limit_only: 2_000.0,
            min_best_notional_limit_preferred: 5_000.0,
            min_depth10_notional_limit_only: 10_000.0,
            min_depth10_notional_limit_preferred: 25_000.0,
            notional_multiplier_limit_only: 1.5,
            notional_multiplier_no_trade: 4.0,
            default_mode_on_missing: ExecutionMode::LimitOnly,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub mode: ExecutionMode,
    pub reason: String,
    pub ts_ms: u64,
}

/// Source of the effective notional used for the limit_only/limit_preferred
/// checks: depth-10 if it's available and positive, else the best-level
/// notional. Recorded because the reason string is parsed by tests.
fn effective_notional(micro: &Microstructure) -> (f64, &'static str) {
    if micro.depth_notional_10 > 0.0 {
        (micro.depth_notional_10, "depth10")
    } else {
        (micro.min_notional, "best")
    }
}

pub fn evaluate(config: &GateConfig, micro: Option<&Microstructure>, planned_notional: f64, now_ms: u64) -> GateVerdict {
    let micro = match micro {
        None => {
            return GateVerdict {
                mode: config.default_mode_on_missing,
                reason: "microstructure missing".to_string(),
                ts_ms: now_ms,
            };
        }
        Some(m) => m,
    };

    let (effective, source) = effective_notional(micro);

    if micro.spread_bps >= config.max_spread_bps_no_trade
        || planned_notional > config.notional_multiplier_no_trade * micro.min_notional
    {
        return GateVerdict {
            mode: ExecutionMode::NoTrade,
            reason: format!(
                "spread_bps={:.2} min_notional={:.2} planned_notional={:.2} no_trade_threshold_breached",
                micro.spread_bps, micro.min_notional, planned_notional
            ),
            ts_ms: now_ms,
        };
    }

    let min_effective_limit_only = if source == "depth10" {
        config.min_depth10_notional_limit_only
    } else {
        config.min_best_notional_limit_only
    };

    if micro.spread_bps >= config.max_spread_bps_limit_only
        || micro.depth_ratio > config.max_depth_ratio_abs
        || micro.depth_ratio < config.min_depth_ratio_abs
        || planned_notional > config.notional_multiplier_limit_only * effective
        || effective < min_effective_limit_only
    {
        return GateVerdict {
            mode: ExecutionMode::LimitOnly,
            reason: format!(
                "spread_bps={:.2} depth_ratio={:.3} effective_notional={:.2} source={} limit_only_threshold_breached",
                micro.spread_bps, micro.depth_ratio, effective, source
            ),
            ts_ms: now_ms,
        };
    }

    let min_effective_limit_preferred = if source == "depth10" {
        config.min_depth10_notional_limit_preferred
    } else {
        config.min_best_notional_limit_preferred
    };

    if micro.spread_bps >= config.max_spread_bps_limit_preferred || effective < min_effective_limit_preferred {
        return GateVerdict {
            mode: ExecutionMode::LimitPreferred,
            reason: format!(
                "spread_bps={:.2} effective_notional={:.2} source={} limit_preferred_threshold_breached",
                micro.spread_bps, effective, source
            ),
            ts_ms: now_ms,
        };
    }

    GateVerdict {
        mode: ExecutionMode::MarketOk,
        reason: "within market thresholds".to_string(),
        ts_ms: now_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_book() -> Microstructure {
        Microstructure {
            best_bid: 100.00,
            best_ask: 100.05,
            best_bid_qty: 50.0,
            best_ask_qty: 50.0,
            best_notional: 50_000.0,
            depth_notional_10: 200_000.0,
            depth_ratio: 1.0,
            spread_bps: 5.0,
            min_notional: 5_000.0,
        }
    }

    #[test]
    fn missing_microstructure_uses_default_mode() {
        let config = GateConfig::default();
        let verdict = evaluate(&config, None, 1_000.0, 0);
        assert_eq!(verdict.mode, config.default_mode_on_missing);
        assert!(verdict.reason.contains("missing"));
    }

    #[test]
    fn tight_book_small_order_is_market_ok() {
        let config = GateConfig::default();
        let micro = tight_book();
        let verdict = evaluate(&config, Some(&micro), 1_000.0, 0);
        assert_eq!(verdict.mode, ExecutionMode::MarketOk);
    }

    #[test]
    fn wide_spread_forces_no_trade() {
        let config = GateConfig::default();
        let mut micro = tight_book();
        micro.spread_bps = 100.0;
        let verdict = evaluate(&config, Some(&micro), 1_000.0, 0);
        assert_eq!(verdict.mode, ExecutionMode::NoTrade);
    }

    #[test]
    fn huge_planned_notional_vs_min_notional_is_no_trade() {
        let config = GateConfig::default();
        let micro = tight_book();
        // min_notional is 5000, so 4x+ that (20_000) crosses no_trade.
        let verdict = evaluate(&config, Some(&micro), 25_000.0, 0);
        assert_eq!(verdict.mode, ExecutionMode::NoTrade);
    }

    #[test]
    fn thin_depth10_forces_limit_only() {
        let config = GateConfig::default();
        let mut micro = tight_book();
        micro.depth_notional_10 = 1_000.0; // below min_depth10_notional_limit_only
        let verdict = evaluate(&config, Some(&micro), 500.0, 0);
        assert_eq!(verdict.mode, ExecutionMode::LimitOnly);
        assert!(verdict.reason.contains("source=depth10"));
    }

    #[test]
    fn s1_scenario_limit_only_from_thin_best_notional() {
        // S1: configure thresholds so min_notional=5000 yields limit_only.
        let config = GateConfig {
            min_best_notional_limit_only: 10_000.0,
            ..GateConfig::default()
        };
        let mut micro = tight_book();
        micro.depth_notional_10 = 0.0; // force fallback to "best" source
        micro.min_notional = 5_000.0;
        let verdict = evaluate(&config, Some(&micro), 1_000.0, 0);
        assert_eq!(verdict.mode, ExecutionMode::LimitOnly);
        assert!(verdict.reason.contains("source=best"));
    }

    #[test]
    fn depth_ratio_out_of_band_is_limit_only() {
        let config = GateConfig::default();
        let mut micro = tight_book();
        micro.depth_ratio = 10.0;
        let verdict = evaluate(&config, Some(&micro), 500.0, 0);
        assert_eq!(verdict.mode, ExecutionMode::LimitOnly);
    }
}
