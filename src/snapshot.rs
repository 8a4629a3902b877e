// snapshot.rs — Market Snapshot Provider (C2)
//
// Per-symbol view of price, microstructure and risk metrics, grounded on
// the teacher's `market_maker::MarketState` assembly step — the place that
// used to stitch together order-book state and an indicator feed now
// stitches together `Microstructure` and `RiskMetrics` for the decision
// pipeline instead. The indicator math itself (ATR, volatility
// classification) is out of scope (§1) — the provider is an interface and
// `SimSnapshotProvider` is a fixture, not an indicator engine.
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::gate::{self, GateConfig, Microstructure};
use crate::types::{Symbol, VolatilityLevel};

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskMetrics {
    pub atr14_pct_of_price: f64,
    pub volatility_level: VolatilityLevel,
}

#[derive(Debug, Clone)]
pub struct MarketData {
    pub symbol: Symbol,
    pub current_price: f64,
    pub microstructure: Microstructure,
    pub risk_metrics: RiskMetrics,
    /// Execution-gate verdict at ambient planned notional 0 (§6.2).
    pub execution: gate::GateVerdict,
}

#[async_trait]
pub trait MarketSnapshotProvider: Send + Sync {
    async fn get(&self, symbol: &str) -> Option<MarketData>;
}

#[derive(Debug, Clone, Default)]
struct Fixture {
    current_price: f64,
    microstructure: Microstructure,
    risk_metrics: RiskMetrics,
}

/// In-memory provider used by tests and as the default runtime fixture —
/// real indicator computation and order-book aggregation are out of scope.
pub struct SimSnapshotProvider {
    gate_config: GateConfig,
    fixtures: RwLock<HashMap<Symbol, Fixture>>,
}

impl SimSnapshotProvider {
    pub fn new(gate_config: GateConfig) -> Self {
        Self { gate_config, fixtures: RwLock::new(HashMap::new()) }
    }

    pub async fn set_fixture(
        &self,
        symbol: &str,
        current_price: f64,
        microstructure: Microstructure,
        risk_metrics: RiskMetrics,
    ) {
        self.fixtures
            .write()
            .await
            .insert(symbol.to_string(), Fixture { current_price, microstructure, risk_metrics });
    }
}

#[async_trait]
impl MarketSnapshotProvider for SimSnapshotProvider {
    async fn get(&self, symbol: &str) -> Option<MarketData> {
        let guard = self.fixtures.read().await;
        let fixture = guard.get(symbol)?;
        let execution = gate::evaluate(&self.gate_config, Some(&fixture.microstructure), 0.0, 0);
        Some(MarketData {
            symbol: symbol.to_string(),
            current_price: fixture.current_price,
            microstructure: fixture.microstructure,
            risk_metrics: fixture.risk_metrics,
            execution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_symbol_returns_none() {
        let provider = SimSnapshotProvider::new(GateConfig::default());
        assert!(provider.get("BTCUSDT").await.is_none());
    }

    #[tokio::test]
    async fn fixture_round_trips_with_ambient_gate_verdict() {
        let provider = SimSnapshotProvider::new(GateConfig::default());
        let micro = Microstructure {
            best_bid: 100.0,
            best_ask: 100.05,
            spread_bps: 5.0,
            min_notional: 5_000.0,
            depth_notional_10: 200_000.0,
            depth_ratio: 1.0,
            ..Microstructure::default()
        };
        provider
            .set_fixture("BTCUSDT", 100.02, micro, RiskMetrics { atr14_pct_of_price: 1.2, volatility_level: VolatilityLevel::Low })
            .await;
        let data = provider.get("BTCUSDT").await.unwrap();
        assert_eq!(data.current_price, 100.02);
        assert_eq!(data.risk_metrics.volatility_level, VolatilityLevel::Low);
        assert_eq!(data.execution.mode, gate::ExecutionMode::MarketOk);
    }
}
