// filters.rs — Filters & Rounding (C16)
//
// Symbol-level tick/step/min-notional cache with a reader/writer TTL
// discipline, generalized from the teacher's per-endpoint 2-second response
// caches in `exchange::LiveExchange` (`cached_balance`, `cached_positions`,
// `cached_mids`, `cached_open_orders`): many readers see a stale-but-
// consistent snapshot, one writer refreshes on miss.
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::exchange::{ExchangeAdapter, ExchangeError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolFilters {
    pub tick_size: f64,
    pub step_size: f64,
    pub min_notional: f64,
}

impl Default for SymbolFilters {
    fn default() -> Self {
        Self { tick_size: 0.01, step_size: 0.001, min_notional: 5.0 }
    }
}

pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    (price / tick).round() * tick
}

pub fn round_to_step(qty: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return qty;
    }
    (qty / step).round() * step
}

const DEFAULT_TTL: Duration = Duration::from_secs(3_600);

pub struct FiltersCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (SymbolFilters, Instant)>>,
}

impl Default for FiltersCache {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL, entries: RwLock::new(HashMap::new()) }
    }
}

impl FiltersCache {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }

    /// Returns a cached, possibly-stale snapshot if present and within TTL.
    /// Many callers can read concurrently; only a miss takes the write path.
    pub async fn get(&self, symbol: &str, adapter: &dyn ExchangeAdapter) -> Result<SymbolFilters, ExchangeError> {
        if let Some((filters, fetched_at)) = self.entries.read().await.get(symbol) {
            if fetched_at.elapsed() < self.ttl {
                return Ok(*filters);
            }
        }
        let filters = adapter.get_symbol_filters(symbol).await?;
        self.entries.write().await.insert(symbol.to_string(), (filters, Instant::now()));
        Ok(filters)
    }

    pub async fn invalidate(&self, symbol: &str) {
        self.entries.write().await.remove(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_tick_is_idempotent() {
        let p = round_to_tick(100.0137, 0.01);
        assert_eq!(round_to_tick(p, 0.01), p);
    }

    #[test]
    fn round_to_tick_zero_or_negative_is_identity() {
        assert_eq!(round_to_tick(123.456, 0.0), 123.456);
        assert_eq!(round_to_tick(123.456, -1.0), 123.456);
    }

    #[test]
    fn round_to_step_is_idempotent() {
        let q = round_to_step(1.23456, 0.001);
        assert_eq!(round_to_step(q, 0.001), q);
    }

    #[test]
    fn round_to_step_zero_or_negative_is_identity() {
        assert_eq!(round_to_step(7.777, 0.0), 7.777);
        assert_eq!(round_to_step(7.777, -0.5), 7.777);
    }
}
