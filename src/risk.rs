// risk.rs — global risk circuit breaker (supplemented, §10/§6.6)
//
// Not a named [MODULE] in the distilled spec, but the control loop's
// `stop_until_ms` gate (§4.10 step 1) and the `max_daily_loss`/
// `max_drawdown` config keys (§6.6) only make sense backed by something
// that tracks start-of-day balance and a halt timer — generalized from the
// teacher's `RiskManager`/`RiskState` pair in `risk.rs`, with `Utc::now()`
// replaced by the injected `Clock` port so halts are deterministic in tests.
use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::ports::Clock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskConfig {
    pub btc_eth_leverage: f64,
    pub altcoin_leverage: f64,
    pub max_daily_loss: f64,
    pub max_drawdown: f64,
    /// Minutes after UTC midnight at which new opens are halted for the
    /// rest of the day (e.g. 1380 = 23:00).
    pub stop_trading_time_minutes: u32,
    pub is_cross_margin: bool,
    pub initial_balance: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            btc_eth_leverage: 10.0,
            altcoin_leverage: 5.0,
            max_daily_loss: 0.05,
            max_drawdown: 0.15,
            stop_trading_time_minutes: 1380,
            is_cross_margin: true,
            initial_balance: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskState {
    pub start_of_day_balance: f64,
    pub last_day_reset_ms: u64,
    pub consecutive_loss_count: u32,
    pub halt_until_ms: Option<u64>,
}

pub struct RiskManager {
    config: RiskConfig,
    state: RiskState,
}

impl RiskManager {
    pub fn new(config: RiskConfig, current_balance: f64, now_ms: u64) -> Self {
        Self { config, state: RiskState { start_of_day_balance: current_balance, last_day_reset_ms: now_ms, consecutive_loss_count: 0, halt_until_ms: None } }
    }

    pub fn state(&self) -> RiskState {
        self.state
    }

    pub fn restore(&mut self, state: RiskState) {
        self.state = state;
    }

    /// §4.10 step 1: `if stop_until_ms > now, skip`, plus the daily
    /// time-of-day cutoff (`stop_trading_time_minutes` past UTC midnight).
    pub fn can_trade(&self, now_ms: u64) -> bool {
        if let Some(until) = self.state.halt_until_ms {
            if until > now_ms {
                return false;
            }
        }
        minutes_since_midnight(now_ms) < self.config.stop_trading_time_minutes as u64
    }

    /// Rolls the start-of-day balance forward when `today` differs from the
    /// day the last reset happened on, per the loop's day-rollover check
    /// (§4.10 step 2).
    pub fn roll_day_if_needed(&mut self, day_changed: bool, current_balance: f64, now_ms: u64) {
        if day_changed {
            self.state.start_of_day_balance = current_balance;
            self.state.last_day_reset_ms = now_ms;
        }
    }

    pub fn update_trade_result(&mut self, pnl: f64, current_balance: f64, clock: &dyn Clock) {
        if pnl < 0.0 {
            self.state.consecutive_loss_count += 1;
        } else {
            self.state.consecutive_loss_count = 0;
        }
        self.check_circuit_breakers(current_balance, clock.now_ms());
    }

    fn check_circuit_breakers(&mut self, current_balance: f64, now_ms: u64) {
        let daily_loss_pct = (self.state.start_of_day_balance - current_balance) / self.state.start_of_day_balance.max(1e-9);
        if daily_loss_pct > self.config.max_daily_loss {
            error!("[RISK] daily loss {:.2}% exceeds max_daily_loss {:.2}%, halting until day rollover", daily_loss_pct * 100.0, self.config.max_daily_loss * 100.0);
            self.state.halt_until_ms = Some(next_utc_midnight_ms(now_ms));
        }
        if daily_loss_pct > self.config.max_drawdown {
            error!("[RISK] drawdown {:.2}% exceeds max_drawdown {:.2}%, halting until day rollover", daily_loss_pct * 100.0, self.config.max_drawdown * 100.0);
            self.state.halt_until_ms = Some(next_utc_midnight_ms(now_ms));
        }
        if self.state.consecutive_loss_count >= 5 {
            warn!("[RISK] {} consecutive losses, halting for 1 hour", self.state.consecutive_loss_count);
            self.state.halt_until_ms = Some(now_ms + 60 * 60 * 1000);
            self.state.consecutive_loss_count = 0;
        }
    }

    pub fn leverage_for(&self, symbol: &str) -> f64 {
        if symbol.starts_with("BTC") || symbol.starts_with("ETH") {
            self.config.btc_eth_leverage
        } else {
            self.config.altcoin_leverage
        }
    }
}

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

fn next_utc_midnight_ms(now_ms: u64) -> u64 {
    (now_ms / DAY_MS + 1) * DAY_MS
}

fn minutes_since_midnight(now_ms: u64) -> u64 {
    (now_ms % DAY_MS) / 60_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;

    #[test]
    fn daily_loss_breach_halts_until_next_day() {
        let mut risk = RiskManager::new(RiskConfig::default(), 10_000.0, 0);
        let clock = FixedClock::new(1_000);
        risk.update_trade_result(-600.0, 9_400.0, &clock);
        assert!(!risk.can_trade(1_000));
        assert!(risk.can_trade(DAY_MS + 1));
    }

    #[test]
    fn consecutive_losses_trigger_one_hour_halt() {
        let mut risk = RiskManager::new(RiskConfig::default(), 10_000.0, 0);
        let clock = FixedClock::new(0);
        for _ in 0..5 {
            risk.update_trade_result(-1.0, 9_999.0, &clock);
        }
        assert!(!risk.can_trade(0));
        assert!(risk.can_trade(60 * 60 * 1000 + 1));
    }

    #[test]
    fn stop_trading_time_halts_new_opens_after_cutoff() {
        let config = RiskConfig { stop_trading_time_minutes: 60, ..RiskConfig::default() };
        let risk = RiskManager::new(config, 10_000.0, 0);
        assert!(risk.can_trade(30 * 60_000));
        assert!(!risk.can_trade(61 * 60_000));
        // Rolls back into the trading window the next day.
        assert!(risk.can_trade(DAY_MS + 30 * 60_000));
    }

    #[test]
    fn leverage_differs_for_btc_eth_vs_altcoins() {
        let risk = RiskManager::new(RiskConfig::default(), 10_000.0, 0);
        assert_eq!(risk.leverage_for("BTCUSDT"), risk.config.btc_eth_leverage);
        assert_eq!(risk.leverage_for("DOGEUSDT"), risk.config.altcoin_leverage);
    }
}
