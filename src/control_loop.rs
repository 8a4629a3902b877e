// control_loop.rs — Control Loop (C13)
//
// Fixed-cadence driver wiring every other module together into one cycle.
// Grounded on the teacher's top-level `main.rs` tick (`tokio::time::interval`
// driving reconcile -> quote -> execute -> log each iteration), generalized
// to the thirteen-step cycle this spec describes (§4.10): skip check,
// day rollover, context build, reconcile, lifecycle sync, ladder, PreLLM
// gate, prompt+LLM, sanitize, sort, validate+dispatch, persist.
use std::time::Duration;

use log::{info, warn};

use crate::config::EngineConfig;
use crate::decision::{self, Action, Decision};
use crate::exchange::ExchangeAdapter;
use crate::executor::{self, ExecutorContext};
use crate::filters::FiltersCache;
use crate::ladder;
use crate::ledger::PositionLedger;
use crate::lifecycle;
use crate::llm::LlmPort;
use crate::log_sink::{DecisionLogSink, FeedbackAction};
use crate::ports::Clock;
use crate::prellm;
use crate::reconciler;
use crate::record::{CycleRecord, ExecutionLogEntry, Status};
use crate::risk::RiskManager;
use crate::snapshot::MarketSnapshotProvider;
use crate::validator::{self, ValidatorContext};

pub struct ControlLoop<'a> {
    pub config: &'a EngineConfig,
    pub adapter: &'a dyn ExchangeAdapter,
    pub snapshot: &'a dyn MarketSnapshotProvider,
    pub llm: &'a dyn LlmPort,
    pub log_sink: &'a dyn DecisionLogSink,
    pub clock: &'a dyn Clock,
    pub filters: &'a FiltersCache,
    pub candidate_symbols: Vec<String>,
    /// Minted once at process startup; stamped onto every `CycleRecord` so
    /// records from the same run can be grouped (§10).
    pub session_id: String,
}

/// Builds the system/user prompt pair from the day's context. The prompt
/// template itself is opaque to the engine (§1 Non-goals); what matters here
/// is that the user prompt carries enough structured context for the model
/// to reason over, the way the teacher's quoting loop assembles its book
/// snapshot before logging it.
fn compose_prompts(config: &EngineConfig, candidate_symbols: &[String], ledger: &PositionLedger) -> (String, String) {
    let system_prompt = format!("You are a disciplined perpetual-futures trading assistant using the '{}' policy.", config.system_prompt_template);
    let open_positions: Vec<_> = ledger.first_seen_ms.keys().map(|(s, side)| format!("{s}:{side}")).collect();
    let pending: Vec<_> = ledger.pending.keys().map(|(s, side)| format!("{s}:{side}")).collect();
    let user_prompt = serde_json::json!({
        "candidates": candidate_symbols,
        "open_positions": open_positions,
        "pending_orders": pending,
    })
    .to_string();
    (system_prompt, user_prompt)
}

impl<'a> ControlLoop<'a> {
    /// Runs exactly one cycle. `risk` and `ledger` are owned by the caller
    /// across cycles (the loop's only persistent state besides the
    /// exchange itself); `cycle_number` and `today` drive day-rollover.
    pub async fn run_cycle(
        &self,
        ledger: &mut PositionLedger,
        risk: &mut RiskManager,
        cycle_number: u64,
        today: &str,
        day_changed: bool,
    ) -> CycleRecord {
        let now_ms = self.clock.now_ms();
        let mut record = CycleRecord::new(cycle_number, now_ms as i64);
        record.session_id = self.session_id.clone();
        record.candidate_symbols = self.candidate_symbols.clone();

        // Step 1: global halt check.
        if !risk.can_trade(now_ms) {
            record.status = Status::Warning;
            record.error_message = Some("risk manager halt in effect, skipping cycle".to_string());
            self.log_sink.log_decision(&record).await;
            return record;
        }

        // Step 2: day rollover.
        ledger.daily_pair_trades.roll_day_if_needed(today);
        let current_balance = self.adapter.get_balance().await.ok().and_then(|b| b.get("USDT").copied()).unwrap_or(self.config.risk.initial_balance);
        risk.roll_day_if_needed(day_changed, current_balance, now_ms);

        // Step 3: context build — live positions and cached entry prices.
        let positions = match self.adapter.get_positions().await {
            Ok(p) => p,
            Err(e) => {
                record.status = Status::Error;
                record.error_type = Some("EXCHANGE_UNAVAILABLE".to_string());
                record.error_message = Some(e.to_string());
                self.log_sink.log_decision(&record).await;
                return record;
            }
        };
        for p in &positions {
            ledger.entry_price.insert((p.symbol.clone(), p.side), p.entry_price);
        }
        record.positions_snapshot = serde_json::to_value(&positions).unwrap_or_default();
        record.account_snapshot = self.adapter.get_balance().await.map(|b| serde_json::to_value(b).unwrap_or_default()).unwrap_or_default();

        // Step 4: reconciler — detect vanished positions, classify closes.
        let last_known_mark = |key: &(String, crate::types::PositionSide)| {
            positions.iter().find(|p| &p.symbol == &key.0 && p.side == key.1).map(|p| p.mark_price).unwrap_or(0.0)
        };
        let closes = reconciler::run(ledger, self.adapter, &positions, last_known_mark, now_ms).await;
        for close in &closes {
            info!("[LOOP] reconciled close: {} {} stop_loss={}", close.symbol, close.side, close.was_stop_loss);
            let action = match close.side {
                crate::types::PositionSide::Long => Action::CloseLong,
                crate::types::PositionSide::Short => Action::CloseShort,
            };
            let detail = if close.was_stop_loss { "reconciler-detected stop-loss close".to_string() } else { "reconciler-detected take-profit/orderly close".to_string() };
            record.execution_log.push(ExecutionLogEntry {
                symbol: close.symbol.clone(),
                action: action.as_wire().to_string(),
                status: "RECONCILED".to_string(),
                detail,
                execution_report: None,
                realized_pnl: None,
            });
            record.decisions.push(Decision {
                symbol: close.symbol.clone(),
                action,
                reasoning: format!("synthesised by reconciler, was_stop_loss={}", close.was_stop_loss),
                ..Decision::default()
            });
        }

        // Step 4b: lifecycle sync of the pending-order registry.
        lifecycle::sync_pending_orders(ledger, self.adapter, self.clock).await;

        // Step 5: auto SL/TP ladder pass over live targeted positions.
        let ladder_inputs: Vec<_> = ledger
            .targets
            .keys()
            .filter_map(|key| {
                let pos = positions.iter().find(|p| &p.symbol == &key.0 && p.side == key.1)?;
                Some((key.clone(), pos.entry_price, pos.mark_price, pos.quantity))
            })
            .collect();
        let ladder_events = ladder::run(ledger, self.adapter, &ladder_inputs).await;
        for event in &ladder_events {
            info!("[LOOP] ladder stage {} -> {} for {} {}", event.from_stage, event.to_stage, event.symbol, event.side);
        }

        // Step 6: PreLLM gate partition. `prellm::partition` takes a sync
        // volatility lookup (it's a cheap pre-filter, §4.6), so the
        // per-candidate snapshot volatility is prefetched here.
        let mut volatility_by_symbol = std::collections::HashMap::new();
        for symbol in &self.candidate_symbols {
            if let Some(data) = self.snapshot.get(symbol).await {
                volatility_by_symbol.insert(symbol.clone(), data.risk_metrics.volatility_level);
            }
        }
        let volatility_of = |symbol: &str| volatility_by_symbol.get(symbol).copied();
        let partition = prellm::partition(ledger, &self.candidate_symbols, volatility_of, now_ms);
        record.cooldown_symbols = partition.cooldown.clone();
        record.extreme_symbols = partition.extreme.clone();

        let mut decisions = prellm::synthesize_decisions(ledger, &partition);

        // Step 7: short-circuit the LLM call when nothing is tradeable.
        if partition.allowed.is_empty() {
            record.cooldown_skip_llm = true;
        } else {
            let (system_prompt, user_prompt) = compose_prompts(self.config, &partition.allowed, ledger);
            record.system_prompt = system_prompt.clone();
            record.user_prompt = user_prompt.clone();

            match self.llm.call(&system_prompt, &user_prompt).await {
                Ok(text) => {
                    record.cot_trace = text.clone();
                    record.decisions_json = text.clone();
                    match serde_json::from_str::<Vec<Decision>>(&text) {
                        Ok(mut parsed) => decisions.append(&mut parsed),
                        Err(e) => {
                            record.validation_errors.push(format!("LLM response was not valid decision JSON: {e}"));
                        }
                    }
                }
                Err(e) => {
                    record.status = Status::Error;
                    record.error_type = Some("LLM_CALL_FAILED".to_string());
                    record.error_message = Some(e.to_string());
                    self.log_sink.log_decision(&record).await;
                    return record;
                }
            }
        }

        // Step 8: sanitize every LLM-originated decision.
        for d in decisions.iter_mut() {
            if let Some(note) = decision::sanitize(d) {
                record.validation_errors.push(format!("{}: {}", d.symbol, note));
            }
        }

        // Step 9: close-first dispatch ordering.
        decisions.sort_by_key(|d| d.action.dispatch_priority());

        let gate_config = &self.config.gate;
        let lifecycle_config = &self.config.lifecycle;
        let exec_ctx = ExecutorContext { adapter: self.adapter, snapshot: self.snapshot, filters: self.filters, clock: self.clock, gate_config, lifecycle_config };

        let mut had_rejection = false;
        for mut d in decisions {
            if validator::exceeds_position_cap(ledger, d.action) {
                d.action = Action::Hold;
                d.rejection_reason = Some("position-count cap reached".to_string());
            }

            let market_data = self.snapshot.get(&d.symbol).await;
            let micro = market_data.as_ref().map(|m| &m.microstructure);
            let volatility = market_data.as_ref().map(|m| m.risk_metrics.volatility_level);
            let opposing_live_position = opposing_position_exists(ledger, &d);

            let ctx = ValidatorContext { ledger, gate_config, microstructure: micro, volatility, opposing_live_position, now_ms };
            let survived = validator::validate(&mut d, &ctx);
            if !survived {
                had_rejection = true;
                if let Some(reason) = &d.rejection_reason {
                    record.validation_errors.push(format!("{}: {}", d.symbol, reason));
                }
                record.decisions.push(d);
                continue;
            }

            let was_open_or_close = d.action.is_open() || d.action.is_close();
            let log_entry = executor::dispatch(&d, ledger, &exec_ctx).await;
            if was_open_or_close && log_entry.status == "FILLED" {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            record.execution_log.push(log_entry);
            record.decisions.push(d);
        }

        if record.status == Status::Success && had_rejection {
            record.status = Status::Warning;
        }

        self.log_sink.log_decision(&record).await;

        match self.log_sink.analyze_performance(self.config.monitor.window_size).await.suggested_action {
            FeedbackAction::HaltTrading => warn!("[LOOP] performance monitor suggests halting trading, profit factor has degraded"),
            FeedbackAction::ReduceSize(factor) => info!("[LOOP] performance monitor suggests reducing position size by {:.0}%", factor * 100.0),
            FeedbackAction::None => {}
        }

        record
    }
}

fn opposing_position_exists(ledger: &PositionLedger, decision: &Decision) -> bool {
    let opposite = match decision.action {
        Action::OpenLong | Action::LimitOpenLong => Some(crate::types::PositionSide::Short),
        Action::OpenShort | Action::LimitOpenShort => Some(crate::types::PositionSide::Long),
        _ => None,
    };
    match opposite {
        Some(side) => ledger.first_seen_ms.contains_key(&(decision.symbol.clone(), side)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::exchange::SimExchange;
    use crate::gate::Microstructure;
    use crate::llm::{HttpLlmPort, LlmError};
    use crate::log_sink::FileLogSink;
    use crate::ports::FixedClock;
    use crate::snapshot::{RiskMetrics, SimSnapshotProvider};
    use async_trait::async_trait;
    use std::env;

    struct StubLlm {
        response: String,
    }

    #[async_trait]
    impl LlmPort for StubLlm {
        async fn call(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, LlmError> {
            Ok(self.response.clone())
        }
    }

    fn temp_log_path(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("perp-engine-loop-test-{}-{}.jsonl", name, std::process::id()))
    }

    #[tokio::test]
    async fn cycle_short_circuits_llm_when_all_candidates_cooldown_or_extreme() {
        let adapter = SimExchange::new(10_000.0);
        let snapshot = SimSnapshotProvider::new(crate::gate::GateConfig::default());
        let config = EngineConfig::default();
        let filters = FiltersCache::default();
        let clock = FixedClock::new(0);
        let llm = StubLlm { response: "[]".to_string() };
        let path = temp_log_path("short-circuit");
        let _ = std::fs::remove_file(&path);
        let log_sink = FileLogSink::new(&path);

        let mut ledger = PositionLedger::new("2026-07-28");
        ledger.cooldown.set(("BTCUSDT".to_string(), crate::types::PositionSide::Long), 999_999_999);

        let loop_ = ControlLoop {
            config: &config,
            adapter: &adapter,
            snapshot: &snapshot,
            llm: &llm,
            log_sink: &log_sink,
            clock: &clock,
            filters: &filters,
            candidate_symbols: vec!["BTCUSDT".to_string()],
            session_id: "test-session".to_string(),
        };

        let mut risk = RiskManager::new(config.risk, 10_000.0, 0);
        let record = loop_.run_cycle(&mut ledger, &mut risk, 1, "2026-07-28", false).await;

        assert!(record.cooldown_skip_llm);
        assert_eq!(record.cooldown_symbols, vec!["BTCUSDT".to_string()]);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn halted_risk_manager_skips_the_cycle_entirely() {
        let adapter = SimExchange::new(10_000.0);
        let snapshot = SimSnapshotProvider::new(crate::gate::GateConfig::default());
        let config = EngineConfig::default();
        let filters = FiltersCache::default();
        let clock = FixedClock::new(0);
        let llm = StubLlm { response: "[]".to_string() };
        let path = temp_log_path("halted");
        let _ = std::fs::remove_file(&path);
        let log_sink = FileLogSink::new(&path);

        let mut ledger = PositionLedger::new("2026-07-28");
        let mut risk = RiskManager::new(config.risk, 10_000.0, 0);
        risk.update_trade_result(-1_000.0, 9_000.0, &clock);
        assert!(!risk.can_trade(0));

        let loop_ = ControlLoop {
            config: &config,
            adapter: &adapter,
            snapshot: &snapshot,
            llm: &llm,
            log_sink: &log_sink,
            clock: &clock,
            filters: &filters,
            candidate_symbols: vec!["BTCUSDT".to_string()],
            session_id: "test-session".to_string(),
        };

        let record = loop_.run_cycle(&mut ledger, &mut risk, 1, "2026-07-28", false).await;
        assert_eq!(record.status, Status::Warning);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn open_decision_from_llm_is_dispatched_and_logged() {
        let adapter = SimExchange::new(10_000.0);
        adapter.set_mark_price("ETHUSDT", 50.0);
        let snapshot = SimSnapshotProvider::new(crate::gate::GateConfig::default());
        snapshot
            .set_fixture(
                "ETHUSDT",
                50.0,
                Microstructure { best_bid: 49.99, best_ask: 50.01, spread_bps: 2.0, min_notional: 5_000.0, depth_notional_10: 200_000.0, depth_ratio: 1.0, ..Microstructure::default() },
                RiskMetrics::default(),
            )
            .await;
        let config = EngineConfig::default();
        let filters = FiltersCache::default();
        let clock = FixedClock::new(0);
        let decision_json = serde_json::json!([{
            "symbol": "ETHUSDT",
            "action": "open_long",
            "position_size_usd": 1000.0,
            "leverage": 5.0,
            "stop_loss": 45.0,
            "take_profit": 58.0,
            "tp1": 52.0,
            "tp2": 55.0,
            "tp3": 58.0,
            "reasoning": "grade=S score=900"
        }])
        .to_string();
        let llm = StubLlm { response: decision_json };
        let path = temp_log_path("dispatch");
        let _ = std::fs::remove_file(&path);
        let log_sink = FileLogSink::new(&path);

        let mut ledger = PositionLedger::new("2026-07-28");
        let mut risk = RiskManager::new(config.risk, 10_000.0, 0);

        let loop_ = ControlLoop {
            config: &config,
            adapter: &adapter,
            snapshot: &snapshot,
            llm: &llm,
            log_sink: &log_sink,
            clock: &clock,
            filters: &filters,
            candidate_symbols: vec!["ETHUSDT".to_string()],
            session_id: "test-session".to_string(),
        };

        let record = loop_.run_cycle(&mut ledger, &mut risk, 1, "2026-07-28", false).await;
        assert_eq!(record.execution_log.len(), 1);
        assert_eq!(record.execution_log[0].status, "FILLED");
        assert!(ledger.first_seen_ms.contains_key(&("ETHUSDT".to_string(), crate::types::PositionSide::Long)));
        let _ = std::fs::remove_file(&path);
    }
}
