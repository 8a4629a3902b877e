// config.rs — Configuration (§6.6, §10)
//
// One `EngineConfig` aggregating the gate/lifecycle/risk sub-configs plus
// the loop's own knobs, built from the environment the way the teacher's
// `main.rs` does: `dotenvy::dotenv().ok()` once at startup, then
// `std::env::var` reads with a `.unwrap_or_else` fallback per key — never a
// hard `.expect()` for anything that has a sane shadow-mode default.
use crate::gate::{ExecutionMode, GateConfig};
use crate::lifecycle::LifecycleConfig;
use crate::log_sink::MonitorConfig;
use crate::risk::RiskConfig;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub gate: GateConfig,
    pub lifecycle: LifecycleConfig,
    pub risk: RiskConfig,
    pub monitor: MonitorConfig,
    /// Seconds between control-loop cycles.
    pub scan_interval_secs: u64,
    pub system_prompt_template: String,
    pub shadow_mode: bool,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: String,
    pub decision_log_path: String,
    pub counters_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            lifecycle: LifecycleConfig::default(),
            risk: RiskConfig::default(),
            monitor: MonitorConfig::default(),
            scan_interval_secs: 180,
            system_prompt_template: "adaptive".to_string(),
            shadow_mode: true,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4o".to_string(),
            llm_api_key: String::new(),
            decision_log_path: "decisions.jsonl".to_string(),
            counters_path: "daily_counters.json".to_string(),
        }
    }
}

fn execution_mode_from_str(s: &str) -> Option<ExecutionMode> {
    match s {
        "market_ok" => Some(ExecutionMode::MarketOk),
        "limit_preferred" => Some(ExecutionMode::LimitPreferred),
        "limit_only" => Some(ExecutionMode::LimitOnly),
        "no_trade" => Some(ExecutionMode::NoTrade),
        _ => None,
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let scan_interval_secs = std::env::var("ENGINE_SCAN_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.scan_interval_secs);
        let system_prompt_template = std::env::var("ENGINE_PROMPT_TEMPLATE").unwrap_or(defaults.system_prompt_template);
        let shadow_mode = std::env::var("ENGINE_SHADOW_MODE").map(|v| v != "false" && v != "0").unwrap_or(defaults.shadow_mode);
        let llm_base_url = std::env::var("LLM_BASE_URL").unwrap_or(defaults.llm_base_url);
        let llm_model = std::env::var("LLM_MODEL").unwrap_or(defaults.llm_model);
        let llm_api_key = std::env::var("LLM_API_KEY").unwrap_or(defaults.llm_api_key);
        let decision_log_path = std::env::var("ENGINE_DECISION_LOG_PATH").unwrap_or(defaults.decision_log_path);
        let counters_path = std::env::var("ENGINE_COUNTERS_PATH").unwrap_or(defaults.counters_path);

        let mut risk = defaults.risk;
        if let Ok(v) = std::env::var("RISK_BTC_ETH_LEVERAGE") {
            if let Ok(parsed) = v.parse() {
                risk.btc_eth_leverage = parsed;
            }
        }
        if let Ok(v) = std::env::var("RISK_ALTCOIN_LEVERAGE") {
            if let Ok(parsed) = v.parse() {
                risk.altcoin_leverage = parsed;
            }
        }
        if let Ok(v) = std::env::var("RISK_MAX_DAILY_LOSS") {
            if let Ok(parsed) = v.parse() {
                risk.max_daily_loss = parsed;
            }
        }
        if let Ok(v) = std::env::var("RISK_MAX_DRAWDOWN") {
            if let Ok(parsed) = v.parse() {
                risk.max_drawdown = parsed;
            }
        }
        if let Ok(v) = std::env::var("RISK_IS_CROSS_MARGIN") {
            risk.is_cross_margin = v != "false" && v != "0";
        }
        if let Ok(v) = std::env::var("RISK_INITIAL_BALANCE") {
            if let Ok(parsed) = v.parse() {
                risk.initial_balance = parsed;
            }
        }
        if let Ok(v) = std::env::var("RISK_STOP_TRADING_TIME") {
            if let Ok(parsed) = v.parse() {
                risk.stop_trading_time_minutes = parsed;
            }
        }

        let mut gate = defaults.gate;
        if let Ok(v) = std::env::var("ENGINE_GATE_MAX_SPREAD_BPS_NO_TRADE") {
            if let Ok(parsed) = v.parse() {
                gate.max_spread_bps_no_trade = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_GATE_MAX_SPREAD_BPS_LIMIT_ONLY") {
            if let Ok(parsed) = v.parse() {
                gate.max_spread_bps_limit_only = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_GATE_MAX_SPREAD_BPS_LIMIT_PREFERRED") {
            if let Ok(parsed) = v.parse() {
                gate.max_spread_bps_limit_preferred = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_GATE_MIN_DEPTH_RATIO_ABS") {
            if let Ok(parsed) = v.parse() {
                gate.min_depth_ratio_abs = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_GATE_MAX_DEPTH_RATIO_ABS") {
            if let Ok(parsed) = v.parse() {
                gate.max_depth_ratio_abs = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_GATE_MIN_BEST_NOTIONAL_LIMIT_ONLY") {
            if let Ok(parsed) = v.parse() {
                gate.min_best_notional_limit_only = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_GATE_MIN_BEST_NOTIONAL_LIMIT_PREFERRED") {
            if let Ok(parsed) = v.parse() {
                gate.min_best_notional_limit_preferred = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_GATE_MIN_DEPTH10_NOTIONAL_LIMIT_ONLY") {
            if let Ok(parsed) = v.parse() {
                gate.min_depth10_notional_limit_only = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_GATE_MIN_DEPTH10_NOTIONAL_LIMIT_PREFERRED") {
            if let Ok(parsed) = v.parse() {
                gate.min_depth10_notional_limit_preferred = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_GATE_NOTIONAL_MULTIPLIER_LIMIT_ONLY") {
            if let Ok(parsed) = v.parse() {
                gate.notional_multiplier_limit_only = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_GATE_NOTIONAL_MULTIPLIER_NO_TRADE") {
            if let Ok(parsed) = v.parse() {
                gate.notional_multiplier_no_trade = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_GATE_DEFAULT_MODE_ON_MISSING") {
            if let Some(mode) = execution_mode_from_str(&v) {
                gate.default_mode_on_missing = mode;
            }
        }

        let mut lifecycle = defaults.lifecycle;
        if let Ok(v) = std::env::var("ENGINE_LIFECYCLE_WAIT_SECONDS") {
            if let Ok(parsed) = v.parse() {
                lifecycle.wait_seconds = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_LIFECYCLE_MAX_RETRIES") {
            if let Ok(parsed) = v.parse() {
                lifecycle.max_retries = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_LIFECYCLE_POLL_INTERVAL_MS") {
            if let Ok(parsed) = v.parse() {
                lifecycle.poll_interval_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_LIFECYCLE_CANCEL_ON_PARTIAL_FILL") {
            lifecycle.cancel_on_partial_fill = v != "false" && v != "0";
        }
        if let Ok(v) = std::env::var("ENGINE_LIFECYCLE_POST_ONLY_WHEN_LIMIT_ONLY") {
            lifecycle.post_only_when_limit_only = v != "false" && v != "0";
        }

        Self {
            gate,
            lifecycle,
            risk,
            monitor: defaults.monitor,
            scan_interval_secs,
            system_prompt_template,
            shadow_mode,
            llm_base_url,
            llm_model,
            llm_api_key,
            decision_log_path,
            counters_path,
        }
    }
}
