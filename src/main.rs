// main.rs — binary entry point
//
// Wires the default providers together and drives the control loop on a
// fixed-interval tick, the way the teacher's `main.rs` builds its engine
// then hands it to a `tokio::time::interval` loop with a `ctrl_c` shutdown
// hook. Shadow mode (§10) uses `SimExchange` exactly as the teacher does
// for `MM_SHADOW_MODE`; live mode needs a base URL and an authenticated
// `reqwest::Client` supplied by infrastructure outside this crate.
use std::sync::Arc;

use perp_engine::config::EngineConfig;
use perp_engine::control_loop::ControlLoop;
use perp_engine::exchange::{ExchangeAdapter, LiveExchange, SimExchange};
use perp_engine::filters::FiltersCache;
use perp_engine::ledger::PositionLedger;
use perp_engine::llm::HttpLlmPort;
use perp_engine::log_sink::FileLogSink;
use perp_engine::persistence;
use perp_engine::ports::{Clock, SystemClock};
use perp_engine::risk::RiskManager;
use perp_engine::snapshot::{MarketSnapshotProvider, SimSnapshotProvider};

fn today_string(clock: &dyn Clock) -> String {
    let ms = clock.now_ms() as i64;
    chrono::DateTime::from_timestamp_millis(ms).map(|dt| dt.format("%Y-%m-%d").to_string()).unwrap_or_else(|| "1970-01-01".to_string())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("perp-engine starting");

    let config = EngineConfig::from_env();
    let session_id = uuid::Uuid::new_v4().to_string();
    log::info!("  session id:      {}", session_id);
    log::info!("  shadow mode:     {}", if config.shadow_mode { "ON (no real orders)" } else { "LIVE" });
    log::info!("  scan interval:   {}s", config.scan_interval_secs);
    log::info!("  prompt template: {}", config.system_prompt_template);

    let adapter: Arc<dyn ExchangeAdapter> = if config.shadow_mode {
        Arc::new(SimExchange::new(config.risk.initial_balance))
    } else {
        let base_url = std::env::var("EXCHANGE_BASE_URL").expect("EXCHANGE_BASE_URL must be set in live mode");
        Arc::new(LiveExchange::new(base_url, reqwest::Client::new()))
    };

    let snapshot: Arc<dyn MarketSnapshotProvider> = Arc::new(SimSnapshotProvider::new(config.gate));
    let clock = SystemClock;
    let filters = FiltersCache::default();
    let log_sink = FileLogSink::new(&config.decision_log_path);
    let llm = HttpLlmPort::new(config.llm_base_url.clone(), config.llm_model.clone(), config.llm_api_key.clone());

    let today = today_string(&clock);
    let mut ledger = PositionLedger::new(today.clone());
    let current_balance = adapter.get_balance().await.ok().and_then(|b| b.get("USDT").copied()).unwrap_or(config.risk.initial_balance);
    let mut risk = RiskManager::new(config.risk, current_balance, clock.now_ms());
    let daily_counters = persistence::load_state(&config.counters_path, &today);
    ledger.daily_pair_trades = daily_counters;

    let candidate_symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string(), "SOLUSDT".to_string()];

    let control_loop = ControlLoop {
        config: &config,
        adapter: adapter.as_ref(),
        snapshot: snapshot.as_ref(),
        llm: &llm,
        log_sink: &log_sink,
        clock: &clock,
        filters: &filters,
        candidate_symbols,
        session_id,
    };

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(config.scan_interval_secs));
    let mut cycle_number: u64 = 0;
    let mut last_day = today;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                cycle_number += 1;
                let current_day = today_string(&clock);
                let day_changed = current_day != last_day;
                last_day = current_day.clone();

                let record = control_loop.run_cycle(&mut ledger, &mut risk, cycle_number, &current_day, day_changed).await;
                if record.status != perp_engine::record::Status::Success {
                    log::warn!("[MAIN] cycle {} finished with status {:?}", cycle_number, record.status);
                }
                persistence::save_state(&config.counters_path, &ledger.daily_pair_trades);
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("[MAIN] shutdown signal received, saving state and exiting");
                persistence::save_state(&config.counters_path, &ledger.daily_pair_trades);
                break;
            }
        }
    }
}
