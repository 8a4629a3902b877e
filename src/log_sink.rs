// log_sink.rs — Decision Log Sink (C15) + performance feedback (§11)
//
// `FileLogSink` is a straight JSONL append, the teacher's habit for
// anything durable it doesn't want a database for (see `persistence.rs`'s
// plain-file snapshot). `PerformanceMonitor`/`PerformanceMetrics`/
// `FeedbackAction` are carried over near-verbatim from the teacher's
// `monitor.rs` — a rolling trade-outcome window producing a profit-factor
// based suggestion — since nothing in this domain needs it to change.
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::error;
use serde::{Deserialize, Serialize};

use crate::record::CycleRecord;

#[async_trait]
pub trait DecisionLogSink: Send + Sync {
    async fn log_decision(&self, record: &CycleRecord);
    async fn get_latest_records(&self, n: usize) -> Vec<CycleRecord>;

    /// §6.4 AnalyzePerformance: replays the realized pnls recorded across the
    /// last `n` cycles through a fresh `PerformanceMonitor` and returns its
    /// metrics. Default-implemented in terms of `get_latest_records` so every
    /// sink gets it for free.
    async fn analyze_performance(&self, n: usize) -> PerformanceMetrics {
        let records = self.get_latest_records(n).await;
        let mut monitor = PerformanceMonitor::new(MonitorConfig::default());
        for record in &records {
            for entry in &record.execution_log {
                if let Some(pnl) = entry.realized_pnl {
                    monitor.record_trade(pnl);
                }
            }
        }
        monitor.get_metrics()
    }
}

pub struct FileLogSink {
    path: PathBuf,
}

impl FileLogSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

#[async_trait]
impl DecisionLogSink for FileLogSink {
    async fn log_decision(&self, record: &CycleRecord) {
        let line = match serde_json::to_string(record) {
            Ok(s) => s,
            Err(e) => {
                error!("[LOGSINK] failed to serialize cycle {}: {}", record.cycle_number, e);
                return;
            }
        };
        let result = OpenOptions::new().create(true).append(true).open(&self.path).and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            error!("[LOGSINK] failed to append cycle {} to {}: {}", record.cycle_number, self.path.display(), e);
        }
    }

    async fn get_latest_records(&self, n: usize) -> Vec<CycleRecord> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        let mut records: Vec<CycleRecord> = content.lines().filter_map(|line| serde_json::from_str(line).ok()).collect();
        if records.len() > n {
            records = records.split_off(records.len() - n);
        }
        records
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub window_size: usize,
    pub min_trades_for_action: usize,
    pub pf_threshold_warning: f64,
    pub pf_threshold_critical: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { window_size: 100, min_trades_for_action: 20, pf_threshold_warning: 1.0, pf_threshold_critical: 0.8 }
    }
}

pub struct PerformanceMonitor {
    config: MonitorConfig,
    history: VecDeque<TradeResult>,
}

#[derive(Debug, Clone)]
struct TradeResult {
    pnl: f64,
    is_win: bool,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config, history: VecDeque::new() }
    }

    pub fn record_trade(&mut self, pnl: f64) {
        if self.history.len() >= self.config.window_size {
            self.history.pop_front();
        }
        self.history.push_back(TradeResult { pnl, is_win: pnl > 0.0 });
    }

    pub fn get_metrics(&self) -> PerformanceMetrics {
        if self.history.is_empty() {
            return PerformanceMetrics::default();
        }

        let total_trades = self.history.len();
        let wins = self.history.iter().filter(|t| t.is_win).count();
        let win_rate = wins as f64 / total_trades as f64 * 100.0;

        let gross_profit: f64 = self.history.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
        let gross_loss: f64 = self.history.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl.abs()).sum();

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            100.0
        } else {
            0.0
        };

        PerformanceMetrics { win_rate, profit_factor, trade_count: total_trades, suggested_action: self.evaluate_action(profit_factor, total_trades) }
    }

    fn evaluate_action(&self, pf: f64, count: usize) -> FeedbackAction {
        if count < self.config.min_trades_for_action {
            return FeedbackAction::None;
        }
        if pf < self.config.pf_threshold_critical {
            FeedbackAction::HaltTrading
        } else if pf < self.config.pf_threshold_warning {
            FeedbackAction::ReduceSize(0.5)
        } else {
            FeedbackAction::None
        }
    }

    pub fn win_rate(&self) -> f64 {
        self.get_metrics().win_rate
    }
}

#[derive(Debug, Default)]
pub struct PerformanceMetrics {
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: usize,
    pub suggested_action: FeedbackAction,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FeedbackAction {
    #[default]
    None,
    ReduceSize(f64),
    HaltTrading,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Decision;
    use std::env;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(format!("perp-engine-logsink-test-{}-{}.jsonl", name, std::process::id()))
    }

    #[tokio::test]
    async fn appends_and_reads_back_latest_records() {
        let path = temp_path("roundtrip");
        let _ = std::fs::remove_file(&path);
        let sink = FileLogSink::new(&path);

        for i in 0..5 {
            let mut record = CycleRecord::new(i, i as i64);
            record.decisions.push(Decision::default());
            sink.log_decision(&record).await;
        }

        let latest = sink.get_latest_records(2).await;
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].cycle_number, 3);
        assert_eq!(latest[1].cycle_number, 4);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn analyze_performance_replays_realized_pnls_from_the_log() {
        let path = temp_path("analyze");
        let _ = std::fs::remove_file(&path);
        let sink = FileLogSink::new(&path);

        for pnl in [50.0, -10.0, 30.0] {
            let mut record = CycleRecord::new(0, 0);
            record.execution_log.push(crate::record::ExecutionLogEntry {
                symbol: "BTCUSDT".to_string(),
                action: "close_long".to_string(),
                status: "FILLED".to_string(),
                detail: "full close".to_string(),
                execution_report: None,
                realized_pnl: Some(pnl),
            });
            sink.log_decision(&record).await;
        }

        let metrics = sink.analyze_performance(10).await;
        assert_eq!(metrics.trade_count, 3);
        assert!(metrics.win_rate > 60.0 && metrics.win_rate < 67.0);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_file_returns_empty() {
        let path = temp_path("missing");
        let _ = std::fs::remove_file(&path);
        let sink = FileLogSink::new(&path);
        assert!(sink.get_latest_records(10).await.is_empty());
    }

    #[test]
    fn monitor_initial_state_is_neutral() {
        let monitor = PerformanceMonitor::new(MonitorConfig::default());
        let metrics = monitor.get_metrics();
        assert_eq!(metrics.trade_count, 0);
        assert_eq!(metrics.suggested_action, FeedbackAction::None);
    }

    #[test]
    fn profit_factor_below_critical_halts_trading() {
        let config = MonitorConfig { window_size: 10, min_trades_for_action: 5, pf_threshold_warning: 1.5, pf_threshold_critical: 0.8 };
        let mut monitor = PerformanceMonitor::new(config);
        monitor.record_trade(10.0);
        for _ in 0..5 {
            monitor.record_trade(-10.0);
        }
        assert_eq!(monitor.get_metrics().suggested_action, FeedbackAction::HaltTrading);
    }

    #[test]
    fn profit_factor_below_warning_reduces_size() {
        let config = MonitorConfig { window_size: 10, min_trades_for_action: 5, pf_threshold_warning: 1.5, pf_threshold_critical: 0.5 };
        let mut monitor = PerformanceMonitor::new(config);
        for _ in 0..3 {
            monitor.record_trade(10.0);
        }
        for _ in 0..3 {
            monitor.record_trade(-8.33);
        }
        match monitor.get_metrics().suggested_action {
            FeedbackAction::ReduceSize(x) => assert_eq!(x, 0.5),
            other => panic!("expected ReduceSize, got {other:?}"),
        }
    }

    #[test]
    fn window_rolls_off_oldest_trade() {
        let config = MonitorConfig { window_size: 3, min_trades_for_action: 1, pf_threshold_warning: 0.0, pf_threshold_critical: 0.0 };
        let mut monitor = PerformanceMonitor::new(config);
        monitor.record_trade(1.0);
        monitor.record_trade(2.0);
        monitor.record_trade(3.0);
        monitor.record_trade(4.0);
        assert_eq!(monitor.history.len(), 3);
        assert_eq!(monitor.history.front().unwrap().pnl, 2.0);
    }
}
