// record.rs — per-cycle and per-attempt record types (§3)
//
// Plain data carried out of the control loop into the decision log sink.
// Grounded on the teacher's `TradeLog`/`CycleSummary` structs in
// `monitor.rs` (flat, serde-derived records appended to a sink, never
// mutated after construction).
use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::types::PositionSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Warning,
    Error,
}

/// One limit-order attempt sequence's outcome (§3, §4.4b, P6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order_id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub attempt_index: u32,
    pub limit_price: f64,
    pub pricing_reason: String,
    pub quantity: f64,
    pub filled_quantity: f64,
    pub avg_fill_price: f64,
    /// One of FILLED, PARTIALLY_FILLED, TIMEOUT, CANCELED, EXPIRED,
    /// RETRIES_EXHAUSTED, ORDER_FAILED.
    pub status: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// One dispatched decision's outcome, appended to `CycleRecord.execution_log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub symbol: String,
    pub action: String,
    pub status: String,
    pub detail: String,
    pub execution_report: Option<ExecutionReport>,
    /// Realized pnl for a close/partial-close, taken from the position's
    /// `unrealized_pnl` at close time. `None` for opens, holds and
    /// reconciler-synthesised closes where no live position remained to read
    /// a pnl off of.
    #[serde(default)]
    pub realized_pnl: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub timestamp: i64,
    pub cycle_number: u64,
    /// Id of the running engine process, minted once at startup (§10).
    #[serde(default)]
    pub session_id: String,
    pub account_snapshot: serde_json::Value,
    pub positions_snapshot: serde_json::Value,
    pub candidate_symbols: Vec<String>,
    pub system_prompt: String,
    pub user_prompt: String,
    pub cot_trace: String,
    pub decisions_json: String,
    pub decisions: Vec<Decision>,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub validation_errors: Vec<String>,
    pub cooldown_skip_llm: bool,
    pub cooldown_symbols: Vec<String>,
    pub extreme_symbols: Vec<String>,
    pub status: Status,
    pub error_type: Option<String>,
    pub error_severity: Option<String>,
    pub error_message: Option<String>,
}

impl CycleRecord {
    pub fn new(cycle_number: u64, timestamp: i64) -> Self {
        Self {
            timestamp,
            cycle_number,
            session_id: String::new(),
            account_snapshot: serde_json::Value::Null,
            positions_snapshot: serde_json::Value::Null,
            candidate_symbols: Vec::new(),
            system_prompt: String::new(),
            user_prompt: String::new(),
            cot_trace: String::new(),
            decisions_json: String::new(),
            decisions: Vec::new(),
            execution_log: Vec::new(),
            validation_errors: Vec::new(),
            cooldown_skip_llm: false,
            cooldown_symbols: Vec::new(),
            extreme_symbols: Vec::new(),
            status: Status::Success,
            error_type: None,
            error_severity: None,
            error_message: None,
        }
    }
}
