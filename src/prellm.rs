// prellm.rs — PreLLM Gate (C9)
//
// Cheap pre-filter ahead of the (expensive, slow) LLM call: partitions
// candidate symbols by cooldown/volatility so the loop can skip the LLM
// call entirely when nothing is tradeable. Grounded on the teacher's
// `should_quote` pre-check in `market_maker.rs` (skip the quoting pass
// entirely for symbols that fail a cheap local check before touching the
// network), generalized to the three-way partition and decision synthesis
// this spec adds (§4.6).
use crate::decision::{Action, Decision};
use crate::ledger::PositionLedger;
use crate::types::VolatilityLevel;

#[derive(Debug, Clone, Default)]
pub struct GatePartition {
    pub allowed: Vec<String>,
    pub cooldown: Vec<String>,
    pub extreme: Vec<String>,
}

/// Partitions `candidates` per §4.6: any side in cooldown wins first;
/// otherwise extreme volatility; otherwise allowed.
pub fn partition(
    ledger: &PositionLedger,
    candidates: &[String],
    volatility_of: impl Fn(&str) -> Option<VolatilityLevel>,
    now_ms: u64,
) -> GatePartition {
    let mut partition = GatePartition::default();
    for symbol in candidates {
        if ledger.cooldown.either_side_in_cooldown(symbol, now_ms) {
            partition.cooldown.push(symbol.clone());
        } else if volatility_of(symbol) == Some(VolatilityLevel::Extreme) {
            partition.extreme.push(symbol.clone());
        } else {
            partition.allowed.push(symbol.clone());
        }
    }
    partition
}

/// Synthesises hold/wait decisions for cooldown/extreme symbols when the
/// LLM call is short-circuited (`allowed` empty) or merged alongside a
/// real LLM response otherwise (§4.6).
pub fn synthesize_decisions(ledger: &PositionLedger, partition: &GatePartition) -> Vec<Decision> {
    let mut decisions = Vec::new();
    for symbol in partition.cooldown.iter().chain(partition.extreme.iter()) {
        let has_live = ledger.has_live_position_or_pending(symbol);
        let reason = if partition.cooldown.contains(symbol) {
            format!("{} is in cooldown", symbol)
        } else {
            format!("{} volatility is extreme", symbol)
        };
        let action = if has_live { Action::Hold } else { Action::Wait };
        decisions.push(Decision { symbol: symbol.clone(), action, reasoning: reason, ..Decision::default() });
    }
    decisions
}
