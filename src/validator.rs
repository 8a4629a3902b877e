// validator.rs — Validator Pipeline (C11)
//
// Ordered guards, first failure wins and rewrites the decision to `hold`
// with a recorded reason; closes and SL/TP updates bypass every open-only
// check. Grounded on the teacher's `RiskManager::check_order` guard chain
// in `risk.rs` (cooldown/exposure/drawdown checks run in sequence, first
// failing check vetoes the order), generalized to the four-layer pipeline
// this spec requires (§4.8).
use crate::decision::{Action, Decision, ExecutionPreference};
use crate::gate::{self, ExecutionMode, GateConfig, Microstructure};
use crate::ledger::PositionLedger;
use crate::types::{PositionSide, VolatilityLevel};

const REVERSAL_KEYWORDS: &[&str] = &["反转", "reversal", "bos", "choch"];
const STRUCTURE_KEYWORDS: &[&str] = &["4h", "1h", "结构", "structure"];

fn contains_any_case_insensitive(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(&n.to_lowercase()))
}

pub struct ValidatorContext<'a> {
    pub ledger: &'a PositionLedger,
    pub gate_config: &'a GateConfig,
    pub microstructure: Option<&'a Microstructure>,
    pub volatility: Option<VolatilityLevel>,
    pub opposing_live_position: bool,
    pub now_ms: u64,
}

fn reject(decision: &mut Decision, reason: &str) {
    decision.action = Action::Hold;
    decision.rejection_reason = Some(reason.to_string());
}

fn side_of(action: Action) -> Option<PositionSide> {
    match action {
        Action::OpenLong | Action::LimitOpenLong => Some(PositionSide::Long),
        Action::OpenShort | Action::LimitOpenShort => Some(PositionSide::Short),
        _ => None,
    }
}

/// Runs the four ordered guards against one decision. Mutates in place;
/// returns `true` if the decision survived unmodified.
pub fn validate(decision: &mut Decision, ctx: &ValidatorContext) -> bool {
    if !decision.action.is_open() {
        return true;
    }

    // 1. Cooldown enforcer.
    if ctx.ledger.cooldown.either_side_in_cooldown(&decision.symbol, ctx.now_ms) {
        reject(decision, "symbol is in cooldown");
        return false;
    }

    // 2. Volatility circuit breaker.
    match ctx.volatility {
        Some(VolatilityLevel::Extreme) => {
            reject(decision, "volatility is extreme, opens rejected");
            return false;
        }
        Some(VolatilityLevel::High) if decision.action.is_market_open() => {
            reject(decision, "volatility is high, market opens rejected");
            return false;
        }
        _ => {}
    }

    // 3. Execution-mode alignment.
    let planned_notional = decision.position_size_usd * decision.leverage;
    let verdict = gate::evaluate(ctx.gate_config, ctx.microstructure, planned_notional, ctx.now_ms);
    if verdict.mode == ExecutionMode::NoTrade {
        reject(decision, "execution gate: no_trade");
        return false;
    }
    // S6: a market open under a limit_only verdict flips to the limit-open
    // equivalent instead of being rejected; see `align_execution_mode`.
    align_execution_mode(decision, verdict.mode);

    // 4. Hedge anti-self-hedge.
    if ctx.opposing_live_position {
        if let Some(_side) = side_of(decision.action) {
            let parsed = crate::decision::parse_grade_and_score(&decision.reasoning);
            let grade_ok = matches!(parsed, Some(('S', score)) if score >= 88);
            let has_reversal = contains_any_case_insensitive(&decision.reasoning, REVERSAL_KEYWORDS);
            let has_structure = contains_any_case_insensitive(&decision.reasoning, STRUCTURE_KEYWORDS);
            if !(grade_ok && has_reversal && has_structure) {
                reject(decision, "hedge anti-self-hedge: opposing position exists without S-grade reversal confirmation");
                return false;
            }
        }
    }

    true
}

/// Position-count cap (§4.8, enforced by the executor rather than the
/// validator proper, but checked here for callers that want a single
/// entry point): live positions for market opens, positions + pending for
/// limit opens, capped at 3.
pub fn exceeds_position_cap(ledger: &PositionLedger, action: Action) -> bool {
    let count = if action.is_limit_open() { ledger.cap_count() } else { ledger.count_live_positions() };
    count >= 3
}

/// §4.9/S6: execution-mode alignment flips a market open whose gate mode
/// is `limit_only` to the corresponding limit action, coercing the
/// preference before arbitration runs.
pub fn align_execution_mode(decision: &mut Decision, gate_mode: ExecutionMode) -> bool {
    if gate_mode != ExecutionMode::LimitOnly || !decision.action.is_market_open() {
        return false;
    }
    decision.execution_preference = ExecutionPreference::Limit;
    decision.action = match decision.action {
        Action::OpenLong => Action::LimitOpenLong,
        Action::OpenShort => Action::LimitOpenShort,
        other => other,
    };
    true
}
