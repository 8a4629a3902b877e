// decision.rs — Decision/Action types and the Decision Sanitizer (C10)
//
// `Action` models the LLM's tagged action string as a closed enum per §9
// ("model as a tagged enum/variant ... the sanitizer is the only place
// that mutates the tag"); the wire string form lives only at the LLM
// boundary (`Action::from_wire`/`as_wire`). Grounded on the teacher's
// `Signal`/`SignalKind` pattern in `market_maker.rs` (a small closed enum
// dispatched through a match, not a stringly-typed action field threaded
// through business logic).
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    PartialCloseLong,
    PartialCloseShort,
    UpdateStopLoss,
    UpdateTakeProfit,
    LimitOpenLong,
    LimitOpenShort,
    CancelLimitOrder,
    Hold,
    Wait,
}

impl Default for Action {
    fn default() -> Self {
        Action::Hold
    }
}

impl Action {
    pub fn is_open(self) -> bool {
        matches!(self, Action::OpenLong | Action::OpenShort | Action::LimitOpenLong | Action::LimitOpenShort)
    }

    pub fn is_market_open(self) -> bool {
        matches!(self, Action::OpenLong | Action::OpenShort)
    }

    pub fn is_limit_open(self) -> bool {
        matches!(self, Action::LimitOpenLong | Action::LimitOpenShort)
    }

    pub fn is_close(self) -> bool {
        matches!(self, Action::CloseLong | Action::CloseShort | Action::PartialCloseLong | Action::PartialCloseShort)
    }

    /// Priority for intra-cycle sort: closes/partial-closes < opens <
    /// hold/wait/other (§4.9).
    pub fn dispatch_priority(self) -> u8 {
        match self {
            Action::CloseLong | Action::CloseShort | Action::PartialCloseLong | Action::PartialCloseShort => 0,
            Action::OpenLong | Action::OpenShort | Action::LimitOpenLong | Action::LimitOpenShort => 1,
            _ => 2,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Action::OpenLong => "open_long",
            Action::OpenShort => "open_short",
            Action::CloseLong => "close_long",
            Action::CloseShort => "close_short",
            Action::PartialCloseLong => "partial_close_long",
            Action::PartialCloseShort => "partial_close_short",
            Action::UpdateStopLoss => "update_stop_loss",
            Action::UpdateTakeProfit => "update_take_profit",
            Action::LimitOpenLong => "limit_open_long",
            Action::LimitOpenShort => "limit_open_short",
            Action::CancelLimitOrder => "cancel_limit_order",
            Action::Hold => "hold",
            Action::Wait => "wait",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPreference {
    Auto,
    Market,
    Limit,
}

impl Default for ExecutionPreference {
    fn default() -> Self {
        ExecutionPreference::Auto
    }
}

/// Hand-rolled so the wire value `""` (no preference stated) deserializes to
/// `Auto` instead of failing the whole decision batch (§9).
impl<'de> Deserialize<'de> for ExecutionPreference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "" | "auto" => Ok(ExecutionPreference::Auto),
            "market" => Ok(ExecutionPreference::Market),
            "limit" => Ok(ExecutionPreference::Limit),
            other => Err(serde::de::Error::unknown_variant(other, &["auto", "market", "limit", ""])),
        }
    }
}

/// LLM-produced trading decision for one symbol (§3). Optional numeric
/// fields default to 0.0 when the model omits them, matching the teacher's
/// `#[serde(default)]` convention for loosely-structured upstream payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub action: Action,
    #[serde(default)]
    pub position_size_usd: f64,
    #[serde(default)]
    pub leverage: f64,
    #[serde(default)]
    pub stop_loss: f64,
    #[serde(default)]
    pub take_profit: f64,
    #[serde(default)]
    pub tp1: f64,
    #[serde(default)]
    pub tp2: f64,
    #[serde(default)]
    pub tp3: f64,
    #[serde(default)]
    pub limit_price: f64,
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub close_quantity: f64,
    #[serde(default)]
    pub close_ratio: f64,
    #[serde(default)]
    pub new_stop_loss: f64,
    #[serde(default)]
    pub new_take_profit: f64,
    #[serde(default)]
    pub is_add_on: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub execution_preference: ExecutionPreference,
    /// Non-fatal rejection reason recorded by the sanitizer/validator when
    /// this decision gets rewritten to `hold` (not part of the LLM wire
    /// format; populated downstream).
    #[serde(skip)]
    pub rejection_reason: Option<String>,
}

/// Parses `grade=<SABCDEF>` and `score=<0..999>` out of a free-text
/// reasoning string (§4.7, §GLOSSARY). Case-sensitive on the grade letter
/// per the spec's literal token form.
pub fn parse_grade_and_score(reasoning: &str) -> Option<(char, u32)> {
    let grade = extract_tagged_char(reasoning, "grade=")?;
    let score = extract_tagged_u32(reasoning, "score=")?;
    if score > 999 {
        return None;
    }
    Some((grade, score))
}

fn extract_tagged_char(text: &str, tag: &str) -> Option<char> {
    let idx = text.find(tag)?;
    let rest = &text[idx + tag.len()..];
    rest.chars().next().filter(|c| "SABCDEF".contains(*c))
}

fn extract_tagged_u32(text: &str, tag: &str) -> Option<u32> {
    let idx = text.find(tag)?;
    let rest = &text[idx + tag.len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Decision Sanitizer (C10, §4.7). Mutates `decision` in place; returns a
/// human-readable fix/rejection note when something changed.
pub fn sanitize(decision: &mut Decision) -> Option<String> {
    if !decision.action.is_open() {
        return None;
    }

    if decision.tp3 != 0.0 && decision.take_profit != decision.tp3 {
        decision.take_profit = decision.tp3;
    }

    let parsed = parse_grade_and_score(&decision.reasoning);
    let (grade, _score) = match parsed {
        Some(gs) => gs,
        None => {
            let reason = "open-action missing grade=/score= tags in reasoning".to_string();
            decision.action = Action::Hold;
            decision.rejection_reason = Some(reason.clone());
            return Some(reason);
        }
    };

    if grade == 'B' && matches!(decision.action, Action::OpenLong | Action::OpenShort) {
        let reason = "B-grade may only use limit opens".to_string();
        decision.action = Action::Hold;
        decision.rejection_reason = Some(reason.clone());
        return Some(reason);
    }

    None
}
