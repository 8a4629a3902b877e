// types.rs — shared primitive types used across every component.
use serde::{Deserialize, Serialize};

pub type Symbol = String;

/// Which side of a position (or cooldown/target) a key refers to.
/// Distinct from `OrderSide`, which is the wire-level buy/sell direction
/// of a single order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(self) -> PositionSide {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The symbol+side pair used everywhere the engine indexes positions,
/// targets, pending orders, cooldowns and stop-loss history.
pub type SymbolSideKey = (Symbol, PositionSide);

/// Wire-level order direction for a single limit/market order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Volatility classification produced by the market snapshot provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl Default for VolatilityLevel {
    fn default() -> Self {
        VolatilityLevel::Medium
    }
}
