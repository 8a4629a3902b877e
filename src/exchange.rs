// exchange.rs — Exchange Adapter (C1)
//
// Uniform contract over heterogeneous perpetual-futures venues. The wire
// format of any real venue is out of scope (§1 Non-goals); this module
// carries the trait plus an in-memory `SimExchange` (used by every test and
// by the default runtime configuration) and a thin `LiveExchange` REST
// skeleton in the teacher's `reqwest`-based style, with auth assumed to be
// handled by infrastructure outside this crate.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use crate::filters::SymbolFilters;
use crate::types::{PositionSide, Symbol, SymbolSideKey};

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub entry_price: f64,
    pub mark_price: f64,
    /// Always positive — direction lives in `side`.
    pub quantity: f64,
    pub leverage: f64,
    pub unrealized_pnl: f64,
    pub liquidation_price: f64,
    pub margin_used: f64,
    pub first_seen_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderStatusReport {
    pub status: OrderStatus,
    pub executed_qty: f64,
    pub avg_price: f64,
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone)]
pub struct OrderHandle {
    pub order_id: String,
}

#[derive(Debug, Clone)]
pub enum ExchangeError {
    /// Network/5xx — retried inside the adapter; surfaced only after
    /// exhaustion (§7 "Adapter transport").
    Transport(String),
    /// Order not found / already cancelled / venue code equivalent to
    /// Binance's -2011. Callers that cancel treat this as success (§7
    /// "Adapter semantic").
    AlreadyCancelledOrNotFound,
    /// Any other semantic rejection (insufficient margin, invalid symbol…).
    Semantic(String),
}

impl std::fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeError::Transport(s) => write!(f, "transport error: {}", s),
            ExchangeError::AlreadyCancelledOrNotFound => write!(f, "order already cancelled or not found"),
            ExchangeError::Semantic(s) => write!(f, "exchange rejected order: {}", s),
        }
    }
}

impl std::error::Error for ExchangeError {}

impl ExchangeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Transport(_))
    }

    /// True for the "already gone" family the cancel path classifies as
    /// success rather than error (§7, §4.9 cancel_limit_order).
    pub fn is_cancel_noop(&self) -> bool {
        matches!(self, ExchangeError::AlreadyCancelledOrNotFound)
    }
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_balance(&self) -> Result<HashMap<String, f64>, ExchangeError>;
    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError>;

    async fn open_long(&self, symbol: &str, qty: f64, leverage: f64) -> Result<OrderHandle, ExchangeError>;
    async fn open_short(&self, symbol: &str, qty: f64, leverage: f64) -> Result<OrderHandle, ExchangeError>;
    /// `qty == 0.0` means a full close.
    async fn close_long(&self, symbol: &str, qty: f64) -> Result<OrderHandle, ExchangeError>;
    async fn close_short(&self, symbol: &str, qty: f64) -> Result<OrderHandle, ExchangeError>;

    async fn limit_open_long(
        &self,
        symbol: &str,
        qty: f64,
        leverage: f64,
        limit_price: f64,
        stop_loss: f64,
    ) -> Result<OrderHandle, ExchangeError>;
    async fn limit_open_short(
        &self,
        symbol: &str,
        qty: f64,
        leverage: f64,
        limit_price: f64,
        stop_loss: f64,
    ) -> Result<OrderHandle, ExchangeError>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError>;
    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatusReport, ExchangeError>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;
    async fn cancel_all_orders(&self, symbol: &str) -> Result<u32, ExchangeError>;

    async fn set_stop_loss(&self, symbol: &str, side: PositionSide, qty: f64, price: f64) -> Result<(), ExchangeError>;
    async fn set_take_profit(&self, symbol: &str, side: PositionSide, qty: f64, price: f64) -> Result<(), ExchangeError>;
    async fn set_margin_mode(&self, symbol: &str, cross: bool) -> Result<(), ExchangeError>;
    async fn set_leverage(&self, symbol: &str, n: u32) -> Result<(), ExchangeError>;

    async fn get_market_price(&self, symbol: &str) -> Result<f64, ExchangeError>;
    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError>;
}

// ─── Sim Exchange (in-memory) ──────────────────────────────────────────────

struct SimPendingOrder {
    order_id: String,
    symbol: Symbol,
    side: PositionSide,
    price: f64,
    quantity: f64,
    filled_qty: f64,
}

struct SimState {
    balance: HashMap<String, f64>,
    positions: HashMap<SymbolSideKey, Position>,
    pending: HashMap<String, SimPendingOrder>,
    mark_prices: HashMap<Symbol, f64>,
    filters: HashMap<Symbol, SymbolFilters>,
    next_order_id: u64,
}

/// In-memory exchange used by every test and by the default runtime
/// configuration (real venue wire formats are out of scope).
pub struct SimExchange {
    state: StdMutex<SimState>,
}

impl SimExchange {
    pub fn new(initial_balance: f64) -> Self {
        let mut balance = HashMap::new();
        balance.insert("USDT".to_string(), initial_balance);
        Self {
            state: StdMutex::new(SimState {
                balance,
                positions: HashMap::new(),
                pending: HashMap::new(),
                mark_prices: HashMap::new(),
                filters: HashMap::new(),
                next_order_id: 1,
            }),
        }
    }

    pub fn set_mark_price(&self, symbol: &str, price: f64) {
        self.state.lock().unwrap().mark_prices.insert(symbol.to_string(), price);
    }

    pub fn set_filters(&self, symbol: &str, filters: SymbolFilters) {
        self.state.lock().unwrap().filters.insert(symbol.to_string(), filters);
    }

    /// Test helper: inject a position directly, bypassing order placement.
    pub fn seed_position(&self, position: Position) {
        let key = (position.symbol.clone(), position.side);
        self.state.lock().unwrap().positions.insert(key, position);
    }

    /// Test helper: remove a position to simulate an exchange-side close
    /// (stop-loss or take-profit fill) that the reconciler must detect.
    pub fn vanish_position(&self, symbol: &str, side: PositionSide) {
        self.state.lock().unwrap().positions.remove(&(symbol.to_string(), side));
    }

    /// Test helper: mark a pending order as filled with the given price.
    pub fn fill_order(&self, order_id: &str, qty: f64, price: f64) {
        let mut guard = self.state.lock().unwrap();
        if let Some(order) = guard.pending.get_mut(order_id) {
            order.filled_qty = qty;
            order.price = price;
        }
    }

    fn next_id(state: &mut SimState) -> String {
        let id = state.next_order_id;
        state.next_order_id += 1;
        format!("sim-{}", id)
    }
}

#[async_trait]
impl ExchangeAdapter for SimExchange {
    async fn get_balance(&self) -> Result<HashMap<String, f64>, ExchangeError> {
        Ok(self.state.lock().unwrap().balance.clone())
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        Ok(self.state.lock().unwrap().positions.values().cloned().collect())
    }

    async fn open_long(&self, symbol: &str, qty: f64, leverage: f64) -> Result<OrderHandle, ExchangeError> {
        self.open_internal(symbol, PositionSide::Long, qty, leverage)
    }

    async fn open_short(&self, symbol: &str, qty: f64, leverage: f64) -> Result<OrderHandle, ExchangeError> {
        self.open_internal(symbol, PositionSide::Short, qty, leverage)
    }

    async fn close_long(&self, symbol: &str, qty: f64) -> Result<OrderHandle, ExchangeError> {
        self.close_internal(symbol, PositionSide::Long, qty)
    }

    async fn close_short(&self, symbol: &str, qty: f64) -> Result<OrderHandle, ExchangeError> {
        self.close_internal(symbol, PositionSide::Short, qty)
    }

    async fn limit_open_long(
        &self,
        symbol: &str,
        qty: f64,
        _leverage: f64,
        limit_price: f64,
        _stop_loss: f64,
    ) -> Result<OrderHandle, ExchangeError> {
        self.limit_open_internal(symbol, PositionSide::Long, qty, limit_price)
    }

    async fn limit_open_short(
        &self,
        symbol: &str,
        qty: f64,
        _leverage: f64,
        limit_price: f64,
        _stop_loss: f64,
    ) -> Result<OrderHandle, ExchangeError> {
        self.limit_open_internal(symbol, PositionSide::Short, qty, limit_price)
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let guard = self.state.lock().unwrap();
        Ok(guard
            .pending
            .values()
            .filter(|o| o.symbol == symbol && o.filled_qty < o.quantity)
            .map(|o| OpenOrder { order_id: o.order_id.clone(), symbol: o.symbol.clone(), side: o.side, price: o.price, quantity: o.quantity })
            .collect())
    }

    async fn get_order_status(&self, _symbol: &str, order_id: &str) -> Result<OrderStatusReport, ExchangeError> {
        let guard = self.state.lock().unwrap();
        match guard.pending.get(order_id) {
            None => Ok(OrderStatusReport { status: OrderStatus::Canceled, executed_qty: 0.0, avg_price: 0.0 }),
            Some(o) if o.filled_qty <= 0.0 => Ok(OrderStatusReport { status: OrderStatus::New, executed_qty: 0.0, avg_price: 0.0 }),
            Some(o) if o.filled_qty < o.quantity => {
                Ok(OrderStatusReport { status: OrderStatus::PartiallyFilled, executed_qty: o.filled_qty, avg_price: o.price })
            }
            Some(o) => Ok(OrderStatusReport { status: OrderStatus::Filled, executed_qty: o.filled_qty, avg_price: o.price }),
        }
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let mut guard = self.state.lock().unwrap();
        if guard.pending.remove(order_id).is_none() {
            return Err(ExchangeError::AlreadyCancelledOrNotFound);
        }
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<u32, ExchangeError> {
        let mut guard = self.state.lock().unwrap();
        let ids: Vec<String> = guard.pending.values().filter(|o| o.symbol == symbol).map(|o| o.order_id.clone()).collect();
        for id in &ids {
            guard.pending.remove(id);
        }
        Ok(ids.len() as u32)
    }

    async fn set_stop_loss(&self, _symbol: &str, _side: PositionSide, _qty: f64, _price: f64) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn set_take_profit(&self, _symbol: &str, _side: PositionSide, _qty: f64, _price: f64) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn set_margin_mode(&self, _symbol: &str, _cross: bool) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn set_leverage(&self, _symbol: &str, _n: u32) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn get_market_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        self.state
            .lock()
            .unwrap()
            .mark_prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::Semantic(format!("no mark price seeded for {}", symbol)))
    }

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        Ok(self.state.lock().unwrap().filters.get(symbol).copied().unwrap_or_default())
    }
}

impl SimExchange {
    fn open_internal(&self, symbol: &str, side: PositionSide, qty: f64, leverage: f64) -> Result<OrderHandle, ExchangeError> {
        let mut guard = self.state.lock().unwrap();
        let price = *guard.mark_prices.get(symbol).unwrap_or(&0.0);
        if price <= 0.0 {
            return Err(ExchangeError::Semantic(format!("no market price for {}", symbol)));
        }
        let id = Self::next_id(&mut guard);
        guard.positions.insert(
            (symbol.to_string(), side),
            Position {
                symbol: symbol.to_string(),
                side,
                entry_price: price,
                mark_price: price,
                quantity: qty,
                leverage,
                unrealized_pnl: 0.0,
                liquidation_price: 0.0,
                margin_used: qty * price / leverage.max(1.0),
                first_seen_ms: 0,
            },
        );
        Ok(OrderHandle { order_id: id })
    }

    fn close_internal(&self, symbol: &str, side: PositionSide, qty: f64) -> Result<OrderHandle, ExchangeError> {
        let mut guard = self.state.lock().unwrap();
        let key = (symbol.to_string(), side);
        let id = Self::next_id(&mut guard);
        match guard.positions.get_mut(&key) {
            None => Err(ExchangeError::Semantic(format!("no position to close for {}", symbol))),
            Some(pos) => {
                if qty <= 0.0 || qty >= pos.quantity {
                    guard.positions.remove(&key);
                } else {
                    pos.quantity -= qty;
                }
                Ok(OrderHandle { order_id: id })
            }
        }
    }

    fn limit_open_internal(&self, symbol: &str, side: PositionSide, qty: f64, price: f64) -> Result<OrderHandle, ExchangeError> {
        let mut guard = self.state.lock().unwrap();
        let id = Self::next_id(&mut guard);
        guard.pending.insert(
            id.clone(),
            SimPendingOrder { order_id: id.clone(), symbol: symbol.to_string(), side, price, quantity: qty, filled_qty: 0.0 },
        );
        Ok(OrderHandle { order_id: id })
    }
}

// ─── Live Exchange (thin REST skeleton) ────────────────────────────────────

/// Thin REST-based adapter in the teacher's `reqwest::Client` style.
/// Request signing / auth is assumed to be handled by infrastructure
/// outside this crate (exchange-specific auth is a named Non-goal) — the
/// base URL and an already-authenticated `reqwest::Client` are injected.
pub struct LiveExchange {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl LiveExchange {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self { base_url: base_url.into(), client }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, ExchangeError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        if resp.status().as_u16() == 429 || resp.status().is_server_error() {
            return Err(ExchangeError::Transport(format!("status {}", resp.status())));
        }
        resp.json::<serde_json::Value>().await.map_err(|e| ExchangeError::Transport(e.to_string()))
    }
}

#[async_trait]
impl ExchangeAdapter for LiveExchange {
    async fn get_balance(&self) -> Result<HashMap<String, f64>, ExchangeError> {
        let data = self.post("/balance", serde_json::json!({})).await?;
        let mut out = HashMap::new();
        if let Some(obj) = data.as_object() {
            for (k, v) in obj {
                if let Some(f) = v.as_f64() {
                    out.insert(k.clone(), f);
                }
            }
        }
        Ok(out)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        // Wire parsing is venue-specific and out of scope (§1).
        Ok(Vec::new())
    }

    async fn open_long(&self, symbol: &str, qty: f64, leverage: f64) -> Result<OrderHandle, ExchangeError> {
        let data = self
            .post("/order/open", serde_json::json!({"symbol": symbol, "side": "long", "qty": qty, "leverage": leverage}))
            .await?;
        order_id_from(&data)
    }

    async fn open_short(&self, symbol: &str, qty: f64, leverage: f64) -> Result<OrderHandle, ExchangeError> {
        let data = self
            .post("/order/open", serde_json::json!({"symbol": symbol, "side": "short", "qty": qty, "leverage": leverage}))
            .await?;
        order_id_from(&data)
    }

    async fn close_long(&self, symbol: &str, qty: f64) -> Result<OrderHandle, ExchangeError> {
        let data = self.post("/order/close", serde_json::json!({"symbol": symbol, "side": "long", "qty": qty})).await?;
        order_id_from(&data)
    }

    async fn close_short(&self, symbol: &str, qty: f64) -> Result<OrderHandle, ExchangeError> {
        let data = self.post("/order/close", serde_json::json!({"symbol": symbol, "side": "short", "qty": qty})).await?;
        order_id_from(&data)
    }

    async fn limit_open_long(&self, symbol: &str, qty: f64, leverage: f64, limit_price: f64, stop_loss: f64) -> Result<OrderHandle, ExchangeError> {
        let data = self
            .post(
                "/order/limit_open",
                serde_json::json!({"symbol": symbol, "side": "long", "qty": qty, "leverage": leverage, "price": limit_price, "stop_loss": stop_loss}),
            )
            .await?;
        order_id_from(&data)
    }

    async fn limit_open_short(&self, symbol: &str, qty: f64, leverage: f64, limit_price: f64, stop_loss: f64) -> Result<OrderHandle, ExchangeError> {
        let data = self
            .post(
                "/order/limit_open",
                serde_json::json!({"symbol": symbol, "side": "short", "qty": qty, "leverage": leverage, "price": limit_price, "stop_loss": stop_loss}),
            )
            .await?;
        order_id_from(&data)
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let data = self.post("/orders/open", serde_json::json!({"symbol": symbol})).await?;
        let mut out = Vec::new();
        if let Some(arr) = data.as_array() {
            for o in arr {
                let side = if o["side"].as_str() == Some("short") { PositionSide::Short } else { PositionSide::Long };
                out.push(OpenOrder {
                    order_id: o["orderId"].as_str().unwrap_or_default().to_string(),
                    symbol: symbol.to_string(),
                    side,
                    price: o["price"].as_f64().unwrap_or(0.0),
                    quantity: o["qty"].as_f64().unwrap_or(0.0),
                });
            }
        }
        Ok(out)
    }

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatusReport, ExchangeError> {
        let data = self.post("/order/status", serde_json::json!({"symbol": symbol, "orderId": order_id})).await?;
        let status = match data["status"].as_str().unwrap_or("NEW") {
            "FILLED" => OrderStatus::Filled,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "CANCELED" => OrderStatus::Canceled,
            "EXPIRED" => OrderStatus::Expired,
            _ => OrderStatus::New,
        };
        Ok(OrderStatusReport {
            status,
            executed_qty: data["executedQty"].as_f64().unwrap_or(0.0),
            avg_price: data["avgPrice"].as_f64().unwrap_or(0.0),
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let data = self.post("/order/cancel", serde_json::json!({"symbol": symbol, "orderId": order_id})).await?;
        classify_cancel_response(&data)
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<u32, ExchangeError> {
        let data = self.post("/orders/cancel_all", serde_json::json!({"symbol": symbol})).await?;
        Ok(data["cancelled"].as_u64().unwrap_or(0) as u32)
    }

    async fn set_stop_loss(&self, symbol: &str, side: PositionSide, qty: f64, price: f64) -> Result<(), ExchangeError> {
        self.post("/position/stop_loss", serde_json::json!({"symbol": symbol, "side": side.as_str(), "qty": qty, "price": price})).await?;
        Ok(())
    }

    async fn set_take_profit(&self, symbol: &str, side: PositionSide, qty: f64, price: f64) -> Result<(), ExchangeError> {
        self.post("/position/take_profit", serde_json::json!({"symbol": symbol, "side": side.as_str(), "qty": qty, "price": price})).await?;
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, cross: bool) -> Result<(), ExchangeError> {
        self.post("/position/margin_mode", serde_json::json!({"symbol": symbol, "cross": cross})).await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, n: u32) -> Result<(), ExchangeError> {
        self.post("/position/leverage", serde_json::json!({"symbol": symbol, "leverage": n})).await?;
        Ok(())
    }

    async fn get_market_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let data = self.post("/market/price", serde_json::json!({"symbol": symbol})).await?;
        data["price"].as_f64().ok_or_else(|| ExchangeError::Semantic("missing price field".to_string()))
    }

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        let data = self.post("/market/filters", serde_json::json!({"symbol": symbol})).await?;
        Ok(SymbolFilters {
            tick_size: data["tickSize"].as_f64().unwrap_or(0.01),
            step_size: data["stepSize"].as_f64().unwrap_or(0.001),
            min_notional: data["minNotional"].as_f64().unwrap_or(5.0),
        })
    }
}

fn order_id_from(data: &serde_json::Value) -> Result<OrderHandle, ExchangeError> {
    match data["orderId"].as_str() {
        Some(id) => Ok(OrderHandle { order_id: id.to_string() }),
        None => Err(ExchangeError::Semantic("missing orderId in response".to_string())),
    }
}

fn classify_cancel_response(data: &serde_json::Value) -> Result<(), ExchangeError> {
    if let Some(code) = data["code"].as_i64() {
        if code == -2011 {
            return Err(ExchangeError::AlreadyCancelledOrNotFound);
        }
    }
    if let Some(msg) = data["msg"].as_str() {
        let lower = msg.to_lowercase();
        if lower.contains("not found") || lower.contains("already cancel") {
            return Err(ExchangeError::AlreadyCancelledOrNotFound);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sim_open_then_close_round_trips() {
        let ex = SimExchange::new(10_000.0);
        ex.set_mark_price("BTCUSDT", 100.0);
        ex.open_long("BTCUSDT", 1.0, 5.0).await.unwrap();
        let positions = ex.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        ex.close_long("BTCUSDT", 0.0).await.unwrap();
        assert!(ex.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_missing_order_is_already_cancelled_or_not_found() {
        let ex = SimExchange::new(10_000.0);
        let err = ex.cancel_order("BTCUSDT", "nonexistent").await.unwrap_err();
        assert!(err.is_cancel_noop());
    }

    #[tokio::test]
    async fn limit_open_registers_open_order() {
        let ex = SimExchange::new(10_000.0);
        let handle = ex.limit_open_long("ETHUSDT", 2.0, 3.0, 100.0, 90.0).await.unwrap();
        let orders = ex.get_open_orders("ETHUSDT").await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, handle.order_id);
    }
}
