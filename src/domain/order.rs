//! Standing buy/sell orders and their closed enumerations.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Returns the side an order of this direction matches against.
    pub fn opposite(self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "buy"),
            Direction::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Direction::Buy),
            "sell" => Ok(Direction::Sell),
            _ => Err(format!("Unknown order direction: {}", s)),
        }
    }
}

/// Execution type of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    #[serde(rename = "stop-limit")]
    StopLimit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
            OrderType::Stop => write!(f, "stop"),
            OrderType::StopLimit => write!(f, "stop-limit"),
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            "stop" => Ok(OrderType::Stop),
            "stop-limit" | "stop_limit" => Ok(OrderType::StopLimit),
            _ => Err(format!("Unknown order type: {}", s)),
        }
    }
}

/// Lifecycle state of an order. Orders arrive here already approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Approved,
    Done,
    Declined,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Approved => write!(f, "approved"),
            OrderStatus::Done => write!(f, "done"),
            OrderStatus::Declined => write!(f, "declined"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "approved" => Ok(OrderStatus::Approved),
            "done" => Ok(OrderStatus::Done),
            "declined" => Ok(OrderStatus::Declined),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

/// Order is a standing instruction to buy or sell a quantity of a security.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    /// Settlement account; orders without one are never matched.
    pub account_id: Option<i64>,
    pub security_id: i64,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: i64,
    /// Unfilled quantity, NULL until the engine first touches the order.
    pub remaining_parts: Option<i64>,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub all_or_none: bool,
    pub margin: bool,
    pub after_hours: bool,
    pub status: OrderStatus,
    pub is_done: bool,
    /// Unix milliseconds of the last change; counter-orders are consumed oldest first.
    pub last_modified: i64,
}

impl Order {
    /// Returns the unfilled quantity, treating an untouched order as fully unfilled.
    pub fn remaining(&self) -> i64 {
        self.remaining_parts.unwrap_or(self.quantity)
    }

    /// Returns true while the order can still take part in matching.
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Approved && !self.is_done
    }

    pub fn is_buy(&self) -> bool {
        self.direction == Direction::Buy
    }

    /// Returns true for a market buy, which accepts any eligible seller's terms.
    pub fn is_market_buy(&self) -> bool {
        self.order_type == OrderType::Market && self.is_buy()
    }
}
