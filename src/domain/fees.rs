//! Commission schedule for matched orders.

use rust_decimal::Decimal;

use super::OrderType;

/// FeeSchedule charges a share of the notional up to a fixed cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    /// Fraction of the notional (e.g., 0.14).
    pub rate: Decimal,
    /// Maximum fee per fill.
    pub cap: Decimal,
}

impl FeeSchedule {
    pub fn new(rate: Decimal, cap: Decimal) -> Self {
        Self { rate, cap }
    }

    /// Returns min(cap, rate × notional).
    pub fn apply(&self, notional: Decimal) -> Decimal {
        (self.rate * notional).min(self.cap)
    }

    /// Returns the schedule for an order type, if that type is charged at all.
    pub fn for_order_type(order_type: OrderType) -> Option<Self> {
        match order_type {
            OrderType::Market => Some(Self::new(Decimal::new(14, 2), Decimal::from(7))),
            OrderType::Limit => Some(Self::new(Decimal::new(24, 2), Decimal::from(12))),
            OrderType::Stop | OrderType::StopLimit => None,
        }
    }
}

/// Returns the fee charged on a fill of the given notional.
pub fn order_fee(order_type: OrderType, notional: Decimal) -> Decimal {
    FeeSchedule::for_order_type(order_type)
        .map(|schedule| schedule.apply(notional))
        .unwrap_or(Decimal::ZERO)
}
