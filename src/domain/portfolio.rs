//! Holdings of a user in one security.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Portfolio is a (user, security) holding. Rows with zero quantity do not exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: i64,
    pub user_id: i64,
    pub security_id: i64,
    pub quantity: i64,
    /// Portion of the holding offered to OTC buyers.
    pub public_count: i64,
    pub purchase_price: Decimal,
}
