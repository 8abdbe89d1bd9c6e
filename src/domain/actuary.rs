//! Trading-desk identities carrying a usage limit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const AGENT_DEPARTMENT: &str = "agent";

/// Actuary is a desk identity whose margin and agent fills accrue against a limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actuary {
    pub id: i64,
    pub user_id: i64,
    pub department: String,
    pub limit_amount: Decimal,
    pub used_limit: Decimal,
}

impl Actuary {
    pub fn is_agent(&self) -> bool {
        self.department.eq_ignore_ascii_case(AGENT_DEPARTMENT)
    }

    /// Returns the part of the limit not yet consumed.
    pub fn available_limit(&self) -> Decimal {
        self.limit_amount - self.used_limit
    }
}
