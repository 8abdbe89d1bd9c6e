//! Counterparty identities shared by local and interbank trades.

use serde::{Deserialize, Serialize};

/// Width of the routing-number prefix in a composite identifier.
const ROUTING_DIGITS: usize = 3;

/// Party identifies a trade participant.
///
/// Local users of this bank are always `Local`, including when they arrive
/// in composite form carrying the own routing number, so derived equality
/// is the turn-alternation comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Local(i64),
    Remote { routing_number: u32, id: String },
}

impl Party {
    /// Builds a party from a (routing number, id) pair.
    pub fn from_parts(routing_number: u32, id: &str, own_routing: u32) -> Result<Self, String> {
        let id = id.trim();
        if id.is_empty() {
            return Err("party id is empty".to_string());
        }

        if routing_number == own_routing {
            let user_id = id
                .parse::<i64>()
                .map_err(|_| format!("invalid local user id: {}", id))?;
            Ok(Party::Local(user_id))
        } else {
            Ok(Party::Remote {
                routing_number,
                id: id.to_string(),
            })
        }
    }

    /// Parses a composite `routing‖id` identifier such as "4447".
    pub fn from_composite(composite: &str, own_routing: u32) -> Result<Self, String> {
        let composite = composite.trim();
        if composite.len() <= ROUTING_DIGITS || !composite.is_char_boundary(ROUTING_DIGITS) {
            return Err(format!("invalid composite party id: {}", composite));
        }

        let (routing, id) = composite.split_at(ROUTING_DIGITS);
        let routing_number = routing
            .parse::<u32>()
            .map_err(|_| format!("invalid routing number in party id: {}", composite))?;

        Self::from_parts(routing_number, id, own_routing)
    }

    /// Returns the (routing number, id) pair of this party.
    pub fn to_parts(&self, own_routing: u32) -> (u32, String) {
        match self {
            Party::Local(id) => (own_routing, id.to_string()),
            Party::Remote { routing_number, id } => (*routing_number, id.clone()),
        }
    }

    /// Returns the composite `routing‖id` identifier.
    pub fn composite(&self, own_routing: u32) -> String {
        let (routing, id) = self.to_parts(own_routing);
        format!("{}{}", routing, id)
    }

    pub fn local_id(&self) -> Option<i64> {
        match self {
            Party::Local(id) => Some(*id),
            Party::Remote { .. } => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Party::Local(_))
    }

    /// Returns the routing number of the bank this party belongs to.
    pub fn routing_number(&self, own_routing: u32) -> u32 {
        match self {
            Party::Local(_) => own_routing,
            Party::Remote { routing_number, .. } => *routing_number,
        }
    }
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Party::Local(id) => write!(f, "{}", id),
            Party::Remote { routing_number, id } => write!(f, "{}{}", routing_number, id),
        }
    }
}
